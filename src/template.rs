//! `{{key}}` placeholder substitution for system prompts.
//!
//! Keys missing from the context are left verbatim in the output. Templates
//! carry optional slots on purpose, so an unresolved placeholder is not an
//! error.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap());

/// Template variables supplied by the calling application (company name,
/// markup percentage, ...). Read-only to everything in this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientContext(BTreeMap<String, String>);

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ClientContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Substitute every `{{key}}` in `template` whose key is present in `context`.
///
/// Tokens are matched whole, so `{{markup}}` never touches
/// `{{markup_percentage}}`. Substituted values are not rescanned.
pub fn render(template: &str, context: &ClientContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match context.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Placeholder names in `template` that `context` does not resolve, in
/// order of first appearance.
pub fn unresolved(template: &str, context: &ClientContext) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if context.get(name).is_none() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
