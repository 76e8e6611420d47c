//! Step validation.
//!
//! Validation never fails as an error: it returns every violation at once
//! so the caller can render them next to the fields.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::model::{DependsOn, Field, FieldKind, FormData, Step, ValidationRule};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));
static PHONE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9 ().\-]+$").expect("valid regex"));
static US_ZIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}(-\d{4})?$").expect("valid regex"));

/// Field id → message. Empty means the step is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: BTreeMap<String, String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a violation; the first one per field wins.
    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }
}

/// A named check usable from `custom` rules.
pub type CustomCheck = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Validates steps. Holds the registry of named custom checks.
#[derive(Clone)]
pub struct Validator {
    custom: HashMap<String, CustomCheck>,
}

impl Validator {
    /// A validator with the built-in checks `url`, `non_negative`, `us_zip`
    /// and `accepted` (value is `true`).
    pub fn new() -> Self {
        let mut v = Self::empty();
        v.register("url", |value| {
            value
                .as_str()
                .and_then(|s| reqwest::Url::parse(s).ok())
                .is_some_and(|url| {
                    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
                })
        });
        v.register("non_negative", |value| {
            as_number(value).is_some_and(|n| n >= 0.0)
        });
        v.register("us_zip", |value| value.as_str().is_some_and(|s| US_ZIP.is_match(s)));
        v.register("accepted", |value| value.as_bool() == Some(true));
        v
    }

    pub fn empty() -> Self {
        Self {
            custom: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, check: F)
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(check));
    }

    /// Check `form` against every field, integration and rule of `step`.
    pub fn validate_step(&self, step: &Step, form: &FormData) -> ValidationReport {
        let form = apply_defaults(step, form);
        let mut report = ValidationReport::default();

        for field in &step.fields {
            if !is_visible(field, &form) {
                continue;
            }
            match form.get(&field.id).filter(|v| is_present(v)) {
                None if field.required => report.add(&field.id, format!("{} is required", label(field))),
                None => {}
                Some(value) => {
                    if let Err(message) = check_kind(field, value) {
                        report.add(&field.id, message);
                    }
                }
            }
        }

        for integration in step.integrations.iter().filter(|i| i.required) {
            if !form.get(&integration.id).is_some_and(is_truthy) {
                report.add(
                    &integration.id,
                    format!("{} must be connected", integration.provider),
                );
            }
        }

        for rule in &step.validations {
            let id = rule.field();
            if step.field(id).is_some_and(|f| !is_visible(f, &form)) {
                continue;
            }
            let Some(value) = form.get(id).filter(|v| is_present(v)) else {
                continue;
            };
            if let Err(message) = self.check_rule(rule, value) {
                report.add(id, message);
            }
        }

        report
    }

    fn check_rule(&self, rule: &ValidationRule, value: &Value) -> Result<(), String> {
        match rule {
            ValidationRule::Pattern {
                pattern, message, ..
            } => {
                if pattern.is_match(&as_text(value)) {
                    Ok(())
                } else {
                    Err(message
                        .clone()
                        .unwrap_or_else(|| format!("must match {}", pattern.as_str())))
                }
            }
            ValidationRule::Min {
                value: min,
                message,
                ..
            } => match measure(value) {
                Some(m) if m >= *min => Ok(()),
                _ => Err(message
                    .clone()
                    .unwrap_or_else(|| format!("must be at least {min}"))),
            },
            ValidationRule::Max {
                value: max,
                message,
                ..
            } => match measure(value) {
                Some(m) if m <= *max => Ok(()),
                _ => Err(message
                    .clone()
                    .unwrap_or_else(|| format!("must be at most {max}"))),
            },
            ValidationRule::Custom { name, message, .. } => match self.custom.get(name) {
                None => Err(format!("unknown validation '{name}'")),
                Some(check) if check(value) => Ok(()),
                Some(_) => Err(message.clone().unwrap_or_else(|| format!("failed {name} check"))),
            },
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate with the built-in custom checks only.
pub fn validate_step(step: &Step, form: &FormData) -> ValidationReport {
    Validator::new().validate_step(step, form)
}

/// `form` with omitted visible toggles set to their declared default.
pub fn apply_defaults(step: &Step, form: &FormData) -> FormData {
    let mut effective = form.clone();
    for field in &step.fields {
        if !is_visible(field, &effective) {
            continue;
        }
        if let FieldKind::Toggle { default } = field.kind {
            effective
                .entry(field.id.clone())
                .or_insert(Value::Bool(default));
        }
    }
    effective
}

fn is_visible(field: &Field, form: &FormData) -> bool {
    match &field.depends_on {
        None => true,
        Some(dep) => dependency_met(dep, form),
    }
}

fn dependency_met(dep: &DependsOn, form: &FormData) -> bool {
    let Some(actual) = form.get(&dep.field) else {
        return false;
    };
    match &dep.equals {
        None => is_truthy(actual),
        Some(expected) => match actual {
            Value::Array(items) => items.contains(expected),
            other => other == expected,
        },
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        other => is_present(other),
    }
}

fn label(field: &Field) -> &str {
    if field.label.is_empty() {
        &field.id
    } else {
        &field.label
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers by value, strings by length, lists by count.
fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    }
}

fn check_kind(field: &Field, value: &Value) -> Result<(), String> {
    match &field.kind {
        FieldKind::Text { max_length } => {
            let text = value.as_str().ok_or("must be text")?;
            match max_length {
                Some(max) if text.chars().count() > *max => {
                    Err(format!("must be at most {max} characters"))
                }
                _ => Ok(()),
            }
        }
        FieldKind::Email => match value.as_str() {
            Some(s) if EMAIL.is_match(s.trim()) => Ok(()),
            _ => Err("must be a valid email address".into()),
        },
        FieldKind::Phone => {
            let s = value.as_str().ok_or("must be a phone number")?;
            let digits = s.chars().filter(char::is_ascii_digit).count();
            if PHONE_CHARS.is_match(s.trim()) && (7..=15).contains(&digits) {
                Ok(())
            } else {
                Err("must be a valid phone number".into())
            }
        }
        FieldKind::Select { options } => match value.as_str() {
            Some(s) if options.iter().any(|o| o == s) => Ok(()),
            _ => Err("must be one of the listed options".into()),
        },
        FieldKind::Multiselect { options } => {
            let items = value.as_array().ok_or("must be a list of options")?;
            let all_known = items
                .iter()
                .all(|item| item.as_str().is_some_and(|s| options.iter().any(|o| o == s)));
            if all_known {
                Ok(())
            } else {
                Err("contains an option that is not listed".into())
            }
        }
        FieldKind::Number { min, max } => {
            let n = as_number(value).ok_or("must be a number")?;
            check_range(n, *min, *max)
        }
        FieldKind::Slider { min, max, step } => {
            let n = as_number(value).ok_or("must be a number")?;
            check_range(n, Some(*min), Some(*max))?;
            match step {
                Some(step) if *step > 0.0 => {
                    let steps = (n - min) / step;
                    if (steps - steps.round()).abs() < 1e-9 {
                        Ok(())
                    } else {
                        Err(format!("must be in increments of {step}"))
                    }
                }
                _ => Ok(()),
            }
        }
        FieldKind::Toggle { .. } => {
            if value.is_boolean() {
                Ok(())
            } else {
                Err("must be true or false".into())
            }
        }
        FieldKind::Date => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .map(|_| ())
            .ok_or_else(|| "must be a date (YYYY-MM-DD)".into()),
        FieldKind::Time => value
            .as_str()
            .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M").ok())
            .map(|_| ())
            .ok_or_else(|| "must be a time (HH:MM)".into()),
        // Presence of the upload reference is all that is checked here.
        FieldKind::File { .. } => Ok(()),
    }
}

fn check_range(n: f64, min: Option<f64>, max: Option<f64>) -> Result<(), String> {
    if let Some(min) = min
        && n < min
    {
        return Err(format!("must be at least {min}"));
    }
    if let Some(max) = max
        && n > max
    {
        return Err(format!("must be at most {max}"));
    }
    Ok(())
}
