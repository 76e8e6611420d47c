//! Escalation triggers: phrases that hand a conversation to a human.

/// Phrases used when no list is configured.
pub const DEFAULT_TRIGGERS: &[&str] = &[
    "speak to a human",
    "talk to a person",
    "real person",
    "manager",
    "lawyer",
    "lawsuit",
    "complaint",
    "emergency",
];

/// True when any trigger occurs in `message`, ignoring case.
///
/// Phrases match as given, surrounding spaces included. Blank triggers
/// never match. This only signals; routing to a human is
/// the caller's job.
pub fn decide_escalation<S: AsRef<str>>(message: &str, triggers: &[S]) -> bool {
    let haystack = message.to_lowercase();
    triggers.iter().any(|trigger| {
        let needle = trigger.as_ref();
        !needle.trim().is_empty() && haystack.contains(&needle.to_lowercase())
    })
}

/// Ordered, de-duplicated trigger list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationTriggers {
    phrases: Vec<String>,
}

impl EscalationTriggers {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut triggers = Self::default();
        triggers.extend(phrases);
        triggers
    }

    /// Parse a comma-separated list, e.g. from an environment variable.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    pub fn defaults() -> Self {
        Self::new(DEFAULT_TRIGGERS.iter().copied())
    }

    /// Append phrases not already present (case-insensitive).
    pub fn extend<I, S>(&mut self, phrases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for phrase in phrases {
            let phrase = phrase.into();
            let lower = phrase.to_lowercase();
            if !phrase.trim().is_empty()
                && !self.phrases.iter().any(|p| p.to_lowercase() == lower)
            {
                self.phrases.push(phrase);
            }
        }
    }

    /// This list plus `extra`, e.g. a flow's vertical-specific triggers.
    pub fn merged_with(&self, extra: &[String]) -> Self {
        let mut merged = self.clone();
        merged.extend(extra.iter().cloned());
        merged
    }

    pub fn matches(&self, message: &str) -> bool {
        decide_escalation(message, &self.phrases)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.phrases
    }
}
