//! Onboarding flow definitions.
//!
//! A flow is an ordered list of steps loaded once and shared read-only.
//! Field kinds are a closed tagged enum so each kind carries only the
//! attributes that make sense for it.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::OnboardingError;

/// Collected values keyed by field id.
pub type FormData = BTreeMap<String, serde_json::Value>;

/// A fixed, ordered onboarding sequence for one vertical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingFlow {
    pub id: String,
    /// Vertical slug, e.g. "auto-repair-shop".
    pub vertical: String,
    #[serde(default)]
    pub name: String,
    pub steps: Vec<Step>,
    /// Vertical-specific phrases that hand chat to a human.
    #[serde(default)]
    pub escalation_triggers: Vec<String>,
}

/// What a step is for. Position in the flow is the only ordering signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Welcome,
    Connect,
    Configure,
    Upload,
    Activate,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::Connect => "connect",
            Self::Configure => "configure",
            Self::Upload => "upload",
            Self::Activate => "activate",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub integrations: Vec<IntegrationConfig>,
    #[serde(default)]
    pub validations: Vec<ValidationRule>,
}

impl Step {
    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// A third-party service offered on a connect step.
///
/// The form reports a connection as a truthy value under `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// Per-kind attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Email,
    Phone,
    Select {
        options: Vec<String>,
    },
    Multiselect {
        options: Vec<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Slider {
        min: f64,
        max: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
    },
    Toggle {
        #[serde(default)]
        default: bool,
    },
    Date,
    Time,
    /// Value is a reference to an already-uploaded file. Extensions are
    /// enforced by the upload endpoint, not here.
    File {
        #[serde(default)]
        accept: Vec<String>,
    },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Select { .. } => "select",
            Self::Multiselect { .. } => "multiselect",
            Self::Number { .. } => "number",
            Self::Slider { .. } => "slider",
            Self::Toggle { .. } => "toggle",
            Self::Date => "date",
            Self::Time => "time",
            Self::File { .. } => "file",
        }
    }
}

/// Shows a field only when another field has a value.
///
/// With `equals`, the other field must equal it (or, for lists, contain it);
/// without, any non-empty value satisfies the condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<serde_json::Value>,
}

/// A regex compiled when the flow is parsed.
#[derive(Debug, Clone)]
pub struct Pattern(regex::Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        regex::Regex::new(pattern).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Explicit step-level check against one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    Pattern {
        field: String,
        pattern: Pattern,
        #[serde(default)]
        message: Option<String>,
    },
    /// Numbers compare by value, strings by length, lists by count.
    Min {
        field: String,
        value: f64,
        #[serde(default)]
        message: Option<String>,
    },
    Max {
        field: String,
        value: f64,
        #[serde(default)]
        message: Option<String>,
    },
    /// Named check registered with the `Validator`.
    Custom {
        field: String,
        name: String,
        #[serde(default)]
        message: Option<String>,
    },
}

impl ValidationRule {
    pub fn field(&self) -> &str {
        match self {
            Self::Pattern { field, .. }
            | Self::Min { field, .. }
            | Self::Max { field, .. }
            | Self::Custom { field, .. } => field,
        }
    }
}

impl OnboardingFlow {
    /// Parse and verify a flow from JSON.
    pub fn from_json(json: &str) -> Result<Self, OnboardingError> {
        let flow: Self = serde_json::from_str(json).map_err(|e| OnboardingError::InvalidFlow {
            flow_id: "<unparsed>".to_string(),
            reason: e.to_string(),
        })?;
        flow.verify()?;
        Ok(flow)
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check structural consistency. Run once at load time.
    pub fn verify(&self) -> Result<(), OnboardingError> {
        let fail = |reason: String| OnboardingError::InvalidFlow {
            flow_id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(fail("flow id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(fail("flow has no steps".into()));
        }

        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(step.id.as_str()) {
                return Err(fail(format!("duplicate step id '{}'", step.id)));
            }

            let mut field_ids = HashSet::new();
            for field in &step.fields {
                if !field_ids.insert(field.id.as_str()) {
                    return Err(fail(format!(
                        "duplicate field '{}' in step '{}'",
                        field.id, step.id
                    )));
                }
            }
            for integration in &step.integrations {
                if !field_ids.insert(integration.id.as_str()) {
                    return Err(fail(format!(
                        "integration '{}' in step '{}' collides with another id",
                        integration.id, step.id
                    )));
                }
            }

            for field in &step.fields {
                if let Some(dep) = &field.depends_on {
                    if dep.field == field.id || !field_ids.contains(dep.field.as_str()) {
                        return Err(fail(format!(
                            "field '{}' depends on unknown field '{}'",
                            field.id, dep.field
                        )));
                    }
                }
                match &field.kind {
                    FieldKind::Slider { min, max, .. } if min > max => {
                        return Err(fail(format!("slider '{}' has min > max", field.id)));
                    }
                    FieldKind::Number {
                        min: Some(min),
                        max: Some(max),
                    } if min > max => {
                        return Err(fail(format!("number '{}' has min > max", field.id)));
                    }
                    FieldKind::Select { options } | FieldKind::Multiselect { options }
                        if options.is_empty() =>
                    {
                        return Err(fail(format!("field '{}' has no options", field.id)));
                    }
                    _ => {}
                }
            }

            for rule in &step.validations {
                if !field_ids.contains(rule.field()) {
                    return Err(fail(format!(
                        "validation in step '{}' targets unknown field '{}'",
                        step.id,
                        rule.field()
                    )));
                }
            }
        }
        Ok(())
    }
}
