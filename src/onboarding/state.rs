//! Onboarding state: where a user is in a flow and what they have entered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::FormData;

/// Position in a flow of `len` steps.
///
/// Moves forward one step at a time: AtStep(0) → … → AtStep(len - 1) →
/// Completed. `Back` only re-displays a step and is not a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum SequencerState {
    AtStep(usize),
    Completed,
}

impl SequencerState {
    /// Check if a transition from `self` to `target` is valid in a flow of `len` steps.
    pub fn can_transition_to(&self, target: SequencerState, len: usize) -> bool {
        match (self, target) {
            (Self::AtStep(i), Self::AtStep(j)) => j == i + 1 && j < len,
            (Self::AtStep(i), Self::Completed) => i + 1 == len,
            (Self::Completed, _) => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The state after the current step is accepted.
    pub fn next(&self, len: usize) -> Option<SequencerState> {
        match self {
            Self::AtStep(i) if i + 1 < len => Some(Self::AtStep(i + 1)),
            Self::AtStep(_) => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

impl Default for SequencerState {
    fn default() -> Self {
        Self::AtStep(0)
    }
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtStep(i) => write!(f, "at_step({i})"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted progress for one (user, flow).
///
/// `version` is 0 until the first save and increments on every write; saves
/// are conditional on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingProgress {
    pub user_id: String,
    pub flow_id: String,
    pub current_step: usize,
    /// Every value accepted so far, across steps.
    pub values: FormData,
    pub status: ProgressStatus,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl OnboardingProgress {
    pub fn new(user_id: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            flow_id: flow_id.into(),
            current_step: 0,
            values: FormData::new(),
            status: ProgressStatus::InProgress,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SequencerState {
        match self.status {
            ProgressStatus::Completed => SequencerState::Completed,
            ProgressStatus::InProgress => SequencerState::AtStep(self.current_step),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }

    /// Merge accepted step data. Recurring field ids take the newer value.
    pub fn merge(&mut self, form: &FormData) {
        for (key, value) in form {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
        }
    }
}

/// Terminal output of a completed flow, handed to provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    pub id: Uuid,
    pub user_id: String,
    pub flow_id: String,
    pub vertical: String,
    pub values: FormData,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

impl AgentConfiguration {
    pub fn from_progress(progress: &OnboardingProgress, vertical: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: progress.user_id.clone(),
            flow_id: progress.flow_id.clone(),
            vertical: vertical.to_string(),
            values: progress.values.clone(),
            status: AgentStatus::Active,
            created_at: Utc::now(),
        }
    }
}
