//! Error types for Agent Factory.

use std::time::Duration;

/// Top-level error type for the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The progress row changed since it was read.
    #[error("Version conflict on progress for user {user_id} in flow {flow_id}")]
    VersionConflict { user_id: String, flow_id: String },
}

/// Model backend errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transport failure, timeout, auth failure or a 5xx from the backend.
    #[error("Backend {provider} unavailable: {reason}")]
    BackendUnavailable { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    /// The backend refused the request itself (bad model, oversized input).
    #[error("Request rejected by {provider}: {reason}")]
    Rejected { provider: String, reason: String },
}

impl LlmError {
    /// Whether the error is a transport-level failure the caller may retry.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
}

/// Conversation orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Conversation has no messages")]
    EmptyConversation,

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Onboarding sequencer errors.
///
/// Field validation failures are not errors; they come back as data in
/// `AdvanceOutcome::Invalid`.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Flow {flow_id} has no step at index {index}")]
    FlowExhausted { flow_id: String, index: usize },

    #[error("Step {submitted} submitted but current step is {current}")]
    StepMismatch { submitted: String, current: String },

    #[error("Progress for user {user_id} was updated concurrently")]
    ConcurrentUpdate { user_id: String },

    #[error("Unknown onboarding flow: {0}")]
    UnknownFlow(String),

    #[error("Invalid flow definition {flow_id}: {reason}")]
    InvalidFlow { flow_id: String, reason: String },

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for OnboardingError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::VersionConflict { user_id, .. } => Self::ConcurrentUpdate { user_id },
            other => Self::Database(other),
        }
    }
}

/// Provisioning collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Provisioning request failed: {0}")]
    RequestFailed(String),

    #[error("Provisioning endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, Error>;
