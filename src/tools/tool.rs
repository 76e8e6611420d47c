//! The `Tool` trait and parameter helpers.

use async_trait::async_trait;

pub use crate::error::ToolError;

/// A capability the model may ask the orchestrator to run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the input object.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool. Any serializable value is a valid result.
    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Fetch a required string parameter.
pub fn require_str<'a>(
    tool: &str,
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters {
            name: tool.to_string(),
            reason: format!("missing string parameter '{key}'"),
        })
}
