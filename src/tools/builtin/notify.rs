//! `notify_human` tool: flags a conversation for the team.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::tools::tool::{Tool, ToolError, require_str};

const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];

/// A request for a team member to look at a conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HumanNotification {
    pub message: String,
    pub priority: String,
    pub context: serde_json::Value,
}

/// Logs every notification and forwards it to a listener when one is
/// attached.
#[derive(Default)]
pub struct NotifyHumanTool {
    sink: Option<mpsc::UnboundedSender<HumanNotification>>,
}

impl NotifyHumanTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: mpsc::UnboundedSender<HumanNotification>) -> Self {
        Self { sink: Some(sink) }
    }
}

#[async_trait]
impl Tool for NotifyHumanTool {
    fn name(&self) -> &str {
        "notify_human"
    }

    fn description(&self) -> &str {
        "Notify a human team member for review or escalation. Use when the \
         customer asks for a person or the request is outside what you can do."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Notification message"},
                "priority": {"type": "string", "enum": PRIORITIES},
                "context": {"type": "object", "description": "Relevant context data"}
            },
            "required": ["message", "priority"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let message = require_str(self.name(), &params, "message")?;
        let priority = require_str(self.name(), &params, "priority")?;
        if !PRIORITIES.contains(&priority) {
            return Err(ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: format!("priority must be one of {PRIORITIES:?}, got '{priority}'"),
            });
        }

        let notification = HumanNotification {
            message: message.to_string(),
            priority: priority.to_string(),
            context: params.get("context").cloned().unwrap_or(serde_json::Value::Null),
        };
        tracing::info!(priority, message, "Agent requested a human");

        let delivered = match &self.sink {
            Some(sink) => sink.send(notification).is_ok(),
            None => false,
        };
        Ok(serde_json::json!({
            "notified": true,
            "priority": priority,
            "delivered": delivered,
        }))
    }
}
