//! `get_user_progress` tool: where a user stands in an onboarding flow.

use std::sync::Arc;

use async_trait::async_trait;

use crate::onboarding::FlowCatalog;
use crate::store::Database;
use crate::tools::tool::{Tool, ToolError, require_str};

/// Reads onboarding progress for the agent, so it can pick up a
/// conversation where the user left the flow.
pub struct UserProgressTool {
    db: Arc<dyn Database>,
    catalog: Arc<FlowCatalog>,
}

impl UserProgressTool {
    pub fn new(db: Arc<dyn Database>, catalog: Arc<FlowCatalog>) -> Self {
        Self { db, catalog }
    }
}

#[async_trait]
impl Tool for UserProgressTool {
    fn name(&self) -> &str {
        "get_user_progress"
    }

    fn description(&self) -> &str {
        "Get the user's current progress in an onboarding flow: the step they \
         are on, whether they finished, and the answers given so far."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {"type": "string", "description": "User identifier"},
                "flow_id": {"type": "string", "description": "Onboarding flow identifier"}
            },
            "required": ["user_id", "flow_id"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let user_id = require_str(self.name(), &params, "user_id")?;
        let flow_id = require_str(self.name(), &params, "flow_id")?;

        let flow = self.catalog.get(flow_id).map_err(|e| ToolError::InvalidParameters {
            name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        let progress = self
            .db
            .get_progress(user_id, flow_id)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let Some(progress) = progress else {
            return Ok(serde_json::json!({
                "user_id": user_id,
                "flow_id": flow_id,
                "status": "not_started",
                "total_steps": flow.len(),
            }));
        };

        Ok(serde_json::json!({
            "user_id": user_id,
            "flow_id": flow_id,
            "status": progress.status.as_str(),
            "current_step": progress.current_step,
            "current_step_id": flow.step(progress.current_step).map(|s| s.id.as_str()),
            "total_steps": flow.len(),
            "values": progress.values,
        }))
    }
}
