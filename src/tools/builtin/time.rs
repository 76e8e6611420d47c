//! `current_time` tool: lets the agent answer "are you open right now?"
//! style questions against a fixed UTC offset.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};

use crate::tools::tool::{Tool, ToolError};

/// Reports the current date and time, optionally shifted by a UTC offset.
pub struct CurrentTimeTool;

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Pass utc_offset_minutes for the business's \
         local time (e.g. -300 for US Eastern standard time)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "utc_offset_minutes": {
                    "type": "integer",
                    "description": "Offset from UTC in minutes (default 0)"
                }
            }
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let minutes = params
            .get("utc_offset_minutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let offset = minutes
            .checked_mul(60)
            .and_then(|secs| i32::try_from(secs).ok())
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ToolError::InvalidParameters {
                name: self.name().to_string(),
                reason: format!("utc_offset_minutes out of range: {minutes}"),
            })?;

        let now = Utc::now().with_timezone(&offset);
        Ok(serde_json::json!({
            "iso8601": now.to_rfc3339(),
            "date": now.format("%Y-%m-%d").to_string(),
            "time": now.format("%H:%M").to_string(),
            "weekday": now.format("%A").to_string(),
        }))
    }
}
