//! Tools the orchestrator may offer to the model.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::llm::ToolDefinition;
use crate::tools::tool::Tool;

/// Built-in names that later registrations cannot replace.
const PROTECTED_TOOL_NAMES: &[&str] = &["current_time", "get_user_progress", "notify_human"];

#[derive(Default)]
struct Entries {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    builtins: BTreeSet<String>,
}

impl Entries {
    fn insert(&mut self, tool: Arc<dyn Tool>, builtin: bool) -> bool {
        let name = tool.name().to_string();
        if self.builtins.contains(&name) {
            tracing::warn!(tool = %name, "Rejected tool registration: would shadow a built-in tool");
            return false;
        }
        if builtin && PROTECTED_TOOL_NAMES.contains(&name.as_str()) {
            self.builtins.insert(name.clone());
        }
        tracing::debug!(tool = %name, builtin, "Registered tool");
        self.tools.insert(name, tool);
        true
    }
}

/// Name-keyed tool set. Iteration order is by name, so the tool list sent
/// with each request is stable.
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<Entries>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Returns false if the name belongs to a built-in.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> bool {
        self.entries.write().await.insert(tool, false)
    }

    /// Startup registration; protected names become built-ins.
    ///
    /// Only call before the registry is shared; a contended lock skips the
    /// tool.
    pub fn register_sync(&self, tool: Arc<dyn Tool>) -> bool {
        match self.entries.try_write() {
            Ok(mut entries) => entries.insert(tool, true),
            Err(_) => {
                tracing::warn!(tool = %tool.name(), "Registry busy; tool not registered");
                false
            }
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.entries.read().await.tools.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.tools.keys().cloned().collect()
    }

    /// Schemas for every registered tool, in name order.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.entries
            .read()
            .await
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use async_trait::async_trait;

    struct StubTool {
        name: &'static str,
        description: &'static str,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            self.description
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!(self.description))
        }
    }

    fn stub(name: &'static str, description: &'static str) -> Arc<dyn Tool> {
        Arc::new(StubTool { name, description })
    }

    #[tokio::test]
    async fn lookup_by_name() {
        let registry = ToolRegistry::new();
        assert!(registry.register(stub("lookup", "find things")).await);

        assert_eq!(registry.get("lookup").await.unwrap().description(), "find things");
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn definitions_come_out_in_name_order() {
        let registry = ToolRegistry::new();
        registry.register(stub("zeta", "z")).await;
        registry.register(stub("alpha", "a")).await;

        let defs = registry.tool_definitions().await;
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
        assert_eq!(registry.names().await, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn builtin_cannot_be_shadowed() {
        let registry = ToolRegistry::new();
        assert!(registry.register_sync(stub("current_time", "real clock")));
        assert!(!registry.register(stub("current_time", "impostor")).await);

        assert_eq!(
            registry.get("current_time").await.unwrap().description(),
            "real clock"
        );
    }

    #[tokio::test]
    async fn unprotected_names_can_be_replaced() {
        let registry = ToolRegistry::new();
        registry.register_sync(stub("lookup", "v1"));
        registry.register(stub("lookup", "v2")).await;
        assert_eq!(registry.get("lookup").await.unwrap().description(), "v2");
    }
}
