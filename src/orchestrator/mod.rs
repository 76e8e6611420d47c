//! Conversation orchestrator — one assistant turn per call.
//!
//! The orchestrator renders the system prompt for a client, sends the
//! history plus known tool schemas to the model, and reports what came back.
//! It is stateless: everything it needs arrives in `messages`, and it never
//! writes to the caller's history. Backend errors propagate untouched; retry
//! policy belongs to the caller.

pub mod escalation;

pub use escalation::{EscalationTriggers, decide_escalation};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::{OrchestratorError, ToolError};
use crate::llm::{
    ChatMessage, LlmProvider, ModelRequest, StopReason, TextStream, TokenUsage, ToolInvocation,
    ToolResult,
};
use crate::template::{self, ClientContext};
use crate::tools::ToolRegistry;

/// Prompt used when the deployment does not supply one.
pub const DEFAULT_SYSTEM_TEMPLATE: &str = "\
You are {{AGENT_NAME}}, the assistant for {{COMPANY_NAME}}.
Answer customer questions clearly and briefly. Use the available tools when \
they help. If you are unsure, say so and offer to connect the customer with \
the team.";

/// Tool batches [`Orchestrator::respond`] runs before handing back.
pub const MAX_TOOL_ROUNDS: usize = 3;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one model call.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    /// Text for the user; may be empty when the model only requested tools.
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

impl TurnResult {
    /// The caller must run tools and continue before showing anything.
    pub fn needs_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolUse && !self.tool_calls.is_empty()
    }
}

/// Result of [`Orchestrator::respond`]: the final turn plus the messages the
/// caller should append to its history, in order.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub turn: TurnResult,
    pub transcript: Vec<ChatMessage>,
}

/// Drives model calls and tool round-trips.
pub struct Orchestrator {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    system_template: String,
    max_tokens: u32,
    max_tool_rounds: usize,
    tool_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        system_template: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            tools,
            system_template: system_template.into(),
            max_tokens: 1024,
            max_tool_rounds: MAX_TOOL_ROUNDS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Upper bound on a single tool execution.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// The system prompt rendered for one client.
    pub fn system_prompt(&self, context: &ClientContext) -> String {
        let missing = template::unresolved(&self.system_template, context);
        if !missing.is_empty() {
            tracing::debug!(placeholders = ?missing, "System prompt left placeholders unresolved");
        }
        template::render(&self.system_template, context)
    }

    async fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        context: &ClientContext,
    ) -> Result<ModelRequest, OrchestratorError> {
        if messages.is_empty() {
            return Err(OrchestratorError::EmptyConversation);
        }
        Ok(ModelRequest::new(self.system_prompt(context), messages)
            .with_tools(self.tools.tool_definitions().await)
            .with_max_tokens(self.max_tokens))
    }

    /// Produce the next assistant turn for `messages`.
    ///
    /// Requested tools are reported in `tool_calls`, never executed here.
    pub async fn generate_turn(
        &self,
        messages: &[ChatMessage],
        context: &ClientContext,
    ) -> Result<TurnResult, OrchestratorError> {
        let request = self.build_request(messages.to_vec(), context).await?;
        let response = self.llm.complete(request).await.map_err(|e| {
            tracing::warn!(model = %self.llm.model_name(), "Model call failed: {}", e);
            OrchestratorError::Llm(e)
        })?;

        tracing::debug!(
            stop_reason = ?response.stop_reason,
            tool_calls = response.tool_calls.len(),
            "Turn generated"
        );
        Ok(TurnResult {
            content: response.content,
            tool_calls: response.tool_calls,
            stop_reason: response.stop_reason,
            usage: response.usage,
        })
    }

    /// Feed one tool's output back and generate the follow-up turn.
    ///
    /// `output` is the tool's value, or an error description.
    pub async fn continue_with_tool_result(
        &self,
        messages: &[ChatMessage],
        invocation: &ToolInvocation,
        output: Result<serde_json::Value, String>,
        context: &ClientContext,
    ) -> Result<TurnResult, OrchestratorError> {
        let result = tool_result_from_output(&invocation.id, output);
        self.continue_with_tool_results(
            messages,
            "",
            std::slice::from_ref(invocation),
            vec![result],
            context,
        )
        .await
    }

    /// Multi-call form: every result for one assistant turn goes back in a
    /// single user message.
    pub async fn continue_with_tool_results(
        &self,
        messages: &[ChatMessage],
        assistant_content: &str,
        calls: &[ToolInvocation],
        results: Vec<ToolResult>,
        context: &ClientContext,
    ) -> Result<TurnResult, OrchestratorError> {
        let mut extended = messages.to_vec();
        extended.extend(tool_round_trip(assistant_content, calls.to_vec(), results));
        self.generate_turn(&extended, context).await
    }

    /// Run a requested tool. Failures become an error result for the model
    /// to react to rather than aborting the turn.
    pub async fn execute_tool(&self, invocation: &ToolInvocation) -> ToolResult {
        let Some(tool) = self.tools.get(&invocation.name).await else {
            tracing::warn!(tool = %invocation.name, "Model requested unknown tool");
            let err = ToolError::NotFound {
                name: invocation.name.clone(),
            };
            return ToolResult::error(&invocation.id, err.to_string());
        };

        let outcome = tokio::time::timeout(self.tool_timeout, tool.execute(invocation.input.clone()))
            .await
            .unwrap_or_else(|_| {
                Err(ToolError::Timeout {
                    name: invocation.name.clone(),
                    timeout: self.tool_timeout,
                })
            });
        match outcome {
            Ok(value) => tool_result_from_output(&invocation.id, Ok(value)),
            Err(e) => {
                tracing::warn!(tool = %invocation.name, "Tool execution failed: {}", e);
                ToolResult::error(&invocation.id, e.to_string())
            }
        }
    }

    /// Generate a turn, running requested tools and continuing until the
    /// model answers without tools or `max_tool_rounds` batches have run.
    ///
    /// Every tool call in the transcript is followed by its results. When the
    /// round limit is hit, the final turn's calls stay out of the transcript
    /// and are reported in `turn.tool_calls`; empty assistant text is never
    /// recorded.
    pub async fn respond(
        &self,
        messages: &[ChatMessage],
        context: &ClientContext,
    ) -> Result<Reply, OrchestratorError> {
        let mut extended = messages.to_vec();
        let mut transcript = Vec::new();
        let mut turn = self.generate_turn(&extended, context).await?;

        let mut rounds = 0;
        while turn.needs_tools() && rounds < self.max_tool_rounds {
            rounds += 1;
            let mut results = Vec::with_capacity(turn.tool_calls.len());
            for call in &turn.tool_calls {
                results.push(self.execute_tool(call).await);
            }
            let round = tool_round_trip(&turn.content, turn.tool_calls.clone(), results);
            extended.extend(round.iter().cloned());
            transcript.extend(round);
            turn = self.generate_turn(&extended, context).await?;
        }

        if turn.needs_tools() {
            tracing::warn!(
                rounds,
                pending = turn.tool_calls.len(),
                "Tool round limit reached; returning unresolved calls"
            );
        }
        if !turn.content.trim().is_empty() {
            transcript.push(ChatMessage::assistant(turn.content.clone()));
        }
        Ok(Reply { turn, transcript })
    }

    /// Stream the next assistant turn as text deltas.
    ///
    /// Dropping the returned stream closes the backend connection.
    pub async fn stream_turn(
        &self,
        messages: &[ChatMessage],
        context: &ClientContext,
    ) -> Result<TextStream, OrchestratorError> {
        let request = self.build_request(messages.to_vec(), context).await?;
        self.llm.stream(request).await.map_err(|e| {
            tracing::warn!(model = %self.llm.model_name(), "Streaming call failed: {}", e);
            OrchestratorError::Llm(e)
        })
    }
}

/// The assistant tool-call message followed by its tool-result message.
pub fn tool_round_trip(
    assistant_content: &str,
    calls: Vec<ToolInvocation>,
    results: Vec<ToolResult>,
) -> [ChatMessage; 2] {
    [
        ChatMessage::assistant_tool_calls(assistant_content, calls),
        ChatMessage::tool_results(results),
    ]
}

/// Serialize a tool's output; strings pass through unquoted.
pub fn tool_result_from_output(
    tool_use_id: &str,
    output: Result<serde_json::Value, String>,
) -> ToolResult {
    match output {
        Ok(serde_json::Value::String(text)) => ToolResult::success(tool_use_id, text),
        Ok(value) => ToolResult::success(tool_use_id, value.to_string()),
        Err(reason) => ToolResult::error(tool_use_id, reason),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{ModelResponse, Role};
    use crate::tools::Tool;

    /// Replays canned responses and records every request.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<ModelResponse, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted response left")
        }

        async fn stream(&self, request: ModelRequest) -> Result<TextStream, LlmError> {
            self.requests.lock().unwrap().push(request);
            Ok(TextStream::from_fragments(["Hi", " there"]))
        }
    }

    fn text(content: &str) -> Result<ModelResponse, LlmError> {
        Ok(ModelResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        })
    }

    fn tool_use(name: &str, input: serde_json::Value) -> Result<ModelResponse, LlmError> {
        Ok(ModelResponse {
            content: String::new(),
            tool_calls: vec![ToolInvocation {
                id: "toolu_1".to_string(),
                name: name.to_string(),
                input,
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        })
    }

    struct LookupTool;

    #[async_trait]
    impl Tool for LookupTool {
        fn name(&self) -> &str {
            "lookup"
        }
        fn description(&self) -> &str {
            "Look up an order by id"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"id": {"type": "string"}}})
        }
        async fn execute(&self, params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            let id = crate::tools::require_str("lookup", &params, "id")?;
            if id == "missing" {
                return Err(ToolError::ExecutionFailed {
                    name: "lookup".into(),
                    reason: "no such order".into(),
                });
            }
            Ok(json!({"id": id, "status": "shipped"}))
        }
    }

    async fn orchestrator(llm: Arc<ScriptedLlm>) -> Orchestrator {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(LookupTool)).await;
        Orchestrator::new(llm, tools, "Agent for {{COMPANY_NAME}} at {{MARKUP}}% / {{HOURS}}")
    }

    #[tokio::test]
    async fn system_prompt_substitutes_known_keys_only() {
        let llm = ScriptedLlm::new(vec![text("hello")]);
        let orch = orchestrator(llm.clone()).await;
        let ctx = ClientContext::new()
            .with("COMPANY_NAME", "Acme")
            .with("MARKUP", "35");

        orch.generate_turn(&[ChatMessage::user("hi")], &ctx)
            .await
            .unwrap();

        let requests = llm.requests();
        assert_eq!(requests[0].system, "Agent for Acme at 35% / {{HOURS}}");
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].tools[0].name, "lookup");
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let llm = ScriptedLlm::new(vec![]);
        let orch = orchestrator(llm.clone()).await;
        let err = orch
            .generate_turn(&[], &ClientContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyConversation));
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn tool_use_is_reported_not_executed() {
        let llm = ScriptedLlm::new(vec![tool_use("lookup", json!({"id": "42"}))]);
        let orch = orchestrator(llm.clone()).await;

        let turn = orch
            .generate_turn(&[ChatMessage::user("where is 42?")], &ClientContext::new())
            .await
            .unwrap();

        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert!(turn.needs_tools());
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "lookup");
        assert_eq!(turn.tool_calls[0].input, json!({"id": "42"}));
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn backend_error_propagates_unmodified() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::BackendUnavailable {
            provider: "scripted".into(),
            reason: "timed out".into(),
        })]);
        let orch = orchestrator(llm).await;
        let history = vec![ChatMessage::user("hi")];

        let err = orch
            .generate_turn(&history, &ClientContext::new())
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Llm(e) => assert!(e.is_unavailable()),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn continuation_orders_call_before_result() {
        let llm = ScriptedLlm::new(vec![text("It shipped.")]);
        let orch = orchestrator(llm.clone()).await;
        let call = ToolInvocation {
            id: "toolu_7".into(),
            name: "lookup".into(),
            input: json!({"id": "42"}),
        };

        let turn = orch
            .continue_with_tool_result(
                &[ChatMessage::user("where is 42?")],
                &call,
                Ok(json!({"status": "shipped"})),
                &ClientContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(turn.content, "It shipped.");

        let sent = &llm.requests()[0].messages;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].role, Role::Assistant);
        assert_eq!(sent[1].tool_calls, vec![call]);
        assert_eq!(sent[2].role, Role::User);
        assert_eq!(sent[2].tool_results[0].tool_use_id, "toolu_7");
        assert_eq!(sent[2].tool_results[0].content, r#"{"status":"shipped"}"#);
        assert!(!sent[2].tool_results[0].is_error);
    }

    #[tokio::test]
    async fn continuation_with_error_payload() {
        let llm = ScriptedLlm::new(vec![text("Sorry, I couldn't find it.")]);
        let orch = orchestrator(llm.clone()).await;
        let call = ToolInvocation {
            id: "toolu_8".into(),
            name: "lookup".into(),
            input: json!({}),
        };
        orch.continue_with_tool_result(
            &[ChatMessage::user("where?")],
            &call,
            Err("database offline".into()),
            &ClientContext::new(),
        )
        .await
        .unwrap();

        let result = &llm.requests()[0].messages[2].tool_results[0];
        assert!(result.is_error);
        assert_eq!(result.content, "database offline");
    }

    #[tokio::test]
    async fn respond_runs_one_tool_round_trip() {
        let llm = ScriptedLlm::new(vec![
            tool_use("lookup", json!({"id": "42"})),
            text("Order 42 has shipped."),
        ]);
        let orch = orchestrator(llm.clone()).await;

        let reply = orch
            .respond(&[ChatMessage::user("where is 42?")], &ClientContext::new())
            .await
            .unwrap();

        assert_eq!(reply.turn.content, "Order 42 has shipped.");
        assert_eq!(reply.turn.stop_reason, StopReason::EndTurn);
        assert_eq!(reply.transcript.len(), 3);
        assert_eq!(reply.transcript[0].tool_calls[0].name, "lookup");
        assert!(reply.transcript[1].tool_results[0].content.contains("shipped"));
        assert_eq!(reply.transcript[2].content, "Order 42 has shipped.");
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result_and_turn_continues() {
        let llm = ScriptedLlm::new(vec![
            tool_use("refund", json!({"amount": 10})),
            text("I can't issue refunds, but the team can."),
        ]);
        let orch = orchestrator(llm.clone()).await;

        let reply = orch
            .respond(&[ChatMessage::user("refund me")], &ClientContext::new())
            .await
            .unwrap();

        let result = &reply.transcript[1].tool_results[0];
        assert!(result.is_error);
        assert!(result.content.contains("refund"));
        assert_eq!(reply.turn.content, "I can't issue refunds, but the team can.");
    }

    #[tokio::test]
    async fn failing_tool_becomes_error_result() {
        let llm = ScriptedLlm::new(vec![]);
        let orch = orchestrator(llm).await;
        let result = orch
            .execute_tool(&ToolInvocation {
                id: "t".into(),
                name: "lookup".into(),
                input: json!({"id": "missing"}),
            })
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("no such order"));
    }

    #[tokio::test]
    async fn respond_without_tools_is_single_call() {
        let llm = ScriptedLlm::new(vec![text("Hello!")]);
        let orch = orchestrator(llm.clone()).await;
        let reply = orch
            .respond(&[ChatMessage::user("hi")], &ClientContext::new())
            .await
            .unwrap();
        assert_eq!(reply.transcript, vec![ChatMessage::assistant("Hello!")]);
        assert_eq!(llm.requests().len(), 1);
    }

    fn assert_calls_are_answered(transcript: &[ChatMessage]) {
        for (i, msg) in transcript.iter().enumerate() {
            if msg.tool_calls.is_empty() {
                continue;
            }
            let next = transcript.get(i + 1).expect("tool call without a following message");
            for call in &msg.tool_calls {
                assert!(
                    next.tool_results.iter().any(|r| r.tool_use_id == call.id),
                    "no result for {}",
                    call.id
                );
            }
        }
    }

    #[tokio::test]
    async fn respond_chains_tool_rounds_until_text() {
        let llm = ScriptedLlm::new(vec![
            tool_use("lookup", json!({"id": "42"})),
            tool_use("lookup", json!({"id": "43"})),
            text("Both orders have shipped."),
        ]);
        let orch = orchestrator(llm.clone()).await;

        let reply = orch
            .respond(&[ChatMessage::user("where are 42 and 43?")], &ClientContext::new())
            .await
            .unwrap();

        assert_eq!(reply.turn.stop_reason, StopReason::EndTurn);
        assert_eq!(reply.transcript.len(), 5);
        assert_calls_are_answered(&reply.transcript);
        assert_eq!(reply.transcript[4], ChatMessage::assistant("Both orders have shipped."));
        assert_eq!(llm.requests().len(), 3);
        assert_eq!(llm.requests()[2].messages.len(), 5);
    }

    #[tokio::test]
    async fn respond_stops_at_round_limit_with_calls_pending() {
        let llm = ScriptedLlm::new(vec![
            tool_use("lookup", json!({"id": "42"})),
            tool_use("lookup", json!({"id": "43"})),
        ]);
        let orch = orchestrator(llm.clone()).await.with_max_tool_rounds(1);

        let reply = orch
            .respond(&[ChatMessage::user("where?")], &ClientContext::new())
            .await
            .unwrap();

        assert!(reply.turn.needs_tools());
        assert_eq!(reply.turn.tool_calls[0].input, json!({"id": "43"}));
        assert_eq!(reply.transcript.len(), 2);
        assert_calls_are_answered(&reply.transcript);
        assert_eq!(reply.transcript[1].role, Role::User);
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn respond_never_records_empty_assistant_text() {
        let llm = ScriptedLlm::new(vec![tool_use("lookup", json!({"id": "42"})), text("")]);
        let orch = orchestrator(llm).await;

        let reply = orch
            .respond(&[ChatMessage::user("where is 42?")], &ClientContext::new())
            .await
            .unwrap();

        assert_eq!(reply.transcript.len(), 2);
        assert!(
            reply
                .transcript
                .iter()
                .all(|m| !m.content.is_empty() || !m.tool_calls.is_empty() || !m.tool_results.is_empty())
        );
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _params: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(json!("late"))
        }
    }

    #[tokio::test]
    async fn slow_tool_times_out_as_error_result() {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(SlowTool)).await;
        let orch = Orchestrator::new(ScriptedLlm::new(vec![]), tools, "")
            .with_tool_timeout(std::time::Duration::from_millis(20));

        let result = orch
            .execute_tool(&ToolInvocation {
                id: "t".into(),
                name: "slow".into(),
                input: json!({}),
            })
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("timed out"), "{}", result.content);
    }

    #[tokio::test]
    async fn stream_turn_yields_fragments_in_order() {
        let llm = ScriptedLlm::new(vec![]);
        let orch = orchestrator(llm.clone()).await;
        let stream = orch
            .stream_turn(&[ChatMessage::user("hi")], &ClientContext::new())
            .await
            .unwrap();
        assert_eq!(stream.collect_text().await.unwrap(), "Hi there");
        assert_eq!(llm.requests().len(), 1);
    }

    #[test]
    fn string_output_is_not_quoted() {
        let result = tool_result_from_output("id", Ok(json!("plain text")));
        assert_eq!(result.content, "plain text");
    }
}
