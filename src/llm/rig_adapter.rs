//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.
//!
//! rig owns the HTTP transport and wire format; this module only converts
//! between provider-neutral messages and rig's, and maps rig errors onto
//! `LlmError`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rig::OneOrMany;
use rig::completion::{self, CompletionError, CompletionModel, CompletionRequest};
use rig::message::{AssistantContent, Message, ToolResultContent, UserContent};
use rig::streaming::StreamedAssistantContent;
use tokio::sync::mpsc;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, LlmProvider, ModelRequest, ModelResponse, Role, StopReason, TokenUsage,
    ToolInvocation,
};
use crate::llm::stream::TextStream;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Error bodies that mean the request itself is wrong; retrying won't help.
const REJECTION_MARKERS: &[&str] = &[
    "invalid_request_error",
    "not_found_error",
    "request_too_large",
];

/// Wraps a rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: String,
    timeout: Duration,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            provider: "rig".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Name used in error messages and logs.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Bounds the whole call, and each gap between stream chunks. Hitting it
    /// surfaces as `BackendUnavailable`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request(&self, request: ModelRequest) -> Result<CompletionRequest, LlmError> {
        let mut preamble = vec![request.system];
        let mut history = Vec::with_capacity(request.messages.len());
        for msg in request.messages {
            if msg.role == Role::System {
                preamble.push(msg.content);
            } else if let Some(converted) = to_rig_message(msg) {
                history.push(converted);
            }
        }

        let Some(prompt) = history.pop() else {
            return Err(LlmError::Rejected {
                provider: self.provider.clone(),
                reason: "no non-empty messages to send".to_string(),
            });
        };
        let preamble = preamble
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let tools = request
            .tools
            .into_iter()
            .map(|t| completion::ToolDefinition {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            })
            .collect();

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history)
            .tools(tools)
            .max_tokens(u64::from(request.max_tokens));
        if !preamble.is_empty() {
            builder = builder.preamble(preamble);
        }
        Ok(builder.build())
    }

    fn timed_out(&self) -> LlmError {
        LlmError::BackendUnavailable {
            provider: self.provider.clone(),
            reason: format!("request timed out after {:?}", self.timeout),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
    M::StreamingResponse: Send + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, LlmError> {
        let request = self.build_request(request)?;
        let response = tokio::time::timeout(self.timeout, self.model.completion(request))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| map_completion_error(&self.provider, e))?;

        let raw_stop = serde_json::to_value(&response.raw_response)
            .ok()
            .and_then(|raw| raw.get("stop_reason")?.as_str().map(str::to_string));

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for item in response.choice {
            match item {
                AssistantContent::Text(text) => content.push_str(&text.text),
                AssistantContent::ToolCall(call) => tool_calls.push(ToolInvocation {
                    id: call.id,
                    name: call.function.name,
                    input: call.function.arguments,
                }),
                _ => {}
            }
        }

        let stop_reason = match raw_stop.as_deref() {
            _ if !tool_calls.is_empty() => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };
        let usage = TokenUsage {
            input_tokens: clamp_tokens(response.usage.input_tokens),
            output_tokens: clamp_tokens(response.usage.output_tokens),
        };

        tracing::debug!(
            model = %self.model_name,
            stop_reason = ?stop_reason,
            tool_calls = tool_calls.len(),
            tokens = usage.total(),
            "Model call complete"
        );
        Ok(ModelResponse {
            content,
            tool_calls,
            stop_reason,
            usage,
        })
    }

    async fn stream(&self, request: ModelRequest) -> Result<TextStream, LlmError> {
        let request = self.build_request(request)?;
        let response = tokio::time::timeout(self.timeout, self.model.stream(request))
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| map_completion_error(&self.provider, e))?;

        let (tx, rx) = mpsc::channel(32);
        let provider = self.provider.clone();
        let idle = self.timeout;

        tokio::spawn(async move {
            let mut chunks = Box::pin(response);
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("Stream consumer dropped; closing connection");
                        break;
                    }
                    next = tokio::time::timeout(idle, chunks.next()) => next,
                };
                let item = match next {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(_) => {
                        let _ = tx
                            .send(Err(LlmError::BackendUnavailable {
                                provider: provider.clone(),
                                reason: format!("stream stalled for {idle:?}"),
                            }))
                            .await;
                        break;
                    }
                };
                match item {
                    Ok(StreamedAssistantContent::Text(text)) => {
                        if text.text.is_empty() {
                            continue;
                        }
                        if tx.send(Ok(text.text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(provider = %provider, "Stream interrupted: {}", e);
                        let _ = tx
                            .send(Err(LlmError::BackendUnavailable {
                                provider: provider.clone(),
                                reason: format!("stream interrupted: {e}"),
                            }))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(TextStream::new(rx))
    }
}

/// Convert one history entry. Entries with nothing to send become `None`.
fn to_rig_message(msg: ChatMessage) -> Option<Message> {
    match msg.role {
        Role::User => {
            let mut content: Vec<UserContent> = msg
                .tool_results
                .into_iter()
                .map(|r| {
                    let text = if r.is_error {
                        format!("Error: {}", r.content)
                    } else {
                        r.content
                    };
                    UserContent::tool_result(
                        r.tool_use_id,
                        OneOrMany::one(ToolResultContent::text(text)),
                    )
                })
                .collect();
            if !msg.content.trim().is_empty() {
                content.push(UserContent::text(msg.content));
            }
            OneOrMany::many(content)
                .ok()
                .map(|content| Message::User { content })
        }
        Role::Assistant => {
            let mut content = Vec::new();
            if !msg.content.trim().is_empty() {
                content.push(AssistantContent::text(msg.content));
            }
            content.extend(
                msg.tool_calls
                    .into_iter()
                    .map(|c| AssistantContent::tool_call(c.id, c.name, c.input)),
            );
            OneOrMany::many(content)
                .ok()
                .map(|content| Message::Assistant { id: None, content })
        }
        Role::System => None,
    }
}

fn map_completion_error(provider: &str, err: CompletionError) -> LlmError {
    match err {
        CompletionError::JsonError(e) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: e.to_string(),
        },
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        CompletionError::ProviderError(body)
            if REJECTION_MARKERS.iter().any(|m| body.contains(m)) =>
        {
            LlmError::Rejected {
                provider: provider.to_string(),
                reason: body,
            }
        }
        other => {
            tracing::warn!(provider, "Model backend call failed: {}", other);
            LlmError::BackendUnavailable {
                provider: provider.to_string(),
                reason: other.to_string(),
            }
        }
    }
}

fn clamp_tokens(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
