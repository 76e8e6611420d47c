//! Chat endpoints: one orchestrated turn per request, plain or streamed.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt as _;

use crate::error::OrchestratorError;
use crate::llm::{ChatMessage, Role, StopReason};
use crate::onboarding::FlowCatalog;
use crate::orchestrator::{EscalationTriggers, Orchestrator};
use crate::template::ClientContext;

/// Reply sent instead of a model turn when the user asks for a person.
pub const HANDOFF_MESSAGE: &str =
    "I'm connecting you with a member of our team who can help with this directly.";

/// Shared state for chat routes.
#[derive(Clone)]
pub struct ChatRouteState {
    pub orchestrator: Arc<Orchestrator>,
    pub triggers: EscalationTriggers,
    pub catalog: Arc<FlowCatalog>,
}

impl ChatRouteState {
    /// Whether the latest user message should go to a human. A known
    /// `flow_id` adds that flow's vertical triggers to the global list.
    fn should_escalate(&self, request: &ChatRequest) -> bool {
        let Some(last) = request.messages.iter().rev().find(|m| m.role == Role::User) else {
            return false;
        };
        match request
            .flow_id
            .as_deref()
            .and_then(|id| self.catalog.get(id).ok())
        {
            Some(flow) => self
                .triggers
                .merged_with(&flow.escalation_triggers)
                .matches(&last.content),
            None => self.triggers.matches(&last.content),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context: ClientContext,
    #[serde(default)]
    pub flow_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub stop_reason: Option<StopReason>,
    pub escalate: bool,
    /// Messages to append to the caller's history, in order.
    pub transcript: Vec<ChatMessage>,
}

fn error_response(err: OrchestratorError) -> Response {
    let (status, retryable) = match &err {
        OrchestratorError::EmptyConversation => (StatusCode::BAD_REQUEST, false),
        OrchestratorError::Llm(e) => {
            tracing::warn!(error = %e, "Model backend call failed");
            (StatusCode::BAD_GATEWAY, e.is_unavailable())
        }
    };
    (
        status,
        Json(serde_json::json!({"error": err.to_string(), "retryable": retryable})),
    )
        .into_response()
}

/// POST /api/chat
async fn chat(State(state): State<ChatRouteState>, Json(request): Json<ChatRequest>) -> Response {
    if state.should_escalate(&request) {
        tracing::info!(flow_id = ?request.flow_id, "Escalating conversation to a human");
        return Json(ChatResponse {
            content: HANDOFF_MESSAGE.to_string(),
            stop_reason: None,
            escalate: true,
            transcript: vec![ChatMessage::assistant(HANDOFF_MESSAGE)],
        })
        .into_response();
    }

    match state
        .orchestrator
        .respond(&request.messages, &request.context)
        .await
    {
        Ok(reply) => Json(ChatResponse {
            content: reply.turn.content,
            stop_reason: Some(reply.turn.stop_reason),
            escalate: false,
            transcript: reply.transcript,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/chat/stream
///
/// `delta` events carry text fragments in order, then a final `done`. A
/// backend failure mid-stream arrives as an `error` event.
async fn chat_stream(
    State(state): State<ChatRouteState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if state.should_escalate(&request) {
        let events = tokio_stream::iter([
            Ok::<Event, Infallible>(Event::default().event("escalate").data(HANDOFF_MESSAGE)),
            Ok(Event::default().event("done").data("")),
        ]);
        return Sse::new(events).into_response();
    }

    let fragments = match state
        .orchestrator
        .stream_turn(&request.messages, &request.context)
        .await
    {
        Ok(stream) => stream,
        Err(e) => return error_response(e),
    };

    let events = fragments
        .map(|item| {
            Ok::<Event, Infallible>(match item {
                Ok(text) => Event::default().event("delta").data(text),
                Err(e) => Event::default().event("error").data(e.to_string()),
            })
        })
        .chain(tokio_stream::once(Ok(Event::default().event("done").data(""))));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Build the chat routes.
pub fn chat_routes(state: ChatRouteState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
}
