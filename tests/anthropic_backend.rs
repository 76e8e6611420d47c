//! Integration tests for the Anthropic backend + orchestrator.
//!
//! Each test spins up an Axum server on a random port that plays the part of
//! the Messages API, then drives the rig-backed provider against it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use agent_factory::error::{LlmError, OrchestratorError, ToolError};
use agent_factory::llm::{ChatMessage, LlmBackend, LlmConfig, LlmProvider, StopReason, create_provider};
use agent_factory::orchestrator::Orchestrator;
use agent_factory::template::ClientContext;
use agent_factory::tools::{Tool, ToolRegistry};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests the fake backend has received: (headers, body).
type Seen = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

/// Start a fake backend on a random port, return its base URL.
async fn start_backend(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://127.0.0.1:{port}")
}

fn provider(base_url: &str, request_timeout: Duration) -> Arc<dyn LlmProvider> {
    create_provider(&LlmConfig {
        backend: LlmBackend::Anthropic,
        api_key: SecretString::from("sk-test".to_string()),
        model: "claude-test".to_string(),
        base_url: base_url.to_string(),
        max_tokens: 256,
        timeout: request_timeout,
    })
    .unwrap()
}

/// A complete Messages API response body.
fn message(content: Value, stop_reason: &str, input_tokens: u64, output_tokens: u64) -> Value {
    json!({
        "id": "msg_1",
        "type": "message",
        "role": "assistant",
        "model": "claude-test",
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens}
    })
}

struct LookupTool;

#[async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        "lookup"
    }
    fn description(&self) -> &str {
        "Look up an appointment by id"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]})
    }
    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        Ok(json!({"id": params["id"], "status": "confirmed"}))
    }
}

async fn orchestrator(llm: Arc<dyn LlmProvider>, template: &str) -> Orchestrator {
    let tools = Arc::new(ToolRegistry::new());
    tools.register(Arc::new(LookupTool)).await;
    Orchestrator::new(llm, tools, template)
}

fn record(seen: &Seen, headers: HeaderMap, body: Value) {
    seen.lock().unwrap().push((headers, body));
}

// ── Non-streaming ──────────────────────────────────────────────────

async fn tool_use_handler(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(&seen, headers, body);
    Json(message(
        json!([
            {"type": "text", "text": "Let me check that."},
            {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"id": "42"}}
        ]),
        "tool_use",
        30,
        12,
    ))
}

#[tokio::test]
async fn tool_use_response_is_reported_not_executed() {
    timeout(TEST_TIMEOUT, async {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/v1/messages", post(tool_use_handler))
            .with_state(seen.clone());
        let base = start_backend(app).await;

        let orch = orchestrator(
            provider(&base, Duration::from_secs(2)),
            "You are {{AGENT_NAME}} at {{COMPANY_NAME}}. Markup: {{markup_percentage}}",
        )
        .await;
        let context = ClientContext::new()
            .with("AGENT_NAME", "Ava")
            .with("COMPANY_NAME", "Acme Auto");
        let history = vec![ChatMessage::user("Is appointment 42 still on?")];

        let turn = orch.generate_turn(&history, &context).await.unwrap();
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "lookup");
        assert_eq!(turn.tool_calls[0].input, json!({"id": "42"}));
        assert_eq!(turn.content, "Let me check that.");
        assert_eq!(turn.usage.total(), 42);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "tool must not trigger a second call");
        let (headers, body) = &seen[0];
        assert_eq!(headers["x-api-key"], "sk-test");
        assert_eq!(body["model"], "claude-test");
        let sent = body.to_string();
        assert!(sent.contains("You are Ava at Acme Auto. Markup: {{markup_percentage}}"));
        assert!(sent.contains("\"lookup\""));
        assert!(sent.contains("Is appointment 42 still on?"));
        assert_ne!(body["stream"], true);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn plain_reply_is_single_backend_call() {
    timeout(TEST_TIMEOUT, async {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/v1/messages",
                post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    record(&seen, headers, body);
                    Json(message(
                        json!([{"type": "text", "text": "Yes, 42 is confirmed."}]),
                        "end_turn",
                        50,
                        8,
                    ))
                }),
            )
            .with_state(seen.clone());
        let base = start_backend(app).await;

        let orch = orchestrator(provider(&base, Duration::from_secs(2)), "Be helpful.").await;
        let history = vec![ChatMessage::user("Is appointment 42 still on?")];
        let reply = orch.respond(&history, &ClientContext::new()).await.unwrap();
        assert_eq!(reply.turn.content, "Yes, 42 is confirmed.");
        assert_eq!(reply.turn.stop_reason, StopReason::EndTurn);

        // No tool was requested, so only one backend call.
        assert_eq!(seen.lock().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn tool_results_go_back_on_the_wire() {
    timeout(TEST_TIMEOUT, async {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/v1/messages",
                post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    let first = seen.lock().unwrap().is_empty();
                    record(&seen, headers, body);
                    if first {
                        Json(message(
                            json!([{"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"id": "42"}}]),
                            "tool_use",
                            30,
                            12,
                        ))
                    } else {
                        Json(message(
                            json!([{"type": "text", "text": "Appointment 42 is confirmed."}]),
                            "end_turn",
                            60,
                            9,
                        ))
                    }
                }),
            )
            .with_state(seen.clone());
        let base = start_backend(app).await;

        let orch = orchestrator(provider(&base, Duration::from_secs(2)), "Be helpful.").await;
        let reply = orch
            .respond(&[ChatMessage::user("Is 42 on?")], &ClientContext::new())
            .await
            .unwrap();
        assert_eq!(reply.turn.content, "Appointment 42 is confirmed.");
        assert_eq!(reply.transcript.len(), 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let followup = seen[1].1.to_string();
        assert!(followup.contains("tool_result"));
        assert!(followup.contains("toolu_1"));
        assert!(followup.contains("confirmed"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn timeout_is_backend_unavailable() {
    timeout(TEST_TIMEOUT, async {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(message(json!([]), "end_turn", 1, 1))
            }),
        );
        let base = start_backend(app).await;

        let orch = orchestrator(provider(&base, Duration::from_millis(200)), "Be helpful.").await;
        let history = vec![ChatMessage::user("hello")];
        let err = orch
            .generate_turn(&history, &ClientContext::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Llm(LlmError::BackendUnavailable { .. })
        ));
        assert_eq!(history.len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn server_errors_and_rejections_are_distinguished() {
    timeout(TEST_TIMEOUT, async {
        let app = Router::new()
            .route(
                "/overloaded/v1/messages",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
            )
            .route(
                "/bad/v1/messages",
                post(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({
                            "type": "error",
                            "error": {"type": "invalid_request_error", "message": "messages: field required"}
                        })),
                    )
                }),
            )
            .route(
                "/garbage/v1/messages",
                post(|| async { "this is not json" }),
            );
        let base = start_backend(app).await;
        let history = vec![ChatMessage::user("hello")];

        let orch = orchestrator(
            provider(&format!("{base}/overloaded"), Duration::from_secs(2)),
            "x",
        )
        .await;
        let err = orch.generate_turn(&history, &ClientContext::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Llm(ref e) if e.is_unavailable()));

        let orch = orchestrator(provider(&format!("{base}/bad"), Duration::from_secs(2)), "x").await;
        let err = orch.generate_turn(&history, &ClientContext::new()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Llm(LlmError::Rejected { .. })));

        let orch =
            orchestrator(provider(&format!("{base}/garbage"), Duration::from_secs(2)), "x").await;
        let err = orch.generate_turn(&history, &ClientContext::new()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Llm(LlmError::InvalidResponse { .. } | LlmError::BackendUnavailable { .. })
        ));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_backend_is_unavailable() {
    let orch = orchestrator(
        provider("http://127.0.0.1:1", Duration::from_secs(1)),
        "x",
    )
    .await;
    let err = orch
        .generate_turn(&[ChatMessage::user("hello")], &ClientContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Llm(ref e) if e.is_unavailable()));
}

// ── Streaming ──────────────────────────────────────────────────────

fn sse_frame(event: &str, data: Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

fn text_delta(text: &str) -> String {
    sse_frame(
        "content_block_delta",
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "text_delta", "text": text}}),
    )
}

/// Frames that open a streamed text reply.
fn stream_preamble() -> String {
    let mut out = sse_frame(
        "message_start",
        json!({"type": "message_start", "message": {
            "id": "msg_1", "type": "message", "role": "assistant", "model": "claude-test",
            "content": [], "stop_reason": null, "stop_sequence": null,
            "usage": {"input_tokens": 10, "output_tokens": 1}
        }}),
    );
    out.push_str(&sse_frame(
        "content_block_start",
        json!({"type": "content_block_start", "index": 0,
               "content_block": {"type": "text", "text": ""}}),
    ));
    out.push_str(&sse_frame("ping", json!({"type": "ping"})));
    out
}

/// Frames that close a streamed text reply.
fn stream_epilogue() -> String {
    let mut out = sse_frame(
        "content_block_stop",
        json!({"type": "content_block_stop", "index": 0}),
    );
    out.push_str(&sse_frame(
        "message_delta",
        json!({"type": "message_delta",
               "delta": {"stop_reason": "end_turn", "stop_sequence": null},
               "usage": {"output_tokens": 3}}),
    ));
    out.push_str(&sse_frame("message_stop", json!({"type": "message_stop"})));
    out
}

async fn streaming_handler(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record(&seen, headers, body);
    let mut out = stream_preamble();
    out.push_str(&text_delta("Hello"));
    out.push_str(&text_delta(", "));
    out.push_str(&text_delta("world"));
    out.push_str(&stream_epilogue());
    ([(header::CONTENT_TYPE, "text/event-stream")], out).into_response()
}

#[tokio::test]
async fn stream_yields_fragments_in_order() {
    timeout(TEST_TIMEOUT, async {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/v1/messages", post(streaming_handler))
            .with_state(seen.clone());
        let base = start_backend(app).await;

        let orch = orchestrator(provider(&base, Duration::from_secs(2)), "Be helpful.").await;
        let mut stream = orch
            .stream_turn(&[ChatMessage::user("greet me")], &ClientContext::new())
            .await
            .unwrap();

        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next().await {
            fragments.push(fragment.unwrap());
        }
        assert_eq!(fragments, ["Hello", ", ", "world"]);
        // Exhausted streams stay exhausted.
        assert!(stream.next().await.is_none());

        assert_eq!(seen.lock().unwrap()[0].1["stream"], true);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn connection_lost_mid_stream_surfaces_as_unavailable() {
    timeout(TEST_TIMEOUT, async {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async {
                let frames = vec![
                    Ok(stream_preamble()),
                    Ok(text_delta("partial")),
                    Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "backend went away")),
                ];
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    axum::body::Body::from_stream(futures::stream::iter(frames)),
                )
            }),
        );
        let base = start_backend(app).await;

        let orch = orchestrator(provider(&base, Duration::from_secs(2)), "x").await;
        let stream = orch
            .stream_turn(&[ChatMessage::user("hi")], &ClientContext::new())
            .await
            .unwrap();
        let err = stream.collect_text().await.unwrap_err();
        assert!(err.is_unavailable(), "{err}");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn dropping_stream_early_is_clean() {
    timeout(TEST_TIMEOUT, async {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async {
                let frames = std::iter::once(stream_preamble())
                    .chain((0..1000).map(|i| text_delta(&format!("chunk{i} "))))
                    .map(Ok::<_, std::convert::Infallible>);
                let body = futures::stream::iter(frames);
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    axum::body::Body::from_stream(body),
                )
            }),
        );
        let base = start_backend(app).await;

        let orch = orchestrator(provider(&base, Duration::from_secs(2)), "x").await;
        let mut stream = orch
            .stream_turn(&[ChatMessage::user("count")], &ClientContext::new())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "chunk0 ");
        drop(stream);

        // The backend keeps serving new requests after the abandoned one.
        let mut again = orch
            .stream_turn(&[ChatMessage::user("count")], &ClientContext::new())
            .await
            .unwrap();
        assert_eq!(again.next().await.unwrap().unwrap(), "chunk0 ");
    })
    .await
    .expect("test timed out");
}
