//! REST endpoints for onboarding progress and step submission.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::OnboardingError;
use crate::provisioning::Provisioner;
use crate::store::Database;

use super::flows::FlowCatalog;
use super::model::{FormData, Step};
use super::sequencer::{AdvanceOutcome, Sequencer};
use super::state::{AgentConfiguration, OnboardingProgress, SequencerState};

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub catalog: Arc<FlowCatalog>,
    pub db: Arc<dyn Database>,
    pub provisioner: Arc<dyn Provisioner>,
}

impl OnboardingRouteState {
    fn sequencer(&self, flow_id: &str) -> Result<Sequencer, OnboardingError> {
        let flow = self.catalog.get(flow_id)?;
        Ok(Sequencer::new(
            flow,
            self.db.clone(),
            self.provisioner.clone(),
        ))
    }
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    state: SequencerState,
    total_steps: usize,
    progress: OnboardingProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<&'a Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    configuration: Option<AgentConfiguration>,
}

#[derive(Serialize)]
struct FlowSummary<'a> {
    id: &'a str,
    vertical: &'a str,
    name: &'a str,
    steps: usize,
}

fn error_response(err: OnboardingError) -> Response {
    let status = match &err {
        OnboardingError::UnknownFlow(_) => StatusCode::NOT_FOUND,
        OnboardingError::StepMismatch { .. } | OnboardingError::ConcurrentUpdate { .. } => {
            StatusCode::CONFLICT
        }
        OnboardingError::FlowExhausted { .. }
        | OnboardingError::InvalidFlow { .. }
        | OnboardingError::Database(_) => {
            tracing::error!(error = %err, "Onboarding request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

/// GET /api/flows
async fn list_flows(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    let flows: Vec<FlowSummary> = state
        .catalog
        .iter()
        .map(|f| FlowSummary {
            id: &f.id,
            vertical: &f.vertical,
            name: &f.name,
            steps: f.len(),
        })
        .collect();
    Json(serde_json::json!({ "flows": flows }))
}

/// GET /api/onboarding/{flow_id}/{user_id}
///
/// Current progress with the step to display, or the configuration once
/// the flow is complete.
async fn get_status(
    State(state): State<OnboardingRouteState>,
    Path((flow_id, user_id)): Path<(String, String)>,
) -> Response {
    let result = async {
        let seq = state.sequencer(&flow_id)?;
        let progress = seq.load(&user_id).await?;
        let (step, configuration) = if progress.is_completed() {
            (None, seq.configuration(&user_id).await?)
        } else {
            (Some(seq.current_step(&progress)?.clone()), None)
        };
        Ok::<_, OnboardingError>((seq.flow().len(), progress, step, configuration))
    }
    .await;

    match result {
        Ok((total_steps, progress, step, configuration)) => Json(StatusResponse {
            state: progress.state(),
            total_steps,
            step: step.as_ref(),
            configuration,
            progress,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/onboarding/{flow_id}/{user_id}/steps/{step_id}
///
/// Body is the step's form data. 422 carries every field error at once.
async fn submit_step(
    State(state): State<OnboardingRouteState>,
    Path((flow_id, user_id, step_id)): Path<(String, String, String)>,
    Json(form): Json<FormData>,
) -> Response {
    let seq = match state.sequencer(&flow_id) {
        Ok(seq) => seq,
        Err(e) => return error_response(e),
    };

    match seq.submit(&user_id, &step_id, &form).await {
        Ok(outcome @ AdvanceOutcome::Invalid { .. }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(outcome)).into_response()
        }
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/onboarding/{flow_id}/{user_id}/back
///
/// The previous step's definition for redisplay. Progress is unchanged.
async fn go_back(
    State(state): State<OnboardingRouteState>,
    Path((flow_id, user_id)): Path<(String, String)>,
) -> Response {
    let seq = match state.sequencer(&flow_id) {
        Ok(seq) => seq,
        Err(e) => return error_response(e),
    };
    let progress = match seq.load(&user_id).await {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };

    match seq.back(&progress) {
        Some(step) => Json(serde_json::json!({ "step": step })).into_response(),
        None => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "No previous step"})),
        )
            .into_response(),
    }
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/flows", get(list_flows))
        .route("/api/onboarding/{flow_id}/{user_id}", get(get_status))
        .route(
            "/api/onboarding/{flow_id}/{user_id}/steps/{step_id}",
            post(submit_step),
        )
        .route("/api/onboarding/{flow_id}/{user_id}/back", post(go_back))
        .with_state(state)
}
