//! HTTP application assembly.

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;

use crate::chat_routes::{ChatRouteState, chat_routes};
use crate::onboarding::{OnboardingRouteState, onboarding_routes};

/// All routes plus permissive CORS for the browser onboarding UI.
pub fn router(chat: ChatRouteState, onboarding: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(chat_routes(chat))
        .merge(onboarding_routes(onboarding))
        .layer(CorsLayer::permissive())
}
