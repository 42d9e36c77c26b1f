use axum::{routing::get, routing::post, Router};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod content;
pub mod health;
pub mod metrics;

/// Room for JSON framing and escaping around the largest accepted payload.
const BODY_OVERHEAD_BYTES: usize = 4096;

/// Submission, lookup and health routes.
pub fn api_router(state: AppState) -> Router {
    let body_limit = state.ingress.limits().max_payload_bytes * 2 + BODY_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/content", post(content::submit_content))
        .route("/api/v1/content/{content_id}", get(content::get_content))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
