//! Health and metrics handlers.

use std::sync::Arc;

use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse, Json};

use crate::state::AppState;

/// Health check endpoint.
///
/// Reports 503 when the work queue store cannot be read.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.queue.stats().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "degraded", "reason": e.to_string() })),
        ),
    }
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = crate::metrics::collect_metrics(&state).await;
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
