//! HTTP status surface for the coordinator.
//!
//! Provides endpoints for:
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)
//! - Peer list API (`/v1/peers`)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::CoordinatorError;
use crate::state::AppState;

mod handlers;

pub use handlers::PeerResponse;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/peers", get(handlers::list_peers))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the status listener.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, CoordinatorError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| CoordinatorError::Bind {
            what: "HTTP status server",
            addr,
            source,
        })
}

/// Serve the status surface on an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP status server listening");
    axum::serve(listener, create_router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use lanrun_core::{PeerAddr, PeerId};

    use crate::config::Config;

    async fn test_state(dir: &std::path::Path) -> Arc<AppState> {
        AppState::open(Config {
            tasks_dir: dir.join("tasks"),
            results_dir: dir.join("results"),
            ..Config::default()
        })
        .await
        .unwrap()
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(test_state(dir.path()).await, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_health_degraded_when_queue_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        std::fs::remove_dir(dir.path().join("tasks")).unwrap();

        let (status, body) = get(state, "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert!(body["reason"].as_str().unwrap().contains("Work queue"));
    }

    #[tokio::test]
    async fn test_list_peers() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let now = Utc::now();
        state
            .registry
            .register(PeerId::new("w1"), PeerAddr::new("10.0.0.5", 11000), now)
            .await;
        state.registry.heartbeat(&PeerId::new("w2"), now).await;

        let (status, body) = get(state, "/v1/peers").await;

        assert_eq!(status, StatusCode::OK);
        let peers = body.as_array().unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0]["peer_id"], "w1");
        assert_eq!(peers[0]["address"], serde_json::json!(["10.0.0.5", 11000]));
        assert_eq!(peers[0]["status"], "ALIVE");
        assert_eq!(peers[1]["peer_id"], "w2");
        assert!(peers[1]["address"].is_null());
    }

    #[tokio::test]
    async fn test_metrics_is_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let response = create_router(test_state(dir.path()).await)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("lanrun_queue_up 1"));
    }
}
