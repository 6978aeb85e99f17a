//! Peer list handler.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;

use lanrun_core::{PeerAddr, PeerId, PeerStatus};

use crate::state::AppState;

/// One peer as reported by `/v1/peers`.
#[derive(Debug, Serialize)]
pub struct PeerResponse {
    pub peer_id: PeerId,
    /// `null` until the peer has registered.
    pub address: Option<PeerAddr>,
    pub status: PeerStatus,
    pub registered_at: String,
    pub last_seen_at: String,
    pub seconds_since_seen: i64,
}

/// List registered peers as JSON.
pub async fn list_peers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    let threshold = state.peer_timeout();

    let response: Vec<PeerResponse> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|peer| PeerResponse {
            status: peer.status(now, threshold),
            seconds_since_seen: now.signed_duration_since(peer.last_seen_at).num_seconds(),
            registered_at: peer.registered_at.to_rfc3339(),
            last_seen_at: peer.last_seen_at.to_rfc3339(),
            peer_id: peer.peer_id,
            address: peer.address,
        })
        .collect();

    Json(response)
}
