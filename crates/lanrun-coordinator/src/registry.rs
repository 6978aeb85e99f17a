//! Peer registry - who is out there and when we last heard from them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use lanrun_core::{PeerAddr, PeerId, PeerRecord};

/// Concurrent map of `PeerId -> PeerRecord`.
///
/// Every session handler shares one registry; REGISTER and HEARTBEAT from
/// different workers may land at the same time.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer. Returns true when the peer was not known.
    ///
    /// Re-registration keeps `registered_at` and takes the new address.
    pub async fn register(&self, peer_id: PeerId, address: PeerAddr, now: DateTime<Utc>) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(&peer_id) {
            Some(record) => {
                record.address = Some(address);
                record.touch(now);
                debug!(peer_id = %peer_id, "Peer re-registered");
                false
            }
            None => {
                info!(peer_id = %peer_id, address = %address, "Peer registered");
                peers.insert(peer_id.clone(), PeerRecord::new(peer_id, address, now));
                true
            }
        }
    }

    /// Refresh `last_seen_at`.
    ///
    /// A peer we do not know (never registered, or evicted while it was
    /// unreachable) is added back without an address; its next REGISTER
    /// fills it in. Returns true when the peer was added.
    pub async fn heartbeat(&self, peer_id: &PeerId, now: DateTime<Utc>) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(peer_id) {
            Some(record) => {
                record.touch(now);
                false
            }
            None => {
                info!(peer_id = %peer_id, "Heartbeat from unknown peer, adding it");
                peers.insert(
                    peer_id.clone(),
                    PeerRecord::without_address(peer_id.clone(), now),
                );
                true
            }
        }
    }

    pub async fn get(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// All records, ordered by peer id.
    pub async fn list(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        records
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Evict every peer silent for longer than `threshold`.
    pub async fn reap_stale(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<PeerId> {
        let mut peers = self.peers.write().await;
        let mut evicted = Vec::new();

        peers.retain(|peer_id, record| {
            if record.is_stale(now, threshold) {
                evicted.push(peer_id.clone());
                false
            } else {
                true
            }
        });

        evicted.sort();
        evicted
    }
}
