//! Peer records kept by the coordinator.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{PeerId, PeerStatus};

/// Address a worker advertises for itself.
///
/// On the wire this is the two-element array `[host, port]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<(String, u16)> for PeerAddr {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl From<PeerAddr> for (String, u16) {
    fn from(addr: PeerAddr) -> Self {
        (addr.host, addr.port)
    }
}

impl From<std::net::SocketAddr> for PeerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything the coordinator knows about one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Worker-generated identity.
    pub peer_id: PeerId,

    /// Address from the last REGISTER. `None` for a peer only known from
    /// heartbeats.
    pub address: Option<PeerAddr>,

    /// When the peer first registered.
    pub registered_at: DateTime<Utc>,

    /// Last REGISTER or HEARTBEAT.
    pub last_seen_at: DateTime<Utc>,
}

impl PeerRecord {
    /// Create a new record, seen for the first time at `now`.
    pub fn new(peer_id: PeerId, address: PeerAddr, now: DateTime<Utc>) -> Self {
        Self {
            peer_id,
            address: Some(address),
            registered_at: now,
            last_seen_at: now,
        }
    }

    /// Record for a peer that has not told us where it listens.
    pub fn without_address(peer_id: PeerId, now: DateTime<Utc>) -> Self {
        Self {
            peer_id,
            address: None,
            registered_at: now,
            last_seen_at: now,
        }
    }

    /// Record activity at `now`.
    ///
    /// `last_seen_at` never moves backwards, even if clocks or callers do.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen_at {
            self.last_seen_at = now;
        }
    }

    /// True when nothing has been heard for longer than `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_seen_at) > threshold
    }

    /// Liveness classification at `now`.
    pub fn status(&self, now: DateTime<Utc>, threshold: Duration) -> PeerStatus {
        if self.is_stale(now, threshold) {
            PeerStatus::Stale
        } else {
            PeerStatus::Alive
        }
    }
}
