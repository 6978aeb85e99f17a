//! Liveness status for peers.

use serde::{Deserialize, Serialize};

/// Liveness of a registered peer as seen by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerStatus {
    /// Heard from within the liveness threshold.
    #[default]
    Alive,
    /// Silent for longer than the threshold; eligible for eviction.
    Stale,
}

impl PeerStatus {
    /// Lowercase label used in metrics output.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Stale => "stale",
        }
    }
}
