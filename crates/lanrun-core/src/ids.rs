//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::CoreError;

/// Longest peer id the coordinator will accept.
pub const MAX_PEER_ID_LEN: usize = 128;

/// Identity a worker presents on every connection.
///
/// Workers generate it once at startup; it is the only thing that ties
/// independent TCP connections back to the same peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new PeerId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new random PeerId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Validate that a peer id is safe to key the registry with.
///
/// Ids end up in log lines and metrics labels, so only a conservative
/// character set is allowed.
pub fn validate_peer_id(peer_id: &PeerId) -> Result<(), CoreError> {
    let id_str = peer_id.as_str();

    if id_str.is_empty() {
        return Err(CoreError::InvalidPeerId {
            id: id_str.to_string(),
            reason: "peer_id cannot be empty",
        });
    }

    if id_str.len() > MAX_PEER_ID_LEN {
        return Err(CoreError::InvalidPeerId {
            id: id_str.chars().take(32).collect(),
            reason: "peer_id is too long",
        });
    }

    if !id_str
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::InvalidPeerId {
            id: id_str.to_string(),
            reason: "peer_id must contain only alphanumeric characters, '-', '_' and '.'",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_generate() {
        let id1 = PeerId::generate();
        let id2 = PeerId::generate();
        assert_ne!(id1, id2);
        assert!(validate_peer_id(&id1).is_ok());
    }

    #[test]
    fn test_id_display() {
        let id = PeerId::new("w1");
        assert_eq!(format!("{}", id), "w1");
    }

    #[test]
    fn test_peer_id_is_a_plain_json_string() {
        let id = PeerId::new("w1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"w1\"");
    }

    #[test]
    fn test_valid_peer_ids() {
        assert!(validate_peer_id(&PeerId::new("w1")).is_ok());
        assert!(validate_peer_id(&PeerId::new("worker_123")).is_ok());
        assert!(validate_peer_id(&PeerId::new("lab-host.7")).is_ok());
    }

    #[test]
    fn test_invalid_peer_ids() {
        // Empty
        assert!(validate_peer_id(&PeerId::new("")).is_err());

        // Special characters
        assert!(validate_peer_id(&PeerId::new("worker:1")).is_err());
        assert!(validate_peer_id(&PeerId::new("worker/path")).is_err());
        assert!(validate_peer_id(&PeerId::new("a b")).is_err());

        // Too long
        let long = "x".repeat(MAX_PEER_ID_LEN + 1);
        assert!(validate_peer_id(&PeerId::new(long)).is_err());
    }
}
