//! Discovery datagrams.
//!
//! A worker broadcasts `DISCOVER_MASTER`; the coordinator answers the
//! sender directly with `MASTER_ANNOUNCE`. Each message is one JSON
//! document in one UDP datagram.

use serde::{Deserialize, Serialize};

use lanrun_core::PeerId;

use crate::ProtoError;

/// Largest discovery datagram either side reads.
pub const MAX_DATAGRAM_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryMessage {
    /// Broadcast query from a worker looking for the coordinator.
    DiscoverMaster { sender_id: PeerId, sender_port: u16 },

    /// Unicast reply telling the worker where to open sessions.
    MasterAnnounce {
        coordinator_host: String,
        coordinator_port: u16,
    },
}

impl DiscoveryMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, ProtoError> {
        Ok(serde_json::from_slice(datagram)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_wire_shape() {
        let msg = DiscoveryMessage::DiscoverMaster {
            sender_id: PeerId::new("w1"),
            sender_port: 11000,
        };
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"action": "DISCOVER_MASTER", "sender_id": "w1", "sender_port": 11000})
        );
    }

    #[test]
    fn test_announce_decodes() {
        let msg = DiscoveryMessage::decode(
            br#"{"action":"MASTER_ANNOUNCE","coordinator_host":"10.0.0.1","coordinator_port":10000}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            DiscoveryMessage::MasterAnnounce {
                coordinator_host: "10.0.0.1".to_string(),
                coordinator_port: 10000,
            }
        );
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(DiscoveryMessage::decode(b"\xff\x00hello").is_err());
        assert!(DiscoveryMessage::decode(br#"{"action":"PING"}"#).is_err());
    }
}
