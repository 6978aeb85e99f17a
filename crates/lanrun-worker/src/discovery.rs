//! Coordinator discovery over UDP broadcast.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use lanrun_proto::discovery::MAX_DATAGRAM_LEN;
use lanrun_proto::{DiscoveryMessage, ProtoError};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Discovery socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode discovery query: {0}")]
    Encode(#[from] ProtoError),

    #[error("No coordinator answered within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Announced coordinator {host}:{port} does not resolve")]
    Unresolvable { host: String, port: u16 },
}

/// Broadcast `DISCOVER_MASTER` and wait for the first `MASTER_ANNOUNCE`.
///
/// Datagrams that are not an announce are ignored until the timeout.
pub async fn discover(config: &Config) -> Result<SocketAddr, DiscoveryError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let query = DiscoveryMessage::DiscoverMaster {
        sender_id: config.peer_id.clone(),
        sender_port: config.peer_port,
    }
    .encode()?;

    let target = config.discovery_addr();
    socket.send_to(&query, target).await?;
    debug!(%target, "Sent DISCOVER_MASTER");

    let deadline = Instant::now() + config.discovery_timeout();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

    loop {
        let (len, src) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => return Err(DiscoveryError::Timeout(config.discovery_timeout())),
        };

        match DiscoveryMessage::decode(&buf[..len]) {
            Ok(DiscoveryMessage::MasterAnnounce {
                coordinator_host,
                coordinator_port,
            }) => {
                let addr = resolve(&coordinator_host, coordinator_port).await?;
                info!(%addr, %src, "Coordinator found");
                return Ok(addr);
            }
            Ok(other) => debug!(%src, message = ?other, "Ignoring discovery message"),
            Err(e) => debug!(%src, error = %e, "Ignoring malformed datagram"),
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, DiscoveryError> {
    let unresolvable = || DiscoveryError::Unresolvable {
        host: host.to_string(),
        port,
    };

    lookup_host((host, port))
        .await
        .map_err(|_| unresolvable())?
        .next()
        .ok_or_else(unresolvable)
}
