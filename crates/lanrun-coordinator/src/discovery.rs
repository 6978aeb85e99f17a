//! UDP discovery responder.
//!
//! Answers every `DISCOVER_MASTER` datagram with a unicast
//! `MASTER_ANNOUNCE` to the sender. Holds no shared mutable state.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use lanrun_proto::discovery::MAX_DATAGRAM_LEN;
use lanrun_proto::DiscoveryMessage;

use crate::error::CoordinatorError;

/// Where sessions should be opened, as told to workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub host: String,
    pub port: u16,
}

impl Announce {
    fn to_message(&self) -> DiscoveryMessage {
        DiscoveryMessage::MasterAnnounce {
            coordinator_host: self.host.clone(),
            coordinator_port: self.port,
        }
    }
}

pub struct DiscoveryResponder {
    socket: Arc<UdpSocket>,
    announce: Announce,
}

impl DiscoveryResponder {
    pub async fn bind(addr: SocketAddr, announce: Announce) -> Result<Self, CoordinatorError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| CoordinatorError::Bind {
                what: "discovery responder",
                addr,
                source,
            })?;

        Ok(Self {
            socket: Arc::new(socket),
            announce,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn announce(&self) -> &Announce {
        &self.announce
    }

    /// Serve datagrams until the task is dropped.
    pub async fn run(self) {
        let reply = match self.announce.to_message().encode() {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "Failed to encode MASTER_ANNOUNCE");
                return;
            }
        };

        info!(
            addr = ?self.socket.local_addr().ok(),
            host = %self.announce.host,
            port = self.announce.port,
            "Discovery responder listening"
        );

        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "Failed to receive discovery datagram");
                    continue;
                }
            };

            match DiscoveryMessage::decode(&buf[..len]) {
                Ok(DiscoveryMessage::DiscoverMaster {
                    sender_id,
                    sender_port,
                }) => {
                    debug!(peer_id = %sender_id, sender_port, %src, "Discovery request");
                    if let Err(e) = self.socket.send_to(&reply, src).await {
                        warn!(%src, error = %e, "Failed to send MASTER_ANNOUNCE");
                    }
                }
                Ok(other) => {
                    warn!(%src, message = ?other, "Ignoring unexpected discovery message");
                }
                Err(e) => {
                    warn!(%src, error = %e, "Ignoring malformed discovery datagram");
                }
            }
        }
    }
}

/// Pick the host advertised in MASTER_ANNOUNCE.
///
/// Explicit configuration wins, then a concrete bind address, then the
/// address of the outbound interface, then loopback.
pub fn advertise_host(configured: Option<&str>, session_addr: SocketAddr) -> String {
    if let Some(host) = configured {
        return host.to_string();
    }
    if !session_addr.ip().is_unspecified() {
        return session_addr.ip().to_string();
    }
    detect_local_ip()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

/// Address of the interface that routes outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn detect_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
