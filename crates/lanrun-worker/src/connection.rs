//! Session client for the coordinator.
//!
//! Every logical operation opens its own TCP connection, sends one request,
//! reads one response and closes. Connect, write and read are each bounded
//! by the I/O timeout so a stalled coordinator cannot hang a loop.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use lanrun_core::{PeerAddr, PeerId, ResultUnit, WorkUnit};
use lanrun_proto::{ProtoError, Request, Response, WorkerCodec};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to coordinator at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("Coordinator closed the connection without replying")]
    Closed,

    #[error("Expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Coordinator could not serve the request: {0}")]
    Rejected(String),
}

/// Outcome of REQUEST_TASK.
#[derive(Debug)]
pub enum TaskReply {
    Package(WorkUnit),
    Empty,
}

/// Talks to one coordinator on behalf of one peer.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    addr: SocketAddr,
    peer_id: PeerId,
    io_timeout: Duration,
    max_frame_len: usize,
}

impl CoordinatorClient {
    pub fn new(addr: SocketAddr, config: &Config) -> Self {
        Self {
            addr,
            peer_id: config.peer_id.clone(),
            io_timeout: config.io_timeout(),
            max_frame_len: config.max_frame_len,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn register(&self, address: PeerAddr) -> Result<(), ClientError> {
        let request = Request::Register {
            peer_id: self.peer_id.clone(),
            address,
        };
        match self.exchange(request).await? {
            Response::Registered => Ok(()),
            other => Err(unexpected("REGISTERED", &other)),
        }
    }

    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        let request = Request::Heartbeat {
            peer_id: self.peer_id.clone(),
        };
        match self.exchange(request).await? {
            Response::Alive => Ok(()),
            other => Err(unexpected("ALIVE", &other)),
        }
    }

    pub async fn request_task(&self) -> Result<TaskReply, ClientError> {
        let request = Request::RequestTask {
            peer_id: self.peer_id.clone(),
        };
        match self.exchange(request).await? {
            Response::TaskPackage { name, payload } => {
                Ok(TaskReply::Package(WorkUnit::new(name, payload.into_inner())))
            }
            Response::NoTask => Ok(TaskReply::Empty),
            other => Err(unexpected("TASK_PACKAGE or NO_TASK", &other)),
        }
    }

    pub async fn submit_result(&self, result: ResultUnit) -> Result<(), ClientError> {
        let request = Request::submit_result(self.peer_id.clone(), result);
        match self.exchange(request).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected("OK", &other)),
        }
    }

    /// One connection, one request, one response.
    async fn exchange(&self, request: Request) -> Result<Response, ClientError> {
        let action = request.action();

        let stream = timeout(self.io_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ClientError::Timeout("connect"))?
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;

        let mut framed = Framed::new(stream, WorkerCodec::with_max_frame_len(self.max_frame_len));

        timeout(self.io_timeout, framed.send(request))
            .await
            .map_err(|_| ClientError::Timeout("write"))??;

        let response = timeout(self.io_timeout, framed.next())
            .await
            .map_err(|_| ClientError::Timeout("read"))?
            .ok_or(ClientError::Closed)??;

        debug!(action, response = response.kind(), "Exchange complete");

        match response {
            Response::Error { reason } => Err(ClientError::Rejected(reason)),
            response => Ok(response),
        }
    }
}

fn unexpected(expected: &'static str, got: &Response) -> ClientError {
    ClientError::UnexpectedResponse {
        expected,
        got: got.kind(),
    }
}

/// Address advertised in REGISTER: the local interface that routes to the
/// coordinator, with the configured peer port.
pub fn advertised_address(coordinator: SocketAddr, peer_port: u16) -> PeerAddr {
    let local_ip = std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect(coordinator)?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    PeerAddr::new(local_ip.to_string(), peer_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    use lanrun_proto::CoordinatorCodec;

    fn client_for(addr: SocketAddr) -> CoordinatorClient {
        let config = Config {
            peer_id: PeerId::new("w1"),
            io_timeout_secs: 1,
            ..Config::default()
        };
        CoordinatorClient::new(addr, &config)
    }

    /// Accept one connection and answer its request with `response`.
    async fn answer_once(response: Response) -> (SocketAddr, tokio::task::JoinHandle<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, CoordinatorCodec::new());
            let request = framed.next().await.unwrap().unwrap();
            framed.send(response).await.unwrap();
            request
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_request_task_package_and_empty() {
        let (addr, server) = answer_once(Response::from(WorkUnit::new("a.zip", vec![7]))).await;
        match client_for(addr).request_task().await.unwrap() {
            TaskReply::Package(unit) => {
                assert_eq!(unit.name, "a.zip");
                assert_eq!(unit.payload, vec![7]);
            }
            TaskReply::Empty => panic!("expected a package"),
        }
        assert_eq!(
            server.await.unwrap(),
            Request::RequestTask {
                peer_id: PeerId::new("w1")
            }
        );

        let (addr, _server) = answer_once(Response::NoTask).await;
        assert!(matches!(
            client_for(addr).request_task().await.unwrap(),
            TaskReply::Empty
        ));
    }

    #[tokio::test]
    async fn test_error_reply_is_rejected() {
        let (addr, _server) = answer_once(Response::Error {
            reason: "disk full".to_string(),
        })
        .await;
        let result = client_for(addr).request_task().await;
        assert!(matches!(result, Err(ClientError::Rejected(reason)) if reason == "disk full"));
    }

    #[tokio::test]
    async fn test_wrong_reply_is_unexpected() {
        let (addr, _server) = answer_once(Response::NoTask).await;
        let result = client_for(addr).heartbeat().await;
        assert!(matches!(
            result,
            Err(ClientError::UnexpectedResponse {
                expected: "ALIVE",
                got: "NO_TASK"
            })
        ));
    }

    #[tokio::test]
    async fn test_silent_coordinator_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let result = client_for(addr).heartbeat().await;
        assert!(matches!(result, Err(ClientError::Timeout("read"))));
    }

    #[tokio::test]
    async fn test_nobody_listening_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = client_for(addr).heartbeat().await;
        assert!(matches!(result, Err(ClientError::Connect { .. })));
    }

    #[test]
    fn test_advertised_address_uses_peer_port() {
        let addr = advertised_address("127.0.0.1:10000".parse().unwrap(), 11000);
        assert_eq!(addr, PeerAddr::new("127.0.0.1", 11000));
    }
}
