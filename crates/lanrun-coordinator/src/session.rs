//! Per-connection session handling.
//!
//! A session reads one framed request, dispatches it, writes exactly one
//! response and goes back to waiting. It ends when the peer hangs up, a
//! frame cannot be decoded, a request violates the schema, or the peer
//! stays silent past the idle timeout.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use lanrun_core::{validate_peer_id, validate_unit_name, CoreError, PeerId, ResultUnit};
use lanrun_proto::{CoordinatorCodec, Request, Response};

use crate::results::StoreError;
use crate::state::{AppState, Counters};

/// Requests that must not be answered; the connection is closed instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Schema violation: {0}")]
    Invalid(#[from] CoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingMessage,
    Dispatching,
    Responded,
    Closed,
}

/// Private state of one connection.
#[derive(Debug)]
pub struct Session {
    remote: SocketAddr,
    peer_id: Option<PeerId>,
    state: SessionState,
}

impl Session {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            peer_id: None,
            state: SessionState::AwaitingMessage,
        }
    }

    /// Last peer id seen on this connection.
    pub fn peer_id(&self) -> Option<&PeerId> {
        self.peer_id.as_ref()
    }

    fn transition(&mut self, next: SessionState) {
        trace!(remote = %self.remote, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    fn identify(&mut self, peer_id: &PeerId) -> Result<(), CoreError> {
        validate_peer_id(peer_id)?;
        if self.peer_id.as_ref() != Some(peer_id) {
            self.peer_id = Some(peer_id.clone());
        }
        Ok(())
    }
}

/// Drive one accepted connection to completion.
pub async fn handle_connection(state: Arc<AppState>, stream: TcpStream, remote: SocketAddr) {
    let idle = state.config.session_idle_timeout();
    let codec = CoordinatorCodec::with_max_frame_len(state.config.max_frame_len);
    let mut framed = Framed::new(stream, codec);
    let mut session = Session::new(remote);

    debug!(%remote, "Session opened");

    loop {
        let request = match timeout(idle, framed.next()).await {
            Err(_) => {
                debug!(%remote, "Session idle timeout");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                warn!(%remote, error = %e, "Failed to decode request, closing session");
                Counters::incr(&state.counters.protocol_errors);
                break;
            }
            Ok(Some(Ok(request))) => request,
        };

        session.transition(SessionState::Dispatching);
        let action = request.action();

        let response = match dispatch(&state, &mut session, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%remote, action, error = %e, "Rejected request, closing session");
                Counters::incr(&state.counters.protocol_errors);
                break;
            }
        };

        let claimed = match &response {
            Response::TaskPackage { name, .. } => Some(name.clone()),
            _ => None,
        };
        let kind = response.kind();

        let sent = match timeout(idle, framed.send(response)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(%remote, action, error = %e, "Failed to write response");
                false
            }
            Err(_) => {
                warn!(%remote, action, "Timed out writing response");
                false
            }
        };

        if !sent {
            if let Some(name) = claimed {
                state.queue.release(&name).await;
            }
            break;
        }

        trace!(%remote, action, response = kind, "Request served");
        session.transition(SessionState::Responded);
        session.transition(SessionState::AwaitingMessage);
    }

    session.transition(SessionState::Closed);
    debug!(%remote, peer_id = ?session.peer_id(), "Session closed");
}

/// Apply one request to the shared state and build its response.
///
/// Store failures become `Response::Error` so the worker can tell them
/// apart from an empty queue. Only schema violations are returned as errors.
pub async fn dispatch(
    state: &AppState,
    session: &mut Session,
    request: Request,
) -> Result<Response, SessionError> {
    let now = Utc::now();
    if let Some(peer_id) = request.peer_id() {
        session.identify(peer_id)?;
    }

    match request {
        Request::Register { peer_id, address } => {
            state.registry.register(peer_id, address, now).await;
            Ok(Response::Registered)
        }

        Request::Heartbeat { peer_id } => {
            state.registry.heartbeat(&peer_id, now).await;
            trace!(peer_id = %peer_id, "Heartbeat");
            Ok(Response::Alive)
        }

        Request::RequestTask { peer_id } => {
            match state.queue.claim_one(&peer_id).await {
                Ok(Some(unit)) => {
                    Counters::incr(&state.counters.units_claimed);
                    info!(
                        peer_id = %peer_id,
                        unit = %unit.name,
                        bytes = unit.payload.len(),
                        "Work unit assigned"
                    );
                    Ok(Response::from(unit))
                }
                Ok(None) => {
                    Counters::incr(&state.counters.no_task_replies);
                    debug!(peer_id = %peer_id, "No work pending");
                    Ok(Response::NoTask)
                }
                Err(e) => Ok(resource_error(&e)),
            }
        }

        Request::SubmitResult {
            peer_id,
            name,
            payload,
        } => {
            validate_unit_name(&name)?;

            let result = ResultUnit::new(name, payload.into_inner());
            match state.results.save(&result).await {
                Ok(_) => {}
                Err(StoreError::InvalidName(e)) => return Err(e.into()),
                Err(e) => return Ok(resource_error(&e)),
            }
            Counters::incr(&state.counters.results_stored);
            info!(
                peer_id = ?peer_id.as_ref().map(PeerId::as_str),
                unit = %result.name,
                bytes = result.payload.len(),
                "Result stored"
            );

            // Result is already durable. A unit that fails to retire is redelivered.
            if let Err(e) = state.queue.complete(&result.name, peer_id.as_ref()).await {
                warn!(unit = %result.name, error = %e, "Failed to retire completed work unit");
            }
            Ok(Response::Ok)
        }
    }
}

fn resource_error(e: &(dyn std::error::Error + 'static)) -> Response {
    error!(error = %e, "Store operation failed");
    Response::Error {
        reason: e.to_string(),
    }
}
