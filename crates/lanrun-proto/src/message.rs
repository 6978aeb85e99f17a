//! Session messages exchanged over one TCP connection.
//!
//! Requests are tagged by `action`. Responses keep the two shapes workers
//! already expect: acknowledgements carry a `status`, task replies carry
//! an `action`.

use serde::{Deserialize, Serialize};

use lanrun_core::{PeerAddr, PeerId, ResultUnit, WorkUnit};

use crate::Payload;

/// Message sent by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Announce (or re-announce) a worker and the address it can be reached at.
    Register { peer_id: PeerId, address: PeerAddr },

    /// Liveness signal.
    Heartbeat { peer_id: PeerId },

    /// Ask for one pending work unit.
    RequestTask { peer_id: PeerId },

    /// Hand back the result of a work unit.
    SubmitResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
        name: String,
        payload: Payload,
    },
}

impl Request {
    /// Build a SUBMIT_RESULT from a produced result.
    pub fn submit_result(peer_id: PeerId, result: ResultUnit) -> Self {
        Self::SubmitResult {
            peer_id: Some(peer_id),
            name: result.name,
            payload: Payload(result.payload),
        }
    }

    /// Wire name of the action, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Register { .. } => "REGISTER",
            Self::Heartbeat { .. } => "HEARTBEAT",
            Self::RequestTask { .. } => "REQUEST_TASK",
            Self::SubmitResult { .. } => "SUBMIT_RESULT",
        }
    }

    /// Peer the request claims to come from, if it names one.
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Self::Register { peer_id, .. }
            | Self::Heartbeat { peer_id }
            | Self::RequestTask { peer_id } => Some(peer_id),
            Self::SubmitResult { peer_id, .. } => peer_id.as_ref(),
        }
    }
}

/// Message sent by the coordinator, exactly one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireResponse", into = "WireResponse")]
pub enum Response {
    /// REGISTER accepted.
    Registered,
    /// HEARTBEAT accepted.
    Alive,
    /// A work unit was claimed for the requester.
    TaskPackage { name: String, payload: Payload },
    /// Nothing pending right now.
    NoTask,
    /// SUBMIT_RESULT persisted.
    Ok,
    /// The coordinator could not serve the request (store unreachable, disk full).
    Error { reason: String },
}

impl Response {
    /// Wire name of the reply, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Alive => "ALIVE",
            Self::TaskPackage { .. } => "TASK_PACKAGE",
            Self::NoTask => "NO_TASK",
            Self::Ok => "OK",
            Self::Error { .. } => "ERROR",
        }
    }
}

impl From<WorkUnit> for Response {
    fn from(unit: WorkUnit) -> Self {
        Self::TaskPackage {
            name: unit.name,
            payload: Payload(unit.payload),
        }
    }
}

// ============================================================================
// Wire representation
// ============================================================================

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
enum StatusReply {
    Registered,
    Alive,
    Ok,
    Error { reason: String },
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
enum ActionReply {
    TaskPackage { name: String, payload: Payload },
    NoTask,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Status(StatusReply),
    Action(ActionReply),
}

impl From<WireResponse> for Response {
    fn from(wire: WireResponse) -> Self {
        match wire {
            WireResponse::Status(StatusReply::Registered) => Self::Registered,
            WireResponse::Status(StatusReply::Alive) => Self::Alive,
            WireResponse::Status(StatusReply::Ok) => Self::Ok,
            WireResponse::Status(StatusReply::Error { reason }) => Self::Error { reason },
            WireResponse::Action(ActionReply::TaskPackage { name, payload }) => {
                Self::TaskPackage { name, payload }
            }
            WireResponse::Action(ActionReply::NoTask) => Self::NoTask,
        }
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        match response {
            Response::Registered => Self::Status(StatusReply::Registered),
            Response::Alive => Self::Status(StatusReply::Alive),
            Response::Ok => Self::Status(StatusReply::Ok),
            Response::Error { reason } => Self::Status(StatusReply::Error { reason }),
            Response::TaskPackage { name, payload } => {
                Self::Action(ActionReply::TaskPackage { name, payload })
            }
            Response::NoTask => Self::Action(ActionReply::NoTask),
        }
    }
}
