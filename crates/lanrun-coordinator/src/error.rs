//! Coordinator startup and runtime errors.

use std::net::SocketAddr;

use thiserror::Error;

use crate::queue::QueueError;
use crate::results::StoreError;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Failed to bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Work queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
