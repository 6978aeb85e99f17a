//! Wire-level errors.

use thiserror::Error;

/// Errors raised while framing, encoding or decoding messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Socket failure or a frame that violates the length prefix rules.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame did not hold a valid message.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
