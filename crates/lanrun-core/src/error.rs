//! Core domain errors.

use thiserror::Error;

/// Core domain errors for lanrun.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Peer identifier is empty or contains characters we refuse to log or store.
    #[error("Invalid peer id '{id}': {reason}")]
    InvalidPeerId { id: String, reason: &'static str },

    /// Unit name cannot be used as a file name in the stores.
    #[error("Invalid unit name '{name}': {reason}")]
    InvalidUnitName { name: String, reason: &'static str },
}
