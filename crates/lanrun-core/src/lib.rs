//! lanrun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Sockets or wire formats
//! - The filesystem
//! - Runtime specifics
//!
//! Everything the coordinator and the workers agree on lives here.

pub mod error;
pub mod ids;
pub mod peer;
pub mod status;
pub mod unit;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{validate_peer_id, PeerId};
pub use peer::{PeerAddr, PeerRecord};
pub use status::PeerStatus;
pub use unit::{validate_unit_name, ResultUnit, WorkUnit};
