//! HTTP request handlers.

mod health;
mod peers;

pub use health::{health_check, metrics_handler};
pub use peers::{list_peers, PeerResponse};
