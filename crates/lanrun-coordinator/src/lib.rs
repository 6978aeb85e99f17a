//! lanrun coordinator library
//!
//! This crate provides the coordinator side of lanrun: the UDP discovery
//! responder, the TCP session protocol, the directory-backed work queue,
//! the peer registry and result store, and an optional HTTP status surface.

pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod metrics;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod results;
pub mod server;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::CoordinatorError;
pub use queue::{QueueError, QueueStats, WorkQueue};
pub use registry::PeerRegistry;
pub use results::{ResultStore, StoreError};
pub use server::Coordinator;
pub use state::AppState;
