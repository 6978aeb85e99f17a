//! lanrun worker library
//!
//! Finds the coordinator over UDP broadcast, registers, then keeps two
//! loops running: heartbeats and the request/execute/submit task loop.

pub mod agent;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod executor;

pub use agent::WorkerAgent;
pub use config::Config;
pub use connection::{ClientError, CoordinatorClient, TaskReply};
pub use discovery::{discover, DiscoveryError};
pub use executor::{ExecutorError, SandboxExecutor};
