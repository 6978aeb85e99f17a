//! Wire contract shared by the lanrun coordinator and workers.
//!
//! This crate contains:
//! - Session messages exchanged over TCP (`Request` / `Response`)
//! - Discovery datagrams exchanged over UDP (`DiscoveryMessage`)
//! - A length-delimited JSON codec for framed transports
//! - Conversions between wire messages and domain types

pub mod codec;
pub mod discovery;
pub mod error;
pub mod message;
pub mod payload;

/// Well-known UDP port the coordinator answers discovery queries on.
pub const DISCOVERY_PORT: u16 = 9999;

/// Well-known TCP port the coordinator accepts sessions on.
pub const SESSION_PORT: u16 = 10000;

/// Largest frame either side will accept, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// Re-export commonly used types
pub use codec::{CoordinatorCodec, JsonCodec, WorkerCodec};
pub use discovery::DiscoveryMessage;
pub use error::ProtoError;
pub use message::{Request, Response};
pub use payload::Payload;
