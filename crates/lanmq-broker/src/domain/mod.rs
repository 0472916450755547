//! Domain layer for lanmq-broker.
//!
//! Pure types with no dependency on tokio, sockets or files: the runtime
//! configuration, session identifiers and the session lifecycle states.
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream` or channel types
//! - File I/O or environment variable reading
//! - Anything that could block or fail due to external state

pub mod config;
pub mod session;

pub use config::BrokerConfig;
pub use session::{SessionId, SessionIdAllocator, SessionState};
