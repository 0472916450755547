//! Infrastructure layer for lanmq-broker.
//!
//! Everything that touches the operating system: the TCP listener, the
//! per-connection read/write loops, LAN address detection and the optional
//! TOML configuration file.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `lanmq_core`, but MUST NOT be imported by either of them.

pub mod network;
pub mod storage;

pub use network::run_broker;
