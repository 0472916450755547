//! lanmq-broker library crate.
//!
//! A small publish/subscribe broker for a LAN: the camera pipeline, the rover
//! controller and the web dashboards connect over plain TCP (port 1883) and
//! exchange short control and status messages using the QoS 0 subset of
//! MQTT 3.1.1.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! TCP clients (MQTT 3.1.1, QoS 0)
//!         ↕
//! [lanmq-broker]
//!   ├── domain/           BrokerConfig, SessionId, SessionState
//!   ├── application/      Session state machine, registries, fan-out
//!   └── infrastructure/
//!         ├── network/    Accept loop, per-connection read/write tasks
//!         └── storage/    TOML config file
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `lanmq-core`; it may use tokio
//!   channels but never sockets.
//! - `infrastructure` owns every socket and file.

/// Domain layer: pure configuration and identity types.
pub mod domain;

/// Application layer: sessions, registries and publish fan-out.
pub mod application;

/// Infrastructure layer: TCP listener, connection I/O, config file.
pub mod infrastructure;
