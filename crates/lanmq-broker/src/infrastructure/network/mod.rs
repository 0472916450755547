//! Network infrastructure for the broker.
//!
//! # Sub-modules
//!
//! - **`acceptor`** – Binds the listening socket, accepts connections and
//!   spawns one task per client.  Owns the shutdown sequence.
//!
//! - **`connection`** – Drives a single connection: a reader loop feeding the
//!   session state machine and a writer task draining its outbound queue.
//!
//! - **`local_addr`** – Finds the machine's LAN address for the startup banner.

pub mod acceptor;
pub mod connection;
pub mod local_addr;

pub use acceptor::{run_broker, Acceptor, NetworkError};
pub use connection::{serve_connection, SessionEnd};
pub use local_addr::detect_lan_ip;
