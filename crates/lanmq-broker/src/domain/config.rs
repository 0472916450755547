//! Broker configuration types.
//!
//! [`BrokerConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from defaults, an optional TOML file and CLI flags;
//! tests construct it directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use lanmq_core::protocol::DEFAULT_MAX_REMAINING_LENGTH;

/// Standard unencrypted MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// All runtime configuration for the broker.
///
/// Build this struct once at startup and wrap it in an `Arc` so it can be
/// shared cheaply across all session tasks.
///
/// # Example
///
/// ```rust
/// use lanmq_broker::domain::BrokerConfig;
///
/// let cfg = BrokerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 1883);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Address the listener binds to.  `0.0.0.0` accepts connections from
    /// every interface so LAN clients can reach the broker.
    pub bind_addr: SocketAddr,

    /// How long a session may go without receiving a byte before it is torn
    /// down.  Replaced by 1.5 × keep-alive once a client announces one.
    pub idle_timeout: Duration,

    /// Ceiling on the declared remaining length of an inbound frame.
    pub max_remaining_length: usize,

    /// Number of encoded frames buffered per session before fan-out starts
    /// dropping messages for that subscriber.
    pub outbound_queue_capacity: usize,

    /// Pause before retrying after a transient accept error.
    pub accept_retry_delay: Duration,

    /// How long shutdown waits for sessions to flush queued frames and close.
    pub shutdown_grace: Duration,

    /// Listen backlog passed to `listen(2)`.
    pub listen_backlog: u32,
}

impl Default for BrokerConfig {
    /// | Field                   | Default        |
    /// |-------------------------|----------------|
    /// | bind_addr               | `0.0.0.0:1883` |
    /// | idle_timeout            | 60 seconds     |
    /// | max_remaining_length    | 256 KiB        |
    /// | outbound_queue_capacity | 64 frames      |
    /// | accept_retry_delay      | 100 ms         |
    /// | shutdown_grace          | 5 seconds      |
    /// | listen_backlog          | 128            |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(60),
            max_remaining_length: DEFAULT_MAX_REMAINING_LENGTH,
            outbound_queue_capacity: 64,
            accept_retry_delay: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            listen_backlog: 128,
        }
    }
}

impl BrokerConfig {
    /// Checks the invariants the broker relies on at runtime.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than zero".into());
        }
        if self.outbound_queue_capacity == 0 {
            return Err("outbound_queue_capacity must be at least 1".into());
        }
        if self.max_remaining_length == 0 {
            return Err("max_remaining_length must be greater than zero".into());
        }
        if self.listen_backlog == 0 {
            return Err("listen_backlog must be at least 1".into());
        }
        Ok(())
    }

    /// Idle timeout for a session that announced `keep_alive_secs` in CONNECT.
    ///
    /// A keep-alive of zero disables the client-side timer, so the configured
    /// idle timeout applies.  Otherwise the session is allowed one and a half
    /// keep-alive periods of silence.
    pub fn idle_timeout_for(&self, keep_alive_secs: u16) -> Duration {
        if keep_alive_secs == 0 {
            self.idle_timeout
        } else {
            Duration::from_millis(u64::from(keep_alive_secs) * 1500)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
