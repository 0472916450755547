//! TOML configuration file for the broker.
//!
//! Every field is optional.  A missing section or key takes its default, so
//! a file that only changes the port is a valid file:
//!
//! ```toml
//! [listener]
//! host = "0.0.0.0"
//! port = 1883
//! backlog = 128
//! accept_retry_delay_ms = 100
//!
//! [session]
//! idle_timeout_secs = 60
//! max_packet_size = 262144
//! outbound_queue_capacity = 64
//!
//! [shutdown]
//! grace_secs = 5
//!
//! [log]
//! level = "info"
//! ```
//!
//! Command-line flags and environment variables take precedence over the
//! file; `main.rs` applies them to the [`FileConfig`] before calling
//! [`FileConfig::into_broker_config`].

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::config::{BrokerConfig, DEFAULT_PORT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parse but do not make a usable broker configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level file layout.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub listener: ListenerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub shutdown: ShutdownSection,
    #[serde(default)]
    pub log: LogSection,
}

/// Where and how the broker listens.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ListenerSection {
    /// IP address to bind.  `"0.0.0.0"` listens on every interface.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pending-connection queue length passed to `listen()`.
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Pause after a transient `accept()` failure.
    #[serde(default = "default_accept_retry_delay_ms")]
    pub accept_retry_delay_ms: u64,
}

/// Per-connection limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Seconds of silence before a connection is dropped, unless the
    /// client's keep-alive says otherwise.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Largest accepted remaining length, in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Frames buffered per subscriber before new messages are dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ShutdownSection {
    /// Seconds sessions get to flush queued frames on shutdown.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LogSection {
    /// `tracing` level filter: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    /// `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_backlog() -> u32 {
    BrokerConfig::default().listen_backlog
}
fn default_accept_retry_delay_ms() -> u64 {
    BrokerConfig::default().accept_retry_delay.as_millis() as u64
}
fn default_idle_timeout_secs() -> u64 {
    BrokerConfig::default().idle_timeout.as_secs()
}
fn default_max_packet_size() -> usize {
    BrokerConfig::default().max_remaining_length
}
fn default_outbound_queue_capacity() -> usize {
    BrokerConfig::default().outbound_queue_capacity
}
fn default_grace_secs() -> u64 {
    BrokerConfig::default().shutdown_grace.as_secs()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            accept_retry_delay_ms: default_accept_retry_delay_ms(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            max_packet_size: default_max_packet_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for ShutdownSection {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversion ────────────────────────────────────────────────────────────────

impl FileConfig {
    /// Builds the runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `listener.host` is not an IP
    /// address or a limit is zero.
    pub fn into_broker_config(self) -> Result<BrokerConfig, ConfigError> {
        let host: IpAddr = self.listener.host.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "listener.host '{}' is not an IP address",
                self.listener.host
            ))
        })?;

        let config = BrokerConfig {
            bind_addr: SocketAddr::new(host, self.listener.port),
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            max_remaining_length: self.session.max_packet_size,
            outbound_queue_capacity: self.session.outbound_queue_capacity,
            accept_retry_delay: Duration::from_millis(self.listener.accept_retry_delay_ms),
            shutdown_grace: Duration::from_secs(self.shutdown.grace_secs),
            listen_backlog: self.listener.backlog,
        };
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the config file at `path`.
///
/// The file was named explicitly, so a missing file is an error rather than
/// a silent fall back to defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed or a value has the wrong
/// type.
pub fn load_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
