//! lanmq broker entry point.
//!
//! Resolves the configuration (command line and environment over the config
//! file over built-in defaults), sets up logging, and runs the broker until
//! Ctrl+C.
//!
//! # Startup
//!
//! ```text
//! main()
//!  └─ Cli::parse()            -- flags, with LANMQ_* environment fallbacks
//!  └─ Cli::resolve()          -- optional TOML file, then overrides
//!  └─ tracing_subscriber      -- RUST_LOG, else the configured level
//!  └─ run_broker()            -- bind, accept, serve until shutdown
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lanmq_broker::domain::BrokerConfig;
use lanmq_broker::infrastructure::run_broker;
use lanmq_broker::infrastructure::storage::{load_config_file, FileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Publish/subscribe broker for the LAN.
///
/// Speaks the QoS 0 subset of MQTT 3.1.1 over plain TCP.  Every flag is
/// optional; anything not given on the command line or in the environment
/// comes from the config file, and then from the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "lanmq-broker",
    about = "LAN publish/subscribe broker (MQTT 3.1.1, QoS 0)",
    version
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, short = 'c', env = "LANMQ_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.  `0.0.0.0` accepts connections from the LAN.
    #[arg(long, env = "LANMQ_HOST")]
    host: Option<String>,

    /// TCP port to listen on (default 1883).
    #[arg(long, short = 'p', env = "LANMQ_PORT")]
    port: Option<u16>,

    /// Seconds of silence before a client is disconnected.
    #[arg(long, env = "LANMQ_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Largest accepted packet body, in bytes.
    #[arg(long, env = "LANMQ_MAX_PACKET_SIZE")]
    max_packet_size: Option<usize>,

    /// Log level when `RUST_LOG` is not set.
    #[arg(long, env = "LANMQ_LOG")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file (if any) and applies the command-line overrides.
    ///
    /// Returns the broker configuration and the log level to use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or the
    /// merged values are invalid.
    fn resolve(self) -> anyhow::Result<(BrokerConfig, String)> {
        let mut file = match &self.config {
            Some(path) => load_config_file(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => FileConfig::default(),
        };
        self.apply_to(&mut file);

        let log_level = file.log.level.clone();
        let config = file
            .into_broker_config()
            .context("invalid broker configuration")?;
        Ok((config, log_level))
    }

    fn apply_to(self, file: &mut FileConfig) {
        if let Some(host) = self.host {
            file.listener.host = host;
        }
        if let Some(port) = self.port {
            file.listener.port = port;
        }
        if let Some(secs) = self.idle_timeout {
            file.session.idle_timeout_secs = secs;
        }
        if let Some(size) = self.max_packet_size {
            file.session.max_packet_size = size;
        }
        if let Some(level) = self.log_level {
            file.log.level = level;
        }
    }
}

fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, log_level) = Cli::parse().resolve()?;

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&log_level))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_addr,
        "lanmq broker starting"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_broker(config, shutdown).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn temp_config(content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("lanmq-cli-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).expect("write temp config");
        path
    }

    #[test]
    fn test_cli_without_arguments_leaves_everything_unset() {
        // Arrange / Act
        let cli = Cli::parse_from(["lanmq-broker"]);

        // Assert
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
        assert!(cli.host.is_none());
    }

    #[test]
    fn test_resolve_without_arguments_gives_defaults() {
        let (config, level) = Cli::parse_from(["lanmq-broker"]).resolve().unwrap();

        assert_eq!(config, BrokerConfig::default());
        assert_eq!(config.bind_addr.port(), 1883);
        assert_eq!(level, "info");
    }

    #[test]
    fn test_cli_overrides_apply() {
        let cli = Cli::parse_from([
            "lanmq-broker",
            "--host",
            "127.0.0.1",
            "-p",
            "2883",
            "--idle-timeout",
            "10",
            "--max-packet-size",
            "1024",
            "--log-level",
            "debug",
        ]);

        let (config, level) = cli.resolve().unwrap();

        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 2883)));
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.max_remaining_length, 1024);
        assert_eq!(level, "debug");
    }

    #[test]
    fn test_cli_takes_precedence_over_config_file() {
        // Arrange
        let path = temp_config("[listener]\nport = 3000\nhost = \"127.0.0.1\"\n[log]\nlevel = \"warn\"\n");
        let cli = Cli::parse_from([
            "lanmq-broker",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "4000",
        ]);

        // Act
        let result = cli.resolve();
        let _ = std::fs::remove_file(&path);
        let (config, level) = result.unwrap();

        // Assert: port from the CLI, host and log level from the file
        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.bind_addr.ip().to_string(), "127.0.0.1");
        assert_eq!(level, "warn");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["lanmq-broker", "--config", "/nonexistent/lanmq.toml"]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let cli = Cli::parse_from(["lanmq-broker", "--host", "not.an.ip"]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_zero_idle_timeout_is_an_error() {
        let cli = Cli::parse_from(["lanmq-broker", "--idle-timeout", "0"]);
        assert!(cli.resolve().is_err());
    }

    #[test]
    fn test_non_numeric_port_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["lanmq-broker", "--port", "high"]);
        assert!(result.is_err());
    }
}
