//! Storage infrastructure: the optional broker configuration file.
//!
//! The broker runs fine with no file at all.  When one is given, the
//! `config` sub-module reads it, fills in defaults for anything missing and
//! converts it into a [`BrokerConfig`](crate::domain::BrokerConfig).

pub mod config;

pub use config::{load_config_file, ConfigError, FileConfig};
