//! Configuration management for fetchledger
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use fetchledger::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Ledger stored at: {}", config.store.path.display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `FETCHLEDGER__<section>__<key>`
//!
//! Examples:
//! - `FETCHLEDGER__STORE__PATH=/var/lib/fetchledger`
//! - `FETCHLEDGER__SCHEDULER__MAX_BACKOFF=2h`
//! - `FETCHLEDGER__TELEMETRY__JSON_LOGS=true`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/fetchledger.toml`.
//! This can be overridden using the `FETCHLEDGER_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{Config, SchedulerConfig, StoreConfig, SuccessPolicyKind, TelemetryConfig};
pub use sources::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`FETCHLEDGER__*`)
    /// 2. TOML file (default: `config/fetchledger.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value is
    /// out of range (zero backoff, `max_backoff < initial_backoff`, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Render as TOML, e.g. to show the effective configuration
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
