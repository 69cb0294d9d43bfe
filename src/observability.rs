//! Logging setup and ledger counters

use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::TelemetryConfig;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid log filter {0:?}: {1}")]
    InvalidFilter(String, String),

    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn init(config: &TelemetryConfig) -> Result<(), ObservabilityError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .map_err(|e| ObservabilityError::InvalidFilter(config.log_filter.clone(), e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_writer(io::stderr),
            )
            .try_init()
    };

    result.map_err(|e| ObservabilityError::AlreadyInstalled(e.to_string()))
}

/// Counters for ledger traffic
#[derive(Debug, Default)]
pub struct Metrics {
    index_versions_inserted: AtomicU64,
    attempts_recorded: AtomicU64,
    failed_attempts: AtomicU64,
    candidates_served: AtomicU64,
    claims: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_versions_inserted(&self, count: usize) {
        self.index_versions_inserted
            .fetch_add(count as u64, Ordering::Relaxed);
        tracing::trace!(counter = "index_versions_inserted", count, "Metric incremented");
    }

    pub fn attempt_recorded(&self, failed: bool) {
        self.attempts_recorded.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(counter = "attempts_recorded", failed, "Metric incremented");
    }

    pub fn candidates_served(&self, count: usize) {
        self.candidates_served
            .fetch_add(count as u64, Ordering::Relaxed);
        tracing::trace!(counter = "candidates_served", count, "Metric incremented");
    }

    pub fn claimed(&self, count: usize) {
        self.claims.fetch_add(count as u64, Ordering::Relaxed);
        tracing::trace!(counter = "claims", count, "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            index_versions_inserted: self.index_versions_inserted.load(Ordering::Relaxed),
            attempts_recorded: self.attempts_recorded.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            candidates_served: self.candidates_served.load(Ordering::Relaxed),
            claims: self.claims.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub index_versions_inserted: u64,
    pub attempts_recorded: u64,
    pub failed_attempts: u64,
    pub candidates_served: u64,
    pub claims: u64,
}
