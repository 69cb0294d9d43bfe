use crate::humanize::HumanDuration;
use crate::ledger::backoff::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
use crate::ledger::service::DEFAULT_OPERATION_TIMEOUT;
use crate::ledger::{RetryPolicy, SuccessPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Ledger storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// What a successful attempt does to the schedule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessPolicyKind {
    #[default]
    Settle,
    Revalidate,
}

/// Retry, batching and lease settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: HumanDuration,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: HumanDuration,
    #[serde(default)]
    pub success_policy: SuccessPolicyKind,
    /// Only used with `success_policy = "revalidate"`
    #[serde(default = "default_revalidate_interval")]
    pub revalidate_interval: HumanDuration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_lease")]
    pub lease: HumanDuration,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: HumanDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            success_policy: SuccessPolicyKind::default(),
            revalidate_interval: default_revalidate_interval(),
            batch_size: default_batch_size(),
            lease: default_lease(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let on_success = match self.success_policy {
            SuccessPolicyKind::Settle => SuccessPolicy::Settle,
            SuccessPolicyKind::Revalidate => {
                SuccessPolicy::Revalidate(self.revalidate_interval.as_duration())
            }
        };
        RetryPolicy {
            initial_backoff: self.initial_backoff.as_duration(),
            max_backoff: self.max_backoff.as_duration(),
            on_success,
        }
    }
}

fn default_initial_backoff() -> HumanDuration {
    HumanDuration::from(DEFAULT_INITIAL_BACKOFF)
}

fn default_max_backoff() -> HumanDuration {
    HumanDuration::from(DEFAULT_MAX_BACKOFF)
}

fn default_revalidate_interval() -> HumanDuration {
    HumanDuration::from_secs(24 * 3600)
}

fn default_batch_size() -> usize {
    100
}

fn default_lease() -> HumanDuration {
    HumanDuration::from_secs(10 * 60)
}

fn default_operation_timeout() -> HumanDuration {
    HumanDuration::from(DEFAULT_OPERATION_TIMEOUT)
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
