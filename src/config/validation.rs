use super::models::{Config, SuccessPolicyKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Scheduler duration must be positive: {field}")]
    ZeroDuration { field: &'static str },

    #[error("max_backoff ({max}) is shorter than initial_backoff ({initial})")]
    BackoffRange { initial: String, max: String },

    #[error("Scheduler batch_size must be positive")]
    ZeroBatchSize,

    #[error("Store path is empty")]
    EmptyStorePath,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_store(config)?;
    validate_scheduler(config)?;
    Ok(())
}

fn validate_store(config: &Config) -> Result<(), ValidationError> {
    if config.store.path.as_os_str().is_empty() {
        return Err(ValidationError::EmptyStorePath);
    }
    Ok(())
}

fn validate_scheduler(config: &Config) -> Result<(), ValidationError> {
    let scheduler = &config.scheduler;

    if scheduler.initial_backoff.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "initial_backoff",
        });
    }

    if scheduler.max_backoff < scheduler.initial_backoff {
        return Err(ValidationError::BackoffRange {
            initial: scheduler.initial_backoff.to_string(),
            max: scheduler.max_backoff.to_string(),
        });
    }

    if scheduler.batch_size == 0 {
        return Err(ValidationError::ZeroBatchSize);
    }

    if scheduler.lease.is_zero() {
        return Err(ValidationError::ZeroDuration { field: "lease" });
    }

    if scheduler.success_policy == SuccessPolicyKind::Revalidate
        && scheduler.revalidate_interval.is_zero()
    {
        return Err(ValidationError::ZeroDuration {
            field: "revalidate_interval",
        });
    }

    if scheduler.operation_timeout.is_zero() {
        return Err(ValidationError::ZeroDuration {
            field: "operation_timeout",
        });
    }

    Ok(())
}
