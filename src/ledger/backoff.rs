//! Retry scheduling.
//!
//! `next_processed_after` is a pure function of the attempt count, the
//! outcome and the time the attempt was recorded, so scheduling can be
//! reasoned about (and tested) without a wall clock.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::outcome::ProcessingOutcome;

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// What happens to a version after a successful attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// Never reschedule; `next_processed_after` is cleared.
    Settle,
    /// Reschedule for re-validation after the interval.
    Revalidate(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub on_success: SuccessPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            on_success: SuccessPolicy::Settle,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `try_count + 1` after a failed attempt:
    /// `initial * 2^(try_count - 1)`, capped at `max_backoff`.
    pub fn failure_delay(&self, try_count: u32) -> Duration {
        let exponent = try_count.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    pub fn next_processed_after(
        &self,
        try_count: u32,
        outcome: ProcessingOutcome,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match outcome {
            ProcessingOutcome::Pending => Some(now),
            ProcessingOutcome::Failure(_) => Some(add_duration(now, self.failure_delay(try_count))),
            ProcessingOutcome::Success(_) => match self.on_success {
                SuccessPolicy::Settle => None,
                SuccessPolicy::Revalidate(interval) => Some(add_duration(now, interval)),
            },
        }
    }
}

/// `now + duration`, saturating at the largest representable time
pub fn add_duration(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
