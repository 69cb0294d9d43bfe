//! Per-operation deadline and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::error::{Result, StoreError};

/// Carried through every store operation. Checked before work starts and
/// again right before a write transaction commits; a failed check drops the
/// transaction, so nothing from the operation becomes visible.
///
/// Clones share the cancellation flag. A child has its own flag but also
/// observes every ancestor's.
#[derive(Debug, Clone)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OpContext {
    /// No deadline, never cancelled unless `cancel` is called.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            ancestors: Vec::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            ..Self::background()
        }
    }

    /// Child context whose deadline is the earlier of this one's and
    /// `now + timeout`. Cancelling the child leaves the parent untouched.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.cancelled.clone());
        Self {
            deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.ancestors.iter().any(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn check(&self, op: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled(format!("{} cancelled", op)));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StoreError::Cancelled(format!("{} exceeded its deadline", op)));
            }
        }
        Ok(())
    }
}
