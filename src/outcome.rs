//! Classification of processing status codes.
//!
//! Status codes follow HTTP conventions without any HTTP transport behind
//! them: 0 means the version was never tried, 2xx means the attempt
//! succeeded, anything else is a failure of that kind (4xx for problems with
//! the module itself, 5xx for problems on the processing side).

use std::fmt;

use serde::{Deserialize, Serialize};

pub const STATUS_PENDING: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "code", rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Pending,
    Success(u16),
    Failure(u16),
}

impl ProcessingOutcome {
    pub fn from_code(code: u16) -> Self {
        match code {
            STATUS_PENDING => ProcessingOutcome::Pending,
            200..=299 => ProcessingOutcome::Success(code),
            _ => ProcessingOutcome::Failure(code),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ProcessingOutcome::Pending => STATUS_PENDING,
            ProcessingOutcome::Success(code) | ProcessingOutcome::Failure(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProcessingOutcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessingOutcome::Failure(_))
    }
}

impl From<u16> for ProcessingOutcome {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingOutcome::Pending => write!(f, "pending"),
            ProcessingOutcome::Success(code) => write!(f, "success({})", code),
            ProcessingOutcome::Failure(code) => write!(f, "failure({})", code),
        }
    }
}
