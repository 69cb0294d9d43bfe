//! Records kept by the ledger.
//!
//! - [`IndexVersion`]: one announcement from the upstream module index
//! - [`ModuleVersionState`]: processing state of one (module path, version)
//! - [`PackageVersionState`]: outcome of one package inside a module attempt
//! - [`VersionStats`]: aggregate computed on demand, never stored
//!
//! All records are persisted as JSON. Timestamps are UTC; an absent timestamp
//! plays the role of the "zero" value the index reports before it knows one.

use std::collections::BTreeMap;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::ProcessingOutcome;

/// A (path, version) announced by the upstream index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexVersion {
    pub path: String,
    pub version: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IndexVersion {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersionState {
    pub module_path: String,
    pub version: String,
    pub index_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Earliest time the version may be handed out again. `None` once settled.
    pub next_processed_after: Option<DateTime<Utc>>,
    pub try_count: u32,
    #[serde(default)]
    pub app_version: String,
    pub go_mod_path: String,
    pub error: String,
    pub status: u16,
    /// Package rows written by the latest attempt; `None` before the first one.
    pub num_packages: Option<usize>,
}

impl ModuleVersionState {
    /// Fresh, untried state as created by the index ledger.
    pub fn untried(
        module_path: impl Into<String>,
        version: impl Into<String>,
        index_timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            module_path: module_path.into(),
            version: version.into(),
            index_timestamp,
            created_at: now,
            last_processed_at: None,
            next_processed_after: None,
            try_count: 0,
            app_version: String::new(),
            go_mod_path: String::new(),
            error: String::new(),
            status: 0,
            num_packages: None,
        }
    }

    pub fn outcome(&self) -> ProcessingOutcome {
        ProcessingOutcome::from_code(self.status)
    }

    /// Processed with nothing left to schedule.
    pub fn is_settled(&self) -> bool {
        self.next_processed_after.is_none() && self.try_count > 0
    }

    /// Whether the scheduler may hand this version out at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.next_processed_after {
            Some(after) => after <= now,
            None => !self.is_settled(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersionState {
    pub package_path: String,
    pub module_path: String,
    pub version: String,
    pub status: u16,
    #[serde(default)]
    pub error: String,
}

impl PackageVersionState {
    pub fn new(
        package_path: impl Into<String>,
        module_path: impl Into<String>,
        version: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            package_path: package_path.into(),
            module_path: module_path.into(),
            version: version.into(),
            status,
            error: String::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }
}

/// One processing attempt reported by a worker.
///
/// ```rust,ignore
/// let attempt = AttemptRecord::builder()
///     .module_path("foo.com/bar")
///     .version("v1.0.0")
///     .status(500)
///     .error("bad request")
///     .package_states(vec![pkg])
///     .build();
/// store.upsert_module_version_state(&ctx, &attempt)?;
/// ```
#[derive(Debug, Clone, Builder)]
pub struct AttemptRecord {
    #[builder(into)]
    pub module_path: String,
    #[builder(into)]
    pub version: String,
    #[builder(into, default)]
    pub app_version: String,
    #[builder(into, default)]
    pub go_mod_path: String,
    pub index_timestamp: Option<DateTime<Utc>>,
    pub status: u16,
    /// Rendered error of the attempt; `None` for a clean run.
    #[builder(into)]
    pub error: Option<String>,
    #[builder(default)]
    pub package_states: Vec<PackageVersionState>,
}

impl AttemptRecord {
    pub fn outcome(&self) -> ProcessingOutcome {
        ProcessingOutcome::from_code(self.status)
    }
}

/// Health summary over all module version states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStats {
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub version_counts: BTreeMap<u16, usize>,
}
