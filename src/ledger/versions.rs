//! Module and package version states.
//!
//! A module version's state and the package states of its latest attempt are
//! kept in separate partitions joined by (module path, version). Recording an
//! attempt rewrites both in one transaction: the package rows of attempt N
//! replace those of attempt N-1 entirely.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::models::{AttemptRecord, ModuleVersionState, PackageVersionState};
use crate::outcome::ProcessingOutcome;

use super::context::OpContext;
use super::error::{Result, StoreError};
use super::partitions::{
    encode_module_key, encode_package_key, encode_package_prefix, validate_module_key,
};
use super::store::{FjallStore, decode_record, decode_rows};

impl FjallStore {
    pub fn get_module_version_state(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<ModuleVersionState> {
        ctx.check("get_module_version_state")?;
        validate_module_key(module_path, version)?;
        let read_tx = self.keyspace.read_tx();
        match read_tx.get(&self.module_versions, encode_module_key(module_path, version))? {
            Some(value) => decode_record(&value),
            None => Err(StoreError::NotFound(format!(
                "module version {}@{}",
                module_path, version
            ))),
        }
    }

    /// Record one processing attempt and its package outcomes.
    ///
    /// Creates the state on first sight (`try_count = 1`), otherwise bumps
    /// `try_count`. Status, error, go.mod path and app version always reflect
    /// this attempt. The next eligible time comes from the retry policy. The
    /// module row and the full package set commit together or not at all.
    ///
    /// A failed attempt is ordinary data; this only fails on bad input or
    /// storage trouble.
    pub fn upsert_module_version_state(&self, ctx: &OpContext, attempt: &AttemptRecord) -> Result<()> {
        ctx.check("upsert_module_version_state")?;
        validate_attempt(attempt).inspect_err(|err| {
            warn!(
                module_path = %attempt.module_path,
                version = %attempt.version,
                error = %err,
                "Rejected attempt"
            );
        })?;

        let now = self.clock.now();
        let outcome = attempt.outcome();
        let mut tx = self.keyspace.write_tx();

        let previous = self.load_module_tx(&tx, &attempt.module_path, &attempt.version)?;
        let mut state = match previous.clone() {
            Some(mut state) => {
                state.try_count = state.try_count.saturating_add(1);
                if state.index_timestamp.is_none() {
                    state.index_timestamp = attempt.index_timestamp;
                }
                state
            }
            None => {
                let mut state = ModuleVersionState::untried(
                    &attempt.module_path,
                    &attempt.version,
                    attempt.index_timestamp,
                    now,
                );
                state.try_count = 1;
                state
            }
        };

        state.status = attempt.status;
        state.error = attempt.error.clone().unwrap_or_default();
        state.go_mod_path = attempt.go_mod_path.clone();
        state.app_version = attempt.app_version.clone();
        state.last_processed_at = Some(now);
        state.next_processed_after = self.policy.next_processed_after(state.try_count, outcome, now);
        state.num_packages = Some(attempt.package_states.len());
        self.put_module_tx(&mut tx, previous.as_ref(), &state)?;

        let prefix = encode_package_prefix(&attempt.module_path, &attempt.version);
        let stale_keys = tx
            .prefix(&self.package_versions, &prefix)
            .map(|item| item.map(|(key, _)| key))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let replaced = stale_keys.len();
        for key in stale_keys {
            tx.remove(&self.package_versions, key);
        }

        for package in &attempt.package_states {
            let key = encode_package_key(&package.module_path, &package.version, &package.package_path);
            tx.insert(&self.package_versions, key, serde_json::to_vec(package)?);
        }

        ctx.check("upsert_module_version_state")?;
        tx.commit()?;

        debug!(
            module_path = %state.module_path,
            version = %state.version,
            try_count = state.try_count,
            %outcome,
            packages = attempt.package_states.len(),
            replaced,
            "Recorded module version attempt"
        );
        Ok(())
    }

    pub fn get_package_version_state(
        &self,
        ctx: &OpContext,
        package_path: &str,
        module_path: &str,
        version: &str,
    ) -> Result<PackageVersionState> {
        ctx.check("get_package_version_state")?;
        validate_module_key(module_path, version)?;
        let read_tx = self.keyspace.read_tx();
        let key = encode_package_key(module_path, version, package_path);
        match read_tx.get(&self.package_versions, key)? {
            Some(value) => decode_record(&value),
            None => Err(StoreError::NotFound(format!(
                "package {} in {}@{}",
                package_path, module_path, version
            ))),
        }
    }

    /// Package states written by the latest attempt, ordered by package path
    pub fn get_package_version_states_for_module(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<Vec<PackageVersionState>> {
        ctx.check("get_package_version_states_for_module")?;
        validate_module_key(module_path, version)?;
        let read_tx = self.keyspace.read_tx();
        let prefix = encode_package_prefix(module_path, version);
        decode_rows(read_tx.prefix(&self.package_versions, prefix))
    }
}

fn validate_attempt(attempt: &AttemptRecord) -> Result<()> {
    validate_module_key(&attempt.module_path, &attempt.version)?;

    if attempt.outcome() == ProcessingOutcome::Pending {
        return Err(StoreError::InvalidArgument(format!(
            "attempt on {}@{} reports status 0 (untried)",
            attempt.module_path, attempt.version
        )));
    }

    let mut seen = HashSet::with_capacity(attempt.package_states.len());
    for package in &attempt.package_states {
        if package.package_path.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "empty package path in attempt on {}@{}",
                attempt.module_path, attempt.version
            )));
        }
        if package.module_path != attempt.module_path || package.version != attempt.version {
            return Err(StoreError::InvalidArgument(format!(
                "package {} belongs to {}@{}, not {}@{}",
                package.package_path,
                package.module_path,
                package.version,
                attempt.module_path,
                attempt.version
            )));
        }
        if !seen.insert(package.package_path.as_str()) {
            return Err(StoreError::InvalidArgument(format!(
                "duplicate package {} in attempt on {}@{}",
                package.package_path, attempt.module_path, attempt.version
            )));
        }
    }

    Ok(())
}
