//! Health summaries and operator actions over module version states.
//!
//! Both summaries read secondary partitions kept in step with the module rows:
//! the status histogram is a per-status counter, and failures are keyed by
//! last processed time so the newest come first.

use tracing::{debug, info};

use crate::models::{ModuleVersionState, VersionStats};

use super::context::OpContext;
use super::error::{Result, StoreError};
use super::partitions::{decode_ordered_instant, encode_module_key, validate_module_key};
use super::store::{FjallStore, RowRef, decode_count, decode_record};

impl FjallStore {
    /// Status histogram and newest index timestamp over all module versions
    pub fn get_version_stats(&self, ctx: &OpContext) -> Result<VersionStats> {
        ctx.check("get_version_stats")?;
        let read_tx = self.keyspace.read_tx();

        let mut stats = VersionStats::default();
        for item in read_tx.iter(&self.status_counts) {
            let (key, value) = item?;
            let status = <[u8; 2]>::try_from(&*key).map_err(|_| {
                StoreError::Internal(format!("bad status key of {} bytes", key.len()))
            })?;
            let count = usize::try_from(decode_count(&value)?)
                .map_err(|e| StoreError::Internal(format!("status count overflow: {}", e)))?;
            stats.version_counts.insert(u16::from_be_bytes(status), count);
        }

        if let Some((key, _)) = read_tx.first_key_value(&self.timeline)? {
            stats.latest_timestamp = decode_ordered_instant(&key)?;
        }

        debug!(statuses = stats.version_counts.len(), "Computed version stats");
        Ok(stats)
    }

    /// Most recently processed failures, newest first.
    pub fn get_recent_failed_versions(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>> {
        ctx.check("get_recent_failed_versions")?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let read_tx = self.keyspace.read_tx();
        let mut failed = Vec::new();
        for item in read_tx.iter(&self.failures).take(limit) {
            let (_, value) = item?;
            let entry: RowRef = decode_record(&value)?;
            let key = encode_module_key(&entry.module_path, &entry.version);
            let value = read_tx.get(&self.module_versions, key)?.ok_or_else(|| {
                StoreError::Internal(format!(
                    "failure entry without module row: {}@{}",
                    entry.module_path, entry.version
                ))
            })?;
            failed.push(decode_record(&value)?);
        }
        Ok(failed)
    }

    /// Make a module version eligible right away, keeping its history.
    pub fn requeue_module_version(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<()> {
        ctx.check("requeue_module_version")?;
        validate_module_key(module_path, version)?;

        let now = self.clock.now();
        let mut tx = self.keyspace.write_tx();
        let previous = self
            .load_module_tx(&tx, module_path, version)?
            .ok_or_else(|| {
                StoreError::NotFound(format!("module version {}@{}", module_path, version))
            })?;
        let mut state = previous.clone();
        state.next_processed_after = Some(now);
        self.put_module_tx(&mut tx, Some(&previous), &state)?;

        ctx.check("requeue_module_version")?;
        tx.commit()?;

        info!(module_path, version, "Requeued module version");
        Ok(())
    }
}
