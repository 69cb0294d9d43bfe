//! Index ledger: the entry point of module versions into the pipeline.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{IndexVersion, ModuleVersionState};

use super::context::OpContext;
use super::error::Result;
use super::partitions::{decode_ordered_instant, encode_index_key, validate_module_key};
use super::store::{FjallStore, decode_record};

impl FjallStore {
    /// Record versions announced by the upstream index.
    ///
    /// Idempotent per (path, version). A stored timestamp is only replaced by
    /// a non-empty incoming one, so a version can be registered first and have
    /// its timestamp backfilled later. Versions seen for the first time get an
    /// untried module version state. The batch commits as a whole; repeated
    /// keys inside it are applied in order.
    pub fn insert_index_versions(&self, ctx: &OpContext, versions: &[IndexVersion]) -> Result<()> {
        ctx.check("insert_index_versions")?;
        for version in versions {
            validate_module_key(&version.path, &version.version)?;
        }
        if versions.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let mut tx = self.keyspace.write_tx();
        let mut seeded = 0usize;

        for incoming in versions {
            let index_key = encode_index_key(&incoming.path, &incoming.version);
            let record = match tx.get(&self.index_versions, &index_key)? {
                Some(value) => {
                    let mut stored: IndexVersion = decode_record(&value)?;
                    if incoming.timestamp.is_some() {
                        stored.timestamp = incoming.timestamp;
                    }
                    stored
                }
                None => incoming.clone(),
            };
            tx.insert(&self.index_versions, index_key, serde_json::to_vec(&record)?);

            match self.load_module_tx(&tx, &incoming.path, &incoming.version)? {
                Some(previous) => {
                    if incoming.timestamp.is_some() && previous.index_timestamp != incoming.timestamp {
                        let mut state = previous.clone();
                        state.index_timestamp = incoming.timestamp;
                        self.put_module_tx(&mut tx, Some(&previous), &state)?;
                    }
                }
                None => {
                    let state = ModuleVersionState::untried(
                        &incoming.path,
                        &incoming.version,
                        incoming.timestamp,
                        now,
                    );
                    self.put_module_tx(&mut tx, None, &state)?;
                    seeded += 1;
                }
            }
        }

        ctx.check("insert_index_versions")?;
        tx.commit()?;

        debug!(count = versions.len(), seeded, "Inserted index versions");
        Ok(())
    }

    /// Point lookup of an index ledger entry
    pub fn get_index_version(
        &self,
        ctx: &OpContext,
        path: &str,
        version: &str,
    ) -> Result<Option<IndexVersion>> {
        ctx.check("get_index_version")?;
        let read_tx = self.keyspace.read_tx();
        read_tx
            .get(&self.index_versions, encode_index_key(path, version))?
            .map(|value| decode_record(&value))
            .transpose()
    }

    /// Newest index timestamp across all module versions; `None` when none
    /// carries one yet.
    pub fn latest_index_timestamp(&self, ctx: &OpContext) -> Result<Option<DateTime<Utc>>> {
        ctx.check("latest_index_timestamp")?;
        let read_tx = self.keyspace.read_tx();
        match read_tx.first_key_value(&self.timeline)? {
            Some((key, _)) => decode_ordered_instant(&key),
            None => Ok(None),
        }
    }
}
