use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fjall::{Config, PartitionCreateOptions, TxKeyspace, TxPartitionHandle, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::ModuleVersionState;

use super::backoff::RetryPolicy;
use super::clock::{Clock, SystemClock};
use super::error::{Result, StoreError};
use super::partitions::{
    FAILURES, FETCH_QUEUE, INDEX_VERSIONS, METADATA, MODULE_VERSIONS, PACKAGE_VERSIONS,
    STATUS_COUNTS, TIMELINE, encode_meta_key, encode_module_key, encode_ordered_key,
    encode_status_key,
};

/// On-disk layout version. Bump when key or record formats change.
const STORE_FORMAT_VERSION: &str = "2";
const META_FORMAT_VERSION: &str = "format_version";

/// Fjall-backed module version ledger
///
/// Holds the index ledger, module version states and package version states
/// in one transactional keyspace, so an attempt's module row and package rows
/// commit together. Writers are serialized by fjall's single-writer
/// transactions; readers work on snapshots.
///
/// Every module row write also rewrites its entries in the secondary
/// partitions (timeline, fetch queue, failures, status counts) inside the
/// same transaction, so scheduler polls and summaries read ordered keys
/// instead of decoding the whole history.
///
/// The operations themselves live next to their component:
/// - `index.rs`: index ledger
/// - `versions.rs`: module and package version states
/// - `scheduler.rs`: fetch candidates and claims
/// - `stats.rs`: statistics, failure listing, re-queueing
#[derive(Clone)]
pub struct FjallStore {
    pub(super) keyspace: TxKeyspace,
    pub(super) index_versions: TxPartitionHandle,
    pub(super) module_versions: TxPartitionHandle,
    pub(super) package_versions: TxPartitionHandle,
    pub(super) metadata: TxPartitionHandle,
    pub(super) timeline: TxPartitionHandle,
    pub(super) fetch_queue: TxPartitionHandle,
    pub(super) failures: TxPartitionHandle,
    pub(super) status_counts: TxPartitionHandle,
    pub(super) policy: RetryPolicy,
    pub(super) clock: Arc<dyn Clock>,
}

impl FjallStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening Fjall store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open_transactional()?;

        let index_versions =
            keyspace.open_partition(INDEX_VERSIONS, PartitionCreateOptions::default())?;
        let module_versions =
            keyspace.open_partition(MODULE_VERSIONS, PartitionCreateOptions::default())?;
        let package_versions =
            keyspace.open_partition(PACKAGE_VERSIONS, PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition(METADATA, PartitionCreateOptions::default())?;
        let timeline = keyspace.open_partition(TIMELINE, PartitionCreateOptions::default())?;
        let fetch_queue = keyspace.open_partition(FETCH_QUEUE, PartitionCreateOptions::default())?;
        let failures = keyspace.open_partition(FAILURES, PartitionCreateOptions::default())?;
        let status_counts =
            keyspace.open_partition(STATUS_COUNTS, PartitionCreateOptions::default())?;

        let store = Self {
            keyspace,
            index_versions,
            module_versions,
            package_versions,
            metadata,
            timeline,
            fetch_queue,
            failures,
            status_counts,
            policy: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        };
        store.check_format_version()?;

        info!("Fjall store opened successfully");
        Ok(store)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn check_format_version(&self) -> Result<()> {
        let key = encode_meta_key(META_FORMAT_VERSION);
        let mut tx = self.keyspace.write_tx();

        match tx.get(&self.metadata, &key)? {
            Some(stored) if &*stored == STORE_FORMAT_VERSION.as_bytes() => Ok(()),
            Some(stored) => Err(StoreError::Internal(format!(
                "store format mismatch: expected {}, found {}",
                STORE_FORMAT_VERSION,
                String::from_utf8_lossy(&stored)
            ))),
            None => {
                tx.insert(&self.metadata, key, STORE_FORMAT_VERSION.as_bytes().to_vec());
                tx.commit()?;
                debug!(version = STORE_FORMAT_VERSION, "Initialized store format");
                Ok(())
            }
        }
    }

    /// Load a module version state inside a write transaction
    pub(super) fn load_module_tx(
        &self,
        tx: &WriteTransaction,
        module_path: &str,
        version: &str,
    ) -> Result<Option<ModuleVersionState>> {
        let key = encode_module_key(module_path, version);
        tx.get(&self.module_versions, &key)?
            .map(|value| decode_record(&value))
            .transpose()
    }

    /// Write a module row and move its secondary entries from `previous`
    /// (the row as loaded in this transaction) to `state`.
    pub(super) fn put_module_tx(
        &self,
        tx: &mut WriteTransaction,
        previous: Option<&ModuleVersionState>,
        state: &ModuleVersionState,
    ) -> Result<()> {
        if let Some(previous) = previous {
            self.unindex_module_tx(tx, previous)?;
        }

        let key = encode_module_key(&state.module_path, &state.version);
        let value = serde_json::to_vec(state)?;
        tx.insert(&self.module_versions, key, value);

        let ordered = encode_ordered_key(state.index_timestamp, &state.module_path, &state.version);
        if !state.is_settled() {
            let entry = RowRef::from_state(state).due(state.next_processed_after);
            tx.insert(&self.fetch_queue, ordered.clone(), serde_json::to_vec(&entry)?);
        }
        tx.insert(&self.timeline, ordered, b"");

        if state.outcome().is_failure() {
            let key = encode_ordered_key(state.last_processed_at, &state.module_path, &state.version);
            tx.insert(&self.failures, key, serde_json::to_vec(&RowRef::from_state(state))?);
        }

        self.adjust_status_count_tx(tx, state.status, 1)
    }

    fn unindex_module_tx(&self, tx: &mut WriteTransaction, state: &ModuleVersionState) -> Result<()> {
        let ordered = encode_ordered_key(state.index_timestamp, &state.module_path, &state.version);
        tx.remove(&self.fetch_queue, ordered.clone());
        tx.remove(&self.timeline, ordered);
        tx.remove(
            &self.failures,
            encode_ordered_key(state.last_processed_at, &state.module_path, &state.version),
        );
        self.adjust_status_count_tx(tx, state.status, -1)
    }

    fn adjust_status_count_tx(&self, tx: &mut WriteTransaction, status: u16, delta: i64) -> Result<()> {
        let key = encode_status_key(status);
        let current = match tx.get(&self.status_counts, key)? {
            Some(value) => decode_count(&value)?,
            None => 0,
        };
        let updated = current.checked_add_signed(delta).ok_or_else(|| {
            StoreError::Internal(format!("status count for {} out of range", status))
        })?;

        if updated == 0 {
            tx.remove(&self.status_counts, key);
        } else {
            tx.insert(&self.status_counts, key, updated.to_be_bytes());
        }
        Ok(())
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Row counts per partition (for debugging/monitoring)
    pub fn counts(&self) -> Result<StoreCounts> {
        let read_tx = self.keyspace.read_tx();
        let mut counts = StoreCounts::default();

        for item in read_tx.iter(&self.index_versions) {
            item?;
            counts.index_versions += 1;
        }

        for item in read_tx.iter(&self.module_versions) {
            item?;
            counts.module_versions += 1;
        }

        for item in read_tx.iter(&self.package_versions) {
            item?;
            counts.package_versions += 1;
        }

        Ok(counts)
    }
}

pub(super) fn decode_record<T: DeserializeOwned>(value: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(value)?)
}

pub(super) fn decode_count(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| StoreError::Internal(format!("bad row count of {} bytes", value.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Secondary partition value pointing back at a module row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct RowRef {
    pub module_path: String,
    pub version: String,
    /// Fetch queue only: earliest time the row may be handed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
}

impl RowRef {
    fn from_state(state: &ModuleVersionState) -> Self {
        Self {
            module_path: state.module_path.clone(),
            version: state.version.clone(),
            due: None,
        }
    }

    fn due(mut self, due: Option<DateTime<Utc>>) -> Self {
        self.due = due;
        self
    }
}

/// Decode every row of a scanned partition
pub(super) fn decode_rows<T, I, K, V, E>(rows: I) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = std::result::Result<(K, V), E>>,
    V: AsRef<[u8]>,
    StoreError: From<E>,
{
    rows.into_iter()
        .map(|item| {
            let (_, value) = item?;
            decode_record(value.as_ref())
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreCounts {
    pub index_versions: usize,
    pub module_versions: usize,
    pub package_versions: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::clock::ManualClock;
    use crate::ledger::context::OpContext;
    use crate::models::IndexVersion;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    pub(crate) fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    pub(crate) fn create_test_store() -> (FjallStore, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(start_time()));
        let store = FjallStore::open(temp_dir.path().join("test_ledger"))
            .unwrap()
            .with_clock(clock.clone());
        (store, clock, temp_dir)
    }

    #[test]
    fn test_open_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path().join("test_ledger"));
        assert!(store.is_ok());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test_ledger");
        let ctx = OpContext::background();

        {
            let store = FjallStore::open(&path).unwrap();
            store
                .insert_index_versions(&ctx, &[IndexVersion::new("foo.com/bar", "v1.0.0")])
                .unwrap();
            store.persist().unwrap();
        }

        let store = FjallStore::open(&path).unwrap();
        let state = store
            .get_module_version_state(&ctx, "foo.com/bar", "v1.0.0")
            .unwrap();
        assert_eq!(state.try_count, 0);
    }

    #[test]
    fn test_counts() {
        let (store, _clock, _temp) = create_test_store();
        let ctx = OpContext::background();

        store
            .insert_index_versions(
                &ctx,
                &[
                    IndexVersion::new("foo.com/bar", "v1.0.0"),
                    IndexVersion::new("baz.com/quux", "v2.0.1"),
                ],
            )
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.index_versions, 2);
        assert_eq!(counts.module_versions, 2);
        assert_eq!(counts.package_versions, 0);
    }

    #[test]
    fn test_persist() {
        let (store, _clock, _temp) = create_test_store();
        store.persist().unwrap();
    }
}
