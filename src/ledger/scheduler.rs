//! Fetch scheduler: which module versions a worker should process next.
//!
//! Candidates come from the `fetch_queue` partition, whose keys already sort
//! newest index timestamp first (unknown last), then module path, then
//! version. Settled versions have no queue entry, so a poll only walks the
//! entries still waiting on a backoff or lease before it has `limit` rows.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::ModuleVersionState;

use super::backoff::add_duration;
use super::context::OpContext;
use super::error::{Result, StoreError};
use super::partitions::encode_module_key;
use super::store::{FjallStore, RowRef, decode_record};

impl FjallStore {
    /// Up to `limit` eligible module versions, newest index timestamp first.
    ///
    /// A plain read: two callers may receive the same rows. Use
    /// [`FjallStore::claim_next_modules_to_fetch`] when that matters.
    pub fn get_next_modules_to_fetch(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>> {
        ctx.check("get_next_modules_to_fetch")?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let read_tx = self.keyspace.read_tx();
        let candidates = select_candidates(read_tx.iter(&self.fetch_queue), now, limit, |entry| {
            read_tx
                .get(
                    &self.module_versions,
                    encode_module_key(&entry.module_path, &entry.version),
                )?
                .map(|value| decode_record(&value))
                .transpose()
        })?;

        debug!(limit, returned = candidates.len(), "Selected modules to fetch");
        Ok(candidates)
    }

    /// Same selection as [`FjallStore::get_next_modules_to_fetch`], but every
    /// returned row is leased until `now + lease` in the same transaction.
    ///
    /// Concurrent claimers never receive the same row while its lease runs.
    /// `try_count` is left alone; the worker's upsert records the attempt.
    pub fn claim_next_modules_to_fetch(
        &self,
        ctx: &OpContext,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ModuleVersionState>> {
        ctx.check("claim_next_modules_to_fetch")?;
        if lease.is_zero() {
            return Err(StoreError::InvalidArgument("lease must be non-zero".into()));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let lease_until = add_duration(now, lease);
        let mut tx = self.keyspace.write_tx();

        let selected = select_candidates(tx.iter(&self.fetch_queue), now, limit, |entry| {
            self.load_module_tx(&tx, &entry.module_path, &entry.version)
        })?;

        let mut claimed = Vec::with_capacity(selected.len());
        for previous in selected {
            let mut state = previous.clone();
            state.next_processed_after = Some(lease_until);
            self.put_module_tx(&mut tx, Some(&previous), &state)?;
            claimed.push(state);
        }

        ctx.check("claim_next_modules_to_fetch")?;
        tx.commit()?;

        debug!(
            limit,
            claimed = claimed.len(),
            lease_secs = lease.as_secs(),
            "Claimed modules to fetch"
        );
        Ok(claimed)
    }
}

/// Walk queue entries in key order, skipping those not yet due, until
/// `limit` module rows are loaded.
fn select_candidates<I, K, V, E, F>(
    queue: I,
    now: DateTime<Utc>,
    limit: usize,
    mut load: F,
) -> Result<Vec<ModuleVersionState>>
where
    I: IntoIterator<Item = std::result::Result<(K, V), E>>,
    V: AsRef<[u8]>,
    StoreError: From<E>,
    F: FnMut(&RowRef) -> Result<Option<ModuleVersionState>>,
{
    let mut selected = Vec::new();
    for item in queue {
        let (_, value) = item?;
        let entry: RowRef = decode_record(value.as_ref())?;
        if entry.due.is_some_and(|due| due > now) {
            continue;
        }

        let state = load(&entry)?.ok_or_else(|| {
            StoreError::Internal(format!(
                "fetch queue entry without module row: {}@{}",
                entry.module_path, entry.version
            ))
        })?;
        selected.push(state);
        if selected.len() == limit {
            break;
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::error::ErrorKind;
    use crate::ledger::store::tests::{create_test_store, start_time};
    use crate::models::{AttemptRecord, IndexVersion};
    use chrono::Duration as ChronoDuration;

    fn keys(states: &[ModuleVersionState]) -> Vec<(String, String)> {
        states
            .iter()
            .map(|s| (s.module_path.clone(), s.version.clone()))
            .collect()
    }

    fn key(path: &str, version: &str) -> (String, String) {
        (path.to_string(), version.to_string())
    }

    fn record(store: &FjallStore, path: &str, version: &str, status: u16) {
        let attempt = AttemptRecord::builder()
            .module_path(path)
            .version(version)
            .status(status)
            .build();
        store
            .upsert_module_version_state(&OpContext::background(), &attempt)
            .unwrap();
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let (store, _clock, _temp) = create_test_store();
        let got = store
            .get_next_modules_to_fetch(&OpContext::background(), 10)
            .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_limit_zero_returns_nothing() {
        let (store, _clock, _temp) = create_test_store();
        let ctx = OpContext::background();
        store
            .insert_index_versions(&ctx, &[IndexVersion::new("foo.com/bar", "v1.0.0")])
            .unwrap();

        assert!(store.get_next_modules_to_fetch(&ctx, 0).unwrap().is_empty());
    }

    #[test]
    fn test_ordering() {
        let (store, _clock, _temp) = create_test_store();
        let ctx = OpContext::background();
        let ts = start_time();

        store
            .insert_index_versions(
                &ctx,
                &[
                    IndexVersion::new("b.com/mod", "v1.0.0").with_timestamp(ts),
                    IndexVersion::new("a.com/mod", "v1.0.0").with_timestamp(ts),
                    IndexVersion::new("a.com/mod", "v0.9.0").with_timestamp(ts),
                    IndexVersion::new("z.com/new", "v0.1.0")
                        .with_timestamp(ts + ChronoDuration::hours(1)),
                    IndexVersion::new("c.com/untimed", "v1.0.0"),
                ],
            )
            .unwrap();

        let got = store.get_next_modules_to_fetch(&ctx, 10).unwrap();
        assert_eq!(
            keys(&got),
            vec![
                key("z.com/new", "v0.1.0"),
                key("a.com/mod", "v0.9.0"),
                key("a.com/mod", "v1.0.0"),
                key("b.com/mod", "v1.0.0"),
                key("c.com/untimed", "v1.0.0"),
            ]
        );

        let got = store.get_next_modules_to_fetch(&ctx, 2).unwrap();
        assert_eq!(
            keys(&got),
            vec![key("z.com/new", "v0.1.0"), key("a.com/mod", "v0.9.0")]
        );
    }

    #[test]
    fn test_read_does_not_claim() {
        let (store, _clock, _temp) = create_test_store();
        let ctx = OpContext::background();
        store
            .insert_index_versions(&ctx, &[IndexVersion::new("foo.com/bar", "v1.0.0")])
            .unwrap();

        assert_eq!(store.get_next_modules_to_fetch(&ctx, 5).unwrap().len(), 1);
        assert_eq!(store.get_next_modules_to_fetch(&ctx, 5).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_version_waits_for_backoff() {
        let (store, clock, _temp) = create_test_store();
        let ctx = OpContext::background();

        record(&store, "foo.com/bar", "v1.0.0", 500);
        assert!(store.get_next_modules_to_fetch(&ctx, 5).unwrap().is_empty());

        clock.advance(Duration::from_secs(59));
        assert!(store.get_next_modules_to_fetch(&ctx, 5).unwrap().is_empty());

        clock.advance(Duration::from_secs(1));
        let got = store.get_next_modules_to_fetch(&ctx, 5).unwrap();
        assert_eq!(keys(&got), vec![key("foo.com/bar", "v1.0.0")]);
        assert_eq!(got[0].try_count, 1);
    }

    #[test]
    fn test_settled_version_is_never_returned() {
        let (store, clock, _temp) = create_test_store();
        let ctx = OpContext::background();

        record(&store, "foo.com/bar", "v1.0.0", 200);
        clock.advance(Duration::from_secs(86400 * 365));
        assert!(store.get_next_modules_to_fetch(&ctx, 5).unwrap().is_empty());
    }

    #[test]
    fn test_claim_is_exclusive_until_lease_expires() {
        let (store, clock, _temp) = create_test_store();
        let ctx = OpContext::background();
        let lease = Duration::from_secs(600);

        store
            .insert_index_versions(
                &ctx,
                &[
                    IndexVersion::new("foo.com/bar", "v1.0.0"),
                    IndexVersion::new("baz.com/quux", "v2.0.1"),
                ],
            )
            .unwrap();

        let first = store.claim_next_modules_to_fetch(&ctx, 1, lease).unwrap();
        assert_eq!(keys(&first), vec![key("baz.com/quux", "v2.0.1")]);
        assert_eq!(
            first[0].next_processed_after,
            Some(start_time() + ChronoDuration::minutes(10))
        );
        assert_eq!(first[0].try_count, 0);

        let second = store.claim_next_modules_to_fetch(&ctx, 5, lease).unwrap();
        assert_eq!(keys(&second), vec![key("foo.com/bar", "v1.0.0")]);

        assert!(store.claim_next_modules_to_fetch(&ctx, 5, lease).unwrap().is_empty());
        assert!(store.get_next_modules_to_fetch(&ctx, 5).unwrap().is_empty());

        clock.advance(lease);
        let again = store.claim_next_modules_to_fetch(&ctx, 5, lease).unwrap();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn test_settled_versions_leave_the_queue() {
        let (store, clock, _temp) = create_test_store();
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

        record(&store, "foo.com/bar", "v1.0.0", 200);
        record(&store, "baz.com/quux", "v2.0.1", 500);

        let queued = store.keyspace.read_tx().iter(&store.fetch_queue).count();
        assert_eq!(queued, 1);

        clock.advance(Duration::from_secs(60));
        let got = store.get_next_modules_to_fetch(&ctx, 5).unwrap();
        assert_eq!(keys(&got), vec![key("baz.com/quux", "v2.0.1")]);
    }

    #[test]
    fn test_waiting_rows_do_not_block_due_ones() {
        let (store, clock, _temp) = create_test_store();
        let ctx = OpContext::background();
        let ts = start_time();

        store
            .insert_index_versions(
                &ctx,
                &[
                    IndexVersion::new("new.com/mod", "v1.0.0")
                        .with_timestamp(ts + ChronoDuration::hours(1)),
                    IndexVersion::new("old.com/mod", "v1.0.0").with_timestamp(ts),
                ],
            )
            .unwrap();
        record(&store, "new.com/mod", "v1.0.0", 500);

        let got = store.get_next_modules_to_fetch(&ctx, 1).unwrap();
        assert_eq!(keys(&got), vec![key("old.com/mod", "v1.0.0")]);

        clock.advance(Duration::from_secs(60));
        let got = store.get_next_modules_to_fetch(&ctx, 1).unwrap();
        assert_eq!(keys(&got), vec![key("new.com/mod", "v1.0.0")]);
    }

    #[test]
    fn test_claim_rejects_zero_lease() {
        let (store, _clock, _temp) = create_test_store();
        let err = store
            .claim_next_modules_to_fetch(&OpContext::background(), 5, Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_cancelled_claim_leases_nothing() {
        let (store, _clock, _temp) = create_test_store();
        let ctx = OpContext::background();
        store
            .insert_index_versions(&ctx, &[IndexVersion::new("foo.com/bar", "v1.0.0")])
            .unwrap();

        let cancelled = OpContext::background();
        cancelled.cancel();
        let err = store
            .claim_next_modules_to_fetch(&cancelled, 5, Duration::from_secs(60))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(store.get_next_modules_to_fetch(&ctx, 5).unwrap().len(), 1);
    }
}
