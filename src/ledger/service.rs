//! Async access to the ledger.
//!
//! [`VersionStateStore`] is what pollers, workers and operator tooling code
//! against. [`LedgerService`] runs each call on tokio's blocking pool under a
//! deadline; when the deadline passes first, the operation's context is
//! cancelled and the call waits for the task to stop. The caller then gets
//! what the task actually did: `Cancelled` if it rolled back, its real result
//! if it was already committing.
//! [`ReadOnlyLedger`] exposes only the read half of any store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{
    AttemptRecord, IndexVersion, ModuleVersionState, PackageVersionState, VersionStats,
};
use crate::observability::{Metrics, MetricsSnapshot};

use super::context::OpContext;
use super::error::{Result, StoreError};
use super::store::FjallStore;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

fn unsupported(op: &str) -> StoreError {
    StoreError::Unsupported(format!("{} is not supported by this store", op))
}

/// Module version ledger operations.
///
/// Write operations default to `UnsupportedOperation`, so read-only
/// implementations only provide the reads.
#[async_trait]
pub trait VersionStateStore: Send + Sync {
    async fn insert_index_versions(&self, _ctx: &OpContext, _versions: Vec<IndexVersion>) -> Result<()> {
        Err(unsupported("insert_index_versions"))
    }

    async fn latest_index_timestamp(&self, ctx: &OpContext) -> Result<Option<DateTime<Utc>>>;

    async fn get_module_version_state(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<ModuleVersionState>;

    async fn upsert_module_version_state(&self, _ctx: &OpContext, _attempt: AttemptRecord) -> Result<()> {
        Err(unsupported("upsert_module_version_state"))
    }

    async fn get_package_version_state(
        &self,
        ctx: &OpContext,
        package_path: &str,
        module_path: &str,
        version: &str,
    ) -> Result<PackageVersionState>;

    async fn get_package_version_states_for_module(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<Vec<PackageVersionState>>;

    async fn get_next_modules_to_fetch(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>>;

    async fn claim_next_modules_to_fetch(
        &self,
        _ctx: &OpContext,
        _limit: usize,
        _lease: Duration,
    ) -> Result<Vec<ModuleVersionState>> {
        Err(unsupported("claim_next_modules_to_fetch"))
    }

    async fn get_version_stats(&self, ctx: &OpContext) -> Result<VersionStats>;

    async fn get_recent_failed_versions(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>>;

    async fn requeue_module_version(
        &self,
        _ctx: &OpContext,
        _module_path: &str,
        _version: &str,
    ) -> Result<()> {
        Err(unsupported("requeue_module_version"))
    }
}

/// Read/write ledger over a [`FjallStore`]
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<FjallStore>,
    metrics: Arc<Metrics>,
    operation_timeout: Duration,
}

impl LedgerService {
    pub fn new(store: FjallStore) -> Self {
        Self {
            store: Arc::new(store),
            metrics: Arc::new(Metrics::new()),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &FjallStore {
        &self.store
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Flush to disk on the blocking pool
    pub async fn persist(&self) -> Result<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.persist())
            .await
            .map_err(|e| StoreError::Internal(format!("persist task failed: {}", e)))?
    }

    async fn run<T, F>(&self, ctx: &OpContext, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FjallStore, &OpContext) -> Result<T> + Send + 'static,
    {
        ctx.check(op)?;
        let op_ctx = ctx.child_with_timeout(self.operation_timeout);
        let budget = op_ctx.remaining().unwrap_or(self.operation_timeout);

        let store = self.store.clone();
        let worker_ctx = op_ctx.clone();
        let mut handle = tokio::task::spawn_blocking(move || f(&store, &worker_ctx));

        let joined = match tokio::time::timeout(budget, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // past the last check the task commits; otherwise it rolls back
                op_ctx.cancel();
                warn!(op, budget_ms = budget.as_millis() as u64, "Ledger operation timed out");
                handle.await
            }
        };

        joined.map_err(|join_err| StoreError::Internal(format!("{} task failed: {}", op, join_err)))?
    }
}

#[async_trait]
impl VersionStateStore for LedgerService {
    async fn insert_index_versions(&self, ctx: &OpContext, versions: Vec<IndexVersion>) -> Result<()> {
        let count = versions.len();
        self.run(ctx, "insert_index_versions", move |store, ctx| {
            store.insert_index_versions(ctx, &versions)
        })
        .await?;
        self.metrics.index_versions_inserted(count);
        Ok(())
    }

    async fn latest_index_timestamp(&self, ctx: &OpContext) -> Result<Option<DateTime<Utc>>> {
        self.run(ctx, "latest_index_timestamp", |store, ctx| {
            store.latest_index_timestamp(ctx)
        })
        .await
    }

    async fn get_module_version_state(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<ModuleVersionState> {
        let (module_path, version) = (module_path.to_string(), version.to_string());
        self.run(ctx, "get_module_version_state", move |store, ctx| {
            store.get_module_version_state(ctx, &module_path, &version)
        })
        .await
    }

    async fn upsert_module_version_state(&self, ctx: &OpContext, attempt: AttemptRecord) -> Result<()> {
        let failed = attempt.outcome().is_failure();
        self.run(ctx, "upsert_module_version_state", move |store, ctx| {
            store.upsert_module_version_state(ctx, &attempt)
        })
        .await?;
        self.metrics.attempt_recorded(failed);
        Ok(())
    }

    async fn get_package_version_state(
        &self,
        ctx: &OpContext,
        package_path: &str,
        module_path: &str,
        version: &str,
    ) -> Result<PackageVersionState> {
        let package_path = package_path.to_string();
        let (module_path, version) = (module_path.to_string(), version.to_string());
        self.run(ctx, "get_package_version_state", move |store, ctx| {
            store.get_package_version_state(ctx, &package_path, &module_path, &version)
        })
        .await
    }

    async fn get_package_version_states_for_module(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<Vec<PackageVersionState>> {
        let (module_path, version) = (module_path.to_string(), version.to_string());
        self.run(ctx, "get_package_version_states_for_module", move |store, ctx| {
            store.get_package_version_states_for_module(ctx, &module_path, &version)
        })
        .await
    }

    async fn get_next_modules_to_fetch(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>> {
        let candidates = self
            .run(ctx, "get_next_modules_to_fetch", move |store, ctx| {
                store.get_next_modules_to_fetch(ctx, limit)
            })
            .await?;
        self.metrics.candidates_served(candidates.len());
        Ok(candidates)
    }

    async fn claim_next_modules_to_fetch(
        &self,
        ctx: &OpContext,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ModuleVersionState>> {
        let claimed = self
            .run(ctx, "claim_next_modules_to_fetch", move |store, ctx| {
                store.claim_next_modules_to_fetch(ctx, limit, lease)
            })
            .await?;
        self.metrics.claimed(claimed.len());
        Ok(claimed)
    }

    async fn get_version_stats(&self, ctx: &OpContext) -> Result<VersionStats> {
        self.run(ctx, "get_version_stats", |store, ctx| store.get_version_stats(ctx))
            .await
    }

    async fn get_recent_failed_versions(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>> {
        self.run(ctx, "get_recent_failed_versions", move |store, ctx| {
            store.get_recent_failed_versions(ctx, limit)
        })
        .await
    }

    async fn requeue_module_version(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<()> {
        let (module_path, version) = (module_path.to_string(), version.to_string());
        self.run(ctx, "requeue_module_version", move |store, ctx| {
            store.requeue_module_version(ctx, &module_path, &version)
        })
        .await
    }
}

/// Read-only view: reads pass through, writes fail with `UnsupportedOperation`.
pub struct ReadOnlyLedger<S> {
    inner: S,
}

impl<S: VersionStateStore> ReadOnlyLedger<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: VersionStateStore> VersionStateStore for ReadOnlyLedger<S> {
    async fn latest_index_timestamp(&self, ctx: &OpContext) -> Result<Option<DateTime<Utc>>> {
        self.inner.latest_index_timestamp(ctx).await
    }

    async fn get_module_version_state(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<ModuleVersionState> {
        self.inner
            .get_module_version_state(ctx, module_path, version)
            .await
    }

    async fn get_package_version_state(
        &self,
        ctx: &OpContext,
        package_path: &str,
        module_path: &str,
        version: &str,
    ) -> Result<PackageVersionState> {
        self.inner
            .get_package_version_state(ctx, package_path, module_path, version)
            .await
    }

    async fn get_package_version_states_for_module(
        &self,
        ctx: &OpContext,
        module_path: &str,
        version: &str,
    ) -> Result<Vec<PackageVersionState>> {
        self.inner
            .get_package_version_states_for_module(ctx, module_path, version)
            .await
    }

    async fn get_next_modules_to_fetch(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>> {
        self.inner.get_next_modules_to_fetch(ctx, limit).await
    }

    async fn get_version_stats(&self, ctx: &OpContext) -> Result<VersionStats> {
        self.inner.get_version_stats(ctx).await
    }

    async fn get_recent_failed_versions(
        &self,
        ctx: &OpContext,
        limit: usize,
    ) -> Result<Vec<ModuleVersionState>> {
        self.inner.get_recent_failed_versions(ctx, limit).await
    }
}
