use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use fetchledger::ledger::{
    FjallStore, LedgerService, ManualClock, OpContext, ReadOnlyLedger, RetryPolicy,
    SuccessPolicy, VersionStateStore,
};
use fetchledger::models::{AttemptRecord, IndexVersion, PackageVersionState, VersionStats};

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// Builds a ledger with an isolated store and a hand-driven clock
fn build_test_ledger(policy: RetryPolicy) -> (LedgerService, Arc<ManualClock>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = FjallStore::open(temp_dir.path().join("ledger"))
        .expect("Failed to open test store")
        .with_policy(policy)
        .with_clock(clock.clone());
    (LedgerService::new(store), clock, temp_dir)
}

#[tokio::test]
async fn test_version_lifecycle() {
    let (ledger, _clock, _temp) = build_test_ledger(RetryPolicy::default());
    let ctx = OpContext::background();

    assert_eq!(ledger.latest_index_timestamp(&ctx).await.unwrap(), None);

    let now = start_time();
    let latest = now + chrono::Duration::seconds(10);

    // registered without a timestamp first, backfilled below
    ledger
        .insert_index_versions(&ctx, vec![IndexVersion::new("foo.com/bar", "v1.0.0")])
        .await
        .unwrap();
    ledger
        .insert_index_versions(
            &ctx,
            vec![
                IndexVersion::new("foo.com/bar", "v1.0.0").with_timestamp(now),
                IndexVersion::new("baz.com/quux", "v2.0.1").with_timestamp(latest),
            ],
        )
        .await
        .unwrap();
    assert_eq!(
        ledger.latest_index_timestamp(&ctx).await.unwrap(),
        Some(latest)
    );

    let next = ledger.get_next_modules_to_fetch(&ctx, 10).await.unwrap();
    let got: Vec<_> = next
        .iter()
        .map(|s| (s.module_path.as_str(), s.version.as_str(), s.index_timestamp))
        .collect();
    assert_eq!(
        got,
        vec![
            ("baz.com/quux", "v2.0.1", Some(latest)),
            ("foo.com/bar", "v1.0.0", Some(now)),
        ]
    );
    assert!(next.iter().all(|s| s.try_count == 0 && s.status == 0));

    let package = PackageVersionState::new("foo.com/bar/foo", "foo.com/bar", "v1.0.0", 500);
    let attempt = AttemptRecord::builder()
        .module_path("foo.com/bar")
        .version("v1.0.0")
        .index_timestamp(now)
        .go_mod_path("goModPath")
        .status(500)
        .error("bad request")
        .package_states(vec![package.clone()])
        .build();
    ledger.upsert_module_version_state(&ctx, attempt).await.unwrap();

    let foo = ledger
        .get_module_version_state(&ctx, "foo.com/bar", "v1.0.0")
        .await
        .unwrap();
    assert_eq!(foo.index_timestamp, Some(now));
    assert_eq!(foo.try_count, 1);
    assert_eq!(foo.go_mod_path, "goModPath");
    assert_eq!(foo.error, "bad request");
    assert_eq!(foo.status, 500);
    assert_eq!(foo.num_packages, Some(1));

    let got = ledger
        .get_package_version_state(&ctx, "foo.com/bar/foo", "foo.com/bar", "v1.0.0")
        .await
        .unwrap();
    assert_eq!(got, package);

    let got = ledger
        .get_package_version_states_for_module(&ctx, "foo.com/bar", "v1.0.0")
        .await
        .unwrap();
    assert_eq!(got, vec![package]);

    let stats = ledger.get_version_stats(&ctx).await.unwrap();
    assert_eq!(
        stats,
        VersionStats {
            latest_timestamp: Some(latest),
            version_counts: BTreeMap::from([(0, 1), (500, 1)]),
        }
    );

    let failed = ledger.get_recent_failed_versions(&ctx, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].module_path, "foo.com/bar");
}

#[tokio::test]
async fn test_retry_then_success() {
    let (ledger, clock, _temp) = build_test_ledger(RetryPolicy::default());
    let ctx = OpContext::background();

    ledger
        .insert_index_versions(&ctx, vec![IndexVersion::new("foo.com/bar", "v1.0.0")])
        .await
        .unwrap();

    for (attempt_no, wait_secs) in [(1u32, 60u64), (2, 120), (3, 240)] {
        let attempt = AttemptRecord::builder()
            .module_path("foo.com/bar")
            .version("v1.0.0")
            .status(503)
            .error("upstream unavailable")
            .build();
        ledger.upsert_module_version_state(&ctx, attempt).await.unwrap();

        let state = ledger
            .get_module_version_state(&ctx, "foo.com/bar", "v1.0.0")
            .await
            .unwrap();
        assert_eq!(state.try_count, attempt_no);
        assert!(ledger.get_next_modules_to_fetch(&ctx, 10).await.unwrap().is_empty());

        clock.advance(Duration::from_secs(wait_secs));
        assert_eq!(ledger.get_next_modules_to_fetch(&ctx, 10).await.unwrap().len(), 1);
    }

    let attempt = AttemptRecord::builder()
        .module_path("foo.com/bar")
        .version("v1.0.0")
        .status(200)
        .build();
    ledger.upsert_module_version_state(&ctx, attempt).await.unwrap();

    let state = ledger
        .get_module_version_state(&ctx, "foo.com/bar", "v1.0.0")
        .await
        .unwrap();
    assert_eq!(state.try_count, 4);
    assert_eq!(state.error, "");
    assert_eq!(state.next_processed_after, None);
    assert!(ledger.get_recent_failed_versions(&ctx, 10).await.unwrap().is_empty());

    clock.advance(Duration::from_secs(86400 * 30));
    assert!(ledger.get_next_modules_to_fetch(&ctx, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_revalidate_policy_reschedules_success() {
    let policy = RetryPolicy {
        on_success: SuccessPolicy::Revalidate(Duration::from_secs(3600)),
        ..RetryPolicy::default()
    };
    let (ledger, clock, _temp) = build_test_ledger(policy);
    let ctx = OpContext::background();

    let attempt = AttemptRecord::builder()
        .module_path("foo.com/bar")
        .version("v1.0.0")
        .status(200)
        .build();
    ledger.upsert_module_version_state(&ctx, attempt).await.unwrap();
    assert!(ledger.get_next_modules_to_fetch(&ctx, 10).await.unwrap().is_empty());

    clock.advance(Duration::from_secs(3600));
    let next = ledger.get_next_modules_to_fetch(&ctx, 10).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].status, 200);
}

#[tokio::test]
async fn test_concurrent_claims_do_not_overlap() {
    let (ledger, _clock, _temp) = build_test_ledger(RetryPolicy::default());
    let ctx = OpContext::background();

    let versions: Vec<_> = (0..20)
        .map(|i| IndexVersion::new(format!("example.com/mod{:02}", i), "v1.0.0"))
        .collect();
    ledger.insert_index_versions(&ctx, versions).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .claim_next_modules_to_fetch(&OpContext::background(), 5, Duration::from_secs(600))
                .await
                .unwrap()
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(
            handle
                .await
                .unwrap()
                .into_iter()
                .map(|state| state.module_path),
        );
    }
    claimed.sort();
    claimed.dedup();
    assert_eq!(claimed.len(), 20);
    assert_eq!(ledger.metrics().claims, 20);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ledger");
    let ctx = OpContext::background();

    {
        let ledger = LedgerService::new(FjallStore::open(&path).unwrap());
        let attempt = AttemptRecord::builder()
            .module_path("foo.com/bar")
            .version("v1.0.0")
            .status(404)
            .package_states(vec![PackageVersionState::new(
                "foo.com/bar",
                "foo.com/bar",
                "v1.0.0",
                404,
            )])
            .build();
        ledger.upsert_module_version_state(&ctx, attempt).await.unwrap();
        ledger.persist().await.unwrap();
    }

    let ledger = ReadOnlyLedger::new(LedgerService::new(FjallStore::open(&path).unwrap()));
    let state = ledger
        .get_module_version_state(&ctx, "foo.com/bar", "v1.0.0")
        .await
        .unwrap();
    assert_eq!(state.status, 404);
    let packages = ledger
        .get_package_version_states_for_module(&ctx, "foo.com/bar", "v1.0.0")
        .await
        .unwrap();
    assert_eq!(packages.len(), 1);
}
