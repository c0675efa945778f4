//! End-to-end ingestion lifecycle scenarios over the in-memory store

mod common;

use std::sync::Arc;

use cloudrate::ingest::{
    AwsPricingApiNormalizer, IngestionContract, IngestionPhase, IngestionValidator, Lifecycle,
    LifecycleConfig,
};
use cloudrate::model::{CloudProvider, SnapshotState};
use cloudrate::store::{MemoryStore, PricingStore};
use tempfile::TempDir;

use common::{happy_path_prices, raw_price, seed_active_snapshot, ActivationFailingStore, FakeFetcher};

fn dev_config(backup_dir: &TempDir) -> LifecycleConfig {
    let mut config = LifecycleConfig::new(CloudProvider::Aws, "us-east-1");
    config.environment = "development".to_string();
    config.backup_dir = backup_dir.path().to_path_buf();
    config
}

fn lifecycle_over(store: Arc<dyn PricingStore>, prices: Vec<cloudrate::ingest::RawPrice>) -> Lifecycle {
    Lifecycle::new(
        Arc::new(FakeFetcher {
            prices,
            real: false,
        }),
        Arc::new(AwsPricingApiNormalizer::new()),
        store,
    )
}

#[tokio::test]
async fn happy_path_commits_one_active_snapshot() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let lifecycle = lifecycle_over(Arc::new(store.clone()), happy_path_prices());

    let result = lifecycle.execute(&dev_config(&backup_dir)).await.unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.phase, IngestionPhase::Active);
    assert_eq!(result.raw_count, 3);
    assert_eq!(result.normalized_count, 3);
    let snapshot_id = result.snapshot_id.expect("snapshot id");

    // One snapshot row, three rate rows.
    assert_eq!(store.snapshot_count(), 1);
    assert_eq!(store.rate_count(), 3);
    assert_eq!(store.count_rates(snapshot_id).await.unwrap(), 3);

    // Active and ready.
    let active = store
        .get_active_snapshot(CloudProvider::Aws, "us-east-1", "default")
        .await
        .unwrap()
        .expect("active snapshot");
    assert_eq!(active.id, snapshot_id);
    assert_eq!(active.state, SnapshotState::Ready);
    assert!(active.is_active);
    assert_eq!(active.hash, result.content_hash.clone().unwrap());

    // Backup file exists under <dir>/aws/us-east-1_*.json.gz.
    let backup_path = result.backup_path.expect("backup path");
    assert!(backup_path.exists());
    assert!(backup_path.starts_with(backup_dir.path().join("aws")));
    let name = backup_path.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("us-east-1_") && name.ends_with(".json.gz"));
}

#[tokio::test]
async fn reingesting_unchanged_pricing_is_idempotent() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let config = dev_config(&backup_dir);

    let lifecycle = lifecycle_over(Arc::new(store.clone()), happy_path_prices());
    let first = lifecycle.execute(&config).await.unwrap();
    let second = lifecycle.execute(&config).await.unwrap();

    assert!(first.success && second.success);
    assert_eq!(first.snapshot_id, second.snapshot_id);
    assert_eq!(first.content_hash, second.content_hash);

    // Row counts unchanged by the second run.
    assert_eq!(store.snapshot_count(), 1);
    assert_eq!(store.rate_count(), 3);
}

#[tokio::test]
async fn missing_required_dimension_fails_validation() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();

    let mut validator = IngestionValidator::new();
    validator.add_contract(IngestionContract::new(
        CloudProvider::Aws,
        "AmazonEC2",
        &["instance_type"],
        1,
    ));

    // EC2 rates without an instanceType attribute.
    let prices = vec![raw_price(
        "AmazonEC2",
        "Compute Instance",
        &[("operatingSystem", "Linux")],
        "Hrs",
        "0.0104",
    )];
    let lifecycle =
        lifecycle_over(Arc::new(store.clone()), prices).with_validator(validator);

    let result = lifecycle.execute(&dev_config(&backup_dir)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.phase, IngestionPhase::Failed);
    let error = result.error.unwrap();
    assert!(error.contains("validating"), "got: {error}");
    assert!(error.contains("instance_type"), "got: {error}");

    // No snapshot, no rates, no backup.
    assert_eq!(store.snapshot_count(), 0);
    assert_eq!(store.rate_count(), 0);
    assert!(result.backup_path.is_none());
}

#[tokio::test]
async fn coverage_drop_keeps_previous_snapshot_active() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();

    let previous_id = seed_active_snapshot(
        &store,
        CloudProvider::Aws,
        "us-east-1",
        "default",
        "previous-hash",
        100,
    )
    .await;

    // 80 new rates = 80% of previous, below the 95% floor.
    let prices: Vec<_> = (0..80)
        .map(|i| {
            raw_price(
                "AmazonEC2",
                "Compute Instance",
                &[("instanceType", &format!("new.{i}"))],
                "Hrs",
                "0.0104",
            )
        })
        .collect();
    let lifecycle = lifecycle_over(Arc::new(store.clone()), prices);

    let result = lifecycle.execute(&dev_config(&backup_dir)).await.unwrap();

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("coverage"), "got: {error}");

    // The previous snapshot is untouched and still active.
    let active = store
        .get_active_snapshot(CloudProvider::Aws, "us-east-1", "default")
        .await
        .unwrap()
        .expect("previous snapshot still active");
    assert_eq!(active.id, previous_id);
    assert_eq!(store.snapshot_count(), 1);
    assert_eq!(store.rate_count(), 100);
}

#[tokio::test]
async fn unwritable_backup_dir_aborts_before_commit() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let lifecycle = lifecycle_over(Arc::new(store.clone()), happy_path_prices());

    let mut config = dev_config(&backup_dir);
    // A file where the backup directory should be makes every write fail.
    let blocked = backup_dir.path().join("blocked");
    std::fs::write(&blocked, b"x").unwrap();
    config.backup_dir = blocked.join("aws-sub");

    let result = lifecycle.execute(&config).await.unwrap();

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("backed_up"), "got: {error}");
    assert_eq!(store.snapshot_count(), 0);
    assert_eq!(store.rate_count(), 0);
}

#[tokio::test]
async fn production_refuses_mock_pricing() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let lifecycle = lifecycle_over(Arc::new(store.clone()), happy_path_prices());

    let mut config = dev_config(&backup_dir);
    config.environment = "production".to_string();
    config.allow_mock_pricing = true;

    let result = lifecycle.execute(&config).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("mock pricing"));
    assert_eq!(result.raw_count, 0, "guard must fire before fetching");
}

#[tokio::test]
async fn production_refuses_non_real_api_fetcher() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    // FakeFetcher reports is_real_api() == false.
    let lifecycle = lifecycle_over(Arc::new(store.clone()), happy_path_prices());

    let mut config = dev_config(&backup_dir);
    config.environment = "production".to_string();

    let result = lifecycle.execute(&config).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("real API"));
    assert_eq!(store.snapshot_count(), 0);
}

#[tokio::test]
async fn dry_run_backs_up_but_never_commits() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let lifecycle = lifecycle_over(Arc::new(store.clone()), happy_path_prices());

    let mut config = dev_config(&backup_dir);
    config.dry_run = true;

    let result = lifecycle.execute(&config).await.unwrap();

    assert!(result.success);
    assert!(result.snapshot_id.is_none());
    assert!(result.backup_path.unwrap().exists());
    assert_eq!(store.snapshot_count(), 0);
    assert_eq!(store.rate_count(), 0);
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_state() {
    let backup_dir = TempDir::new().unwrap();
    let inner = MemoryStore::new();
    let store = ActivationFailingStore {
        inner: inner.clone(),
    };
    let lifecycle = lifecycle_over(Arc::new(store), happy_path_prices());

    let result = lifecycle.execute(&dev_config(&backup_dir)).await.unwrap();

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("committing"), "got: {error}");

    // The transaction buffered a snapshot and rates, then rolled back.
    assert_eq!(inner.snapshot_count(), 0);
    assert_eq!(inner.rate_count(), 0);
}

#[tokio::test]
async fn newer_snapshot_archives_the_previous_one() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let config = dev_config(&backup_dir);

    let first = lifecycle_over(Arc::new(store.clone()), happy_path_prices())
        .execute(&config)
        .await
        .unwrap();

    // Same shape, one price changed: new content hash, new snapshot.
    let mut prices = happy_path_prices();
    prices[0].price_per_unit = "0.0110".to_string();
    let second = lifecycle_over(Arc::new(store.clone()), prices)
        .execute(&config)
        .await
        .unwrap();

    assert!(first.success && second.success);
    assert_ne!(first.snapshot_id, second.snapshot_id);
    assert_eq!(store.snapshot_count(), 2);

    // Exactly one active snapshot; the first is archived.
    let snapshots = store
        .list_snapshots(CloudProvider::Aws, "us-east-1")
        .await
        .unwrap();
    let active: Vec<_> = snapshots
        .iter()
        .filter(|s| s.is_active && s.state == SnapshotState::Ready)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.snapshot_id.unwrap());

    let archived = snapshots
        .iter()
        .find(|s| s.id == first.snapshot_id.unwrap())
        .unwrap();
    assert!(!archived.is_active);
    assert_eq!(archived.state, SnapshotState::Archived);
}

#[tokio::test]
async fn empty_fetch_fails_in_fetching_phase() {
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let lifecycle = lifecycle_over(Arc::new(store.clone()), Vec::new());

    let result = lifecycle.execute(&dev_config(&backup_dir)).await.unwrap();

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("fetching"), "got: {error}");
    assert!(error.contains("0 prices"), "got: {error}");
}
