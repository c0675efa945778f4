//! Streaming ingestion: spill-to-disk flow, checkpoints, batched commit

mod common;

use std::sync::Arc;

use cloudrate::ingest::{
    AwsPricingApiNormalizer, IngestionCheckpoint, LifecycleConfig, StreamingConfig,
    StreamingLifecycle,
};
use cloudrate::model::{CloudProvider, SnapshotState};
use cloudrate::store::{MemoryStore, PricingStore};
use tempfile::TempDir;

use common::{happy_path_prices, raw_price, FakeFetcher};

fn streaming_over(
    store: Arc<dyn PricingStore>,
    prices: Vec<cloudrate::ingest::RawPrice>,
    work_dir: &TempDir,
) -> StreamingLifecycle {
    let config = StreamingConfig {
        batch_size: 2,
        gc_interval: 1,
        work_dir: work_dir.path().to_path_buf(),
        ..StreamingConfig::default()
    };
    StreamingLifecycle::new(
        Arc::new(FakeFetcher {
            prices,
            real: false,
        }),
        Arc::new(AwsPricingApiNormalizer::new()),
        store,
        config,
    )
}

fn dev_config(backup_dir: &TempDir) -> LifecycleConfig {
    let mut config = LifecycleConfig::new(CloudProvider::Aws, "us-east-1");
    config.environment = "development".to_string();
    config.backup_dir = backup_dir.path().to_path_buf();
    config
}

#[tokio::test]
async fn streaming_commits_through_temp_files() {
    let work_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let streaming = streaming_over(Arc::new(store.clone()), happy_path_prices(), &work_dir);
    let config = dev_config(&backup_dir);

    let result = streaming.execute(&config).await.unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.normalized_count, 3);
    let snapshot_id = result.snapshot_id.expect("snapshot id");

    let active = store
        .get_active_snapshot(CloudProvider::Aws, "us-east-1", "default")
        .await
        .unwrap()
        .expect("active snapshot");
    assert_eq!(active.id, snapshot_id);
    assert_eq!(active.state, SnapshotState::Ready);
    assert_eq!(store.rate_count(), 3);

    // Backup written; checkpoint and temp files cleaned up.
    assert!(result.backup_path.unwrap().exists());
    assert!(!streaming.checkpoint_path(&config).exists());
    let leftovers: Vec<_> = std::fs::read_dir(work_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("pricing_"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn streaming_failure_keeps_checkpoint_for_inspection() {
    let work_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();

    // A negative price survives normalization and trips validation.
    let prices = vec![
        raw_price(
            "AmazonEC2",
            "Compute Instance",
            &[("instanceType", "t3.micro")],
            "Hrs",
            "0.0104",
        ),
        raw_price(
            "AmazonEC2",
            "Compute Instance",
            &[("instanceType", "m5.large")],
            "Hrs",
            "-1",
        ),
        raw_price(
            "AmazonS3",
            "Storage",
            &[("storageClass", "Standard")],
            "GB-Mo",
            "0.023",
        ),
    ];
    let streaming = streaming_over(Arc::new(store.clone()), prices, &work_dir);
    let config = dev_config(&backup_dir);

    let result = streaming.execute(&config).await.unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("negative price"));
    assert_eq!(store.snapshot_count(), 0);

    // Checkpoint and spill files stay behind after a failed run.
    let checkpoint_path = streaming.checkpoint_path(&config);
    assert!(checkpoint_path.exists());
    let checkpoint: IngestionCheckpoint =
        serde_json::from_slice(&std::fs::read(&checkpoint_path).unwrap()).unwrap();
    assert_eq!(checkpoint.provider, "aws");
    assert_eq!(checkpoint.region, "us-east-1");
    assert!(checkpoint.total_prices > 0);
    assert_eq!(
        checkpoint.completed_services,
        vec!["AmazonEC2".to_string(), "AmazonS3".to_string()]
    );
    assert!(!checkpoint.temp_files.is_empty());
    assert!(checkpoint.temp_files.iter().all(|f| f.exists()));
}

#[tokio::test]
async fn resume_skips_completed_services_without_duplicating() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    use cloudrate::ingest::validator::make_rate;

    let work_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let streaming = streaming_over(Arc::new(store.clone()), happy_path_prices(), &work_dir);
    let config = dev_config(&backup_dir);

    // Artifacts of an interrupted earlier run: AmazonS3 already normalized
    // and spilled, the EC2 services still outstanding.
    let s3_rate = make_rate(
        CloudProvider::Aws,
        "AmazonS3",
        "Storage",
        "us-east-1",
        &[("storage_class", "standard")],
        "GB-month",
        "0.023",
    );
    let temp_path = work_dir
        .path()
        .join("pricing_aws_us-east-1_amazons3_1.jsonl.gz");
    let mut encoder = GzEncoder::new(
        std::fs::File::create(&temp_path).unwrap(),
        Compression::default(),
    );
    serde_json::to_writer(&mut encoder, &s3_rate).unwrap();
    encoder.write_all(b"\n").unwrap();
    encoder.finish().unwrap();

    let checkpoint = IngestionCheckpoint {
        provider: "aws".to_string(),
        region: "us-east-1".to_string(),
        started_at: None,
        completed_services: vec!["AmazonS3".to_string()],
        total_prices: 1,
        temp_files: vec![temp_path.clone()],
    };
    std::fs::write(
        streaming.checkpoint_path(&config),
        serde_json::to_vec(&checkpoint).unwrap(),
    )
    .unwrap();

    let result = streaming.execute(&config).await.unwrap();

    // Two EC2 rates fetched fresh plus the carried S3 rate. A rerun that
    // re-normalized AmazonS3 on top of the stale spill would commit four.
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.normalized_count, 3);
    assert_eq!(store.rate_count(), 3);
    assert_eq!(store.snapshot_count(), 1);

    // Resume artifacts are gone after the successful run.
    assert!(!streaming.checkpoint_path(&config).exists());
    assert!(!temp_path.exists());
}

#[tokio::test]
async fn streaming_reingest_is_idempotent() {
    let work_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let config = dev_config(&backup_dir);

    let first = streaming_over(Arc::new(store.clone()), happy_path_prices(), &work_dir)
        .execute(&config)
        .await
        .unwrap();
    let second = streaming_over(Arc::new(store.clone()), happy_path_prices(), &work_dir)
        .execute(&config)
        .await
        .unwrap();

    assert!(first.success && second.success);
    assert_eq!(first.snapshot_id, second.snapshot_id);
    assert_eq!(store.snapshot_count(), 1);
    assert_eq!(store.rate_count(), 3);
}

#[tokio::test]
async fn dry_run_skips_commit_but_writes_backup() {
    let work_dir = TempDir::new().unwrap();
    let backup_dir = TempDir::new().unwrap();
    let store = MemoryStore::new();
    let streaming = streaming_over(Arc::new(store.clone()), happy_path_prices(), &work_dir);

    let mut config = dev_config(&backup_dir);
    config.dry_run = true;

    let result = streaming.execute(&config).await.unwrap();

    assert!(result.success);
    assert!(result.snapshot_id.is_none());
    assert!(result.backup_path.unwrap().exists());
    assert_eq!(store.snapshot_count(), 0);
}
