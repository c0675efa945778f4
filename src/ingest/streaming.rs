//! Streaming ingestion for memory-bounded environments
//!
//! Substitutes a spill-to-disk pipeline for the in-memory
//! fetch → normalize → backup path: normalized rates are appended to a
//! gzipped JSON-lines temp file in fixed-size batches, merged back for
//! validation, then committed in the same single-transaction shape as the
//! strict lifecycle. A checkpoint file makes interrupted runs resumable.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ingest::backup::{BackupManager, SnapshotBackup};
use crate::ingest::fetch::{NormalizedRate, PriceFetcher, PriceNormalizer, RawPrice};
use crate::ingest::hash::content_hash;
use crate::ingest::lifecycle::{IngestionPhase, LifecycleConfig, LifecycleResult};
use crate::ingest::validator::IngestionValidator;
use crate::model::{PricingRate, SnapshotBuilder};
use crate::store::PricingStore;

/// Rough per-rate resident size used for the soft memory estimate.
const APPROX_RATE_BYTES: usize = 512;

/// Streaming pipeline configuration
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Prices per batch. Lower = less memory, slower.
    pub batch_size: usize,
    /// Soft memory cap in megabytes; the 80% trigger is advisory.
    pub max_memory_mb: usize,
    /// Where temp files and checkpoints live.
    pub work_dir: PathBuf,
    /// Parallel service fetches (bounded by the fetcher).
    pub concurrent_fetches: usize,
    pub enable_checkpointing: bool,
    /// Reclaim/flush every N batches.
    pub gc_interval: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            max_memory_mb: 2_048,
            work_dir: std::env::temp_dir(),
            concurrent_fetches: 2,
            enable_checkpointing: true,
            gc_interval: 5,
        }
    }
}

impl StreamingConfig {
    /// Minimal-memory profile (4 GB hosts)
    pub fn low_memory() -> Self {
        Self {
            batch_size: 5_000,
            max_memory_mb: 1_024,
            concurrent_fetches: 1,
            gc_interval: 3,
            ..Self::default()
        }
    }

    /// Profile for 16 GB+ hosts
    pub fn high_memory() -> Self {
        Self {
            batch_size: 50_000,
            max_memory_mb: 8_192,
            concurrent_fetches: 4,
            gc_interval: 10,
            ..Self::default()
        }
    }
}

/// Progress record for resumable ingestion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionCheckpoint {
    pub provider: String,
    pub region: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_services: Vec<String>,
    pub total_prices: usize,
    pub temp_files: Vec<PathBuf>,
}

/// Memory-efficient ingestion lifecycle
pub struct StreamingLifecycle {
    gate: Mutex<()>,
    config: StreamingConfig,
    fetcher: Arc<dyn PriceFetcher>,
    normalizer: Arc<dyn PriceNormalizer>,
    store: Arc<dyn PricingStore>,
    backup_mgr: BackupManager,
}

struct RunState {
    total_fetched: usize,
    total_normalized: usize,
    temp_files: Vec<PathBuf>,
    completed_services: Vec<String>,
    started_at: Option<DateTime<Utc>>,
}

impl StreamingLifecycle {
    pub fn new(
        fetcher: Arc<dyn PriceFetcher>,
        normalizer: Arc<dyn PriceNormalizer>,
        store: Arc<dyn PricingStore>,
        config: StreamingConfig,
    ) -> Self {
        Self {
            gate: Mutex::new(()),
            config,
            fetcher,
            normalizer,
            store,
            backup_mgr: BackupManager::new(),
        }
    }

    /// Run the streaming pipeline end to end.
    pub async fn execute(&self, lc_config: &LifecycleConfig) -> Result<LifecycleResult> {
        let _guard = self.gate.lock().await;
        let started = std::time::Instant::now();

        let mut state = RunState {
            total_fetched: 0,
            total_normalized: 0,
            temp_files: Vec::new(),
            completed_services: Vec::new(),
            started_at: None,
        };

        if lc_config.environment == "production" && !self.fetcher.is_real_api() {
            return Ok(self.fail(
                anyhow::anyhow!("fetcher is not a real API implementation"),
                &state,
                started.elapsed(),
            ));
        }

        if self.config.enable_checkpointing {
            if let Some(checkpoint) = self.load_checkpoint(lc_config) {
                // Resume only when every spill file the checkpoint names is
                // still on disk; otherwise the completed-service skip would
                // silently drop those services' rates.
                if !checkpoint.temp_files.is_empty()
                    && checkpoint.temp_files.iter().all(|f| f.exists())
                {
                    info!(
                        "Resuming from checkpoint: {} services done, {} prices",
                        checkpoint.completed_services.len(),
                        checkpoint.total_prices
                    );
                    state.temp_files = checkpoint.temp_files;
                    state.completed_services = checkpoint.completed_services;
                    state.total_fetched = checkpoint.total_prices;
                    state.started_at = checkpoint.started_at;
                } else {
                    warn!("Checkpoint is empty or references missing temp files; starting fresh");
                    self.delete_checkpoint(lc_config);
                }
            }
            // Spill files from an interrupted service are not listed in any
            // checkpoint; sweep them before writing new ones.
            self.sweep_stale_temp_files(lc_config, &state.temp_files);
        }

        let run = self.run(lc_config, &mut state);
        let outcome = if lc_config.timeout > Duration::ZERO {
            match tokio::time::timeout(lc_config.timeout, run).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "deadline of {:?} exceeded",
                    lc_config.timeout
                )),
            }
        } else {
            run.await
        };

        match outcome {
            Ok((snapshot_id, backup_path, hash, rate_count)) => {
                self.cleanup(&mut state);
                self.delete_checkpoint(lc_config);
                info!("Streaming ingestion finished in {:?}", started.elapsed());
                Ok(LifecycleResult {
                    success: true,
                    phase: IngestionPhase::Active,
                    message: Some("streaming ingestion complete".to_string()),
                    error: None,
                    duration: started.elapsed(),
                    snapshot_id,
                    backup_path: Some(backup_path),
                    content_hash: Some(hash),
                    raw_count: state.total_fetched,
                    normalized_count: rate_count,
                })
            }
            Err(err) => {
                // With checkpointing on, spill files and the checkpoint stay
                // on disk so the next run can resume; otherwise clean up.
                if !self.config.enable_checkpointing {
                    self.cleanup(&mut state);
                }
                Ok(self.fail(err, &state, started.elapsed()))
            }
        }
    }

    async fn run(
        &self,
        lc_config: &LifecycleConfig,
        state: &mut RunState,
    ) -> Result<(Option<Uuid>, PathBuf, String, usize)> {
        // Phase 1: fetch once, normalize in batches, spill to disk.
        self.stream_fetch_and_normalize(lc_config, state).await?;

        // Phase 2: merge temp files and validate.
        let rates = self.merge_and_validate(lc_config, state)?;

        // Phase 3: mandatory backup, verified by read-back.
        let hash = content_hash(&rates);
        let backup = SnapshotBackup::new(
            lc_config.provider,
            lc_config.region.clone(),
            lc_config.alias.clone(),
            hash.clone(),
            rates.clone(),
        );
        let backup_path = self
            .backup_mgr
            .write_backup(&lc_config.backup_dir, &backup)
            .context("backup failed")?;
        self.backup_mgr
            .read_backup(&backup_path)
            .context("backup verification failed")?;

        // Phase 4: batched single-transaction commit.
        let snapshot_id = if lc_config.dry_run {
            info!("Dry-run: skipping database commit");
            None
        } else {
            Some(self.stream_commit(lc_config, &rates, &hash).await?)
        };

        Ok((snapshot_id, backup_path, hash, rates.len()))
    }

    async fn stream_fetch_and_normalize(
        &self,
        lc_config: &LifecycleConfig,
        state: &mut RunState,
    ) -> Result<()> {
        info!(
            "Streaming fetch for {}/{} (batch={}, cap={}MB, concurrency={})",
            lc_config.provider,
            lc_config.region,
            self.config.batch_size,
            self.config.max_memory_mb,
            self.config.concurrent_fetches
        );

        let raw_prices = self
            .fetcher
            .fetch_region(&lc_config.region)
            .await
            .context("failed to fetch pricing")?;
        if raw_prices.is_empty() {
            anyhow::bail!("fetch returned 0 prices");
        }
        info!("Retrieved {} raw prices", raw_prices.len());

        // One spill file per service. A service enters the checkpoint only
        // after its file is fully written, so resumed runs can skip it and
        // merge the carried file without double-counting.
        let mut by_service: BTreeMap<String, Vec<RawPrice>> = BTreeMap::new();
        for price in raw_prices {
            by_service
                .entry(price.service_code.clone())
                .or_default()
                .push(price);
        }

        let mut batch_num = 0usize;
        for (service, prices) in by_service {
            if state.completed_services.iter().any(|s| s == &service) {
                debug!("Skipping {service}: completed in a previous run");
                continue;
            }

            let temp_path = self.config.work_dir.join(format!(
                "pricing_{}_{}_{}_{}.jsonl.gz",
                lc_config.provider,
                lc_config.region,
                service_file_tag(&service),
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ));
            let file = File::create(&temp_path)
                .with_context(|| format!("failed to create temp file {temp_path:?}"))?;
            let mut writer = BufWriter::new(GzEncoder::new(
                BufWriter::new(file),
                Compression::default(),
            ));

            let mut service_rates = 0usize;
            for batch in prices.chunks(self.config.batch_size) {
                let normalized = match self.normalizer.normalize(batch) {
                    Ok(rates) => rates,
                    Err(err) => {
                        warn!("{service} batch {batch_num} normalization error: {err}");
                        continue;
                    }
                };

                for rate in &normalized {
                    serde_json::to_writer(&mut writer, rate)
                        .context("failed to encode normalized rate")?;
                    writer.write_all(b"\n").context("failed to write temp file")?;
                }
                service_rates += normalized.len();
                state.total_normalized += normalized.len();
                state.total_fetched += batch.len();
                batch_num += 1;

                if batch_num % self.config.gc_interval == 0 {
                    writer.flush().context("failed to flush temp file")?;
                    self.check_memory(state.total_normalized);
                }
            }

            writer
                .into_inner()
                .map_err(|e| {
                    anyhow::Error::from(e.into_error()).context("failed to flush temp writer")
                })?
                .finish()
                .context("failed to finish temp file compression")?
                .flush()
                .context("failed to flush temp file")?;

            state.temp_files.push(temp_path);
            state.completed_services.push(service.clone());
            if self.config.enable_checkpointing {
                self.save_checkpoint(lc_config, state)?;
            }
            debug!("Completed {service}: {service_rates} rates spilled");
        }

        info!(
            "Wrote {} normalized rates across {} temp files",
            state.total_normalized,
            state.temp_files.len()
        );
        Ok(())
    }

    fn merge_and_validate(
        &self,
        lc_config: &LifecycleConfig,
        state: &RunState,
    ) -> Result<Vec<NormalizedRate>> {
        let mut all_rates = Vec::new();

        for (i, temp_file) in state.temp_files.iter().enumerate() {
            debug!("Reading temp file {}/{}", i + 1, state.temp_files.len());
            match read_temp_file(temp_file) {
                Ok(mut rates) => {
                    all_rates.append(&mut rates);
                }
                Err(err) => {
                    warn!("Failed to read temp file {temp_file:?}: {err}");
                }
            }
        }

        info!("Validating {} merged rates", all_rates.len());
        let mut validator = IngestionValidator::new();
        validator.set_min_coverage_percent(lc_config.min_coverage);
        validator
            .validate_all(&all_rates, 0)
            .context("validation failed")?;

        Ok(all_rates)
    }

    async fn stream_commit(
        &self,
        lc_config: &LifecycleConfig,
        rates: &[NormalizedRate],
        hash: &str,
    ) -> Result<Uuid> {
        // Identical content already committed: return the existing id
        // without opening a transaction.
        if let Some(existing) = self
            .store
            .find_snapshot_by_hash(lc_config.provider, &lc_config.region, &lc_config.alias, hash)
            .await?
        {
            info!("Snapshot {} already holds this content", existing.id);
            return Ok(existing.id);
        }

        info!("Committing {} rates to database", rates.len());
        let snapshot = SnapshotBuilder::new(
            lc_config.provider,
            lc_config.region.clone(),
            "streaming_ingestion",
        )
        .with_alias(lc_config.alias.clone())
        .build(hash.to_string());
        let snapshot_id = snapshot.id;

        let mut tx = self
            .store
            .begin_tx()
            .await
            .context("failed to begin transaction")?;

        let body = async {
            tx.create_snapshot(&snapshot).await?;

            let mut written = 0usize;
            for batch in rates.chunks(self.config.batch_size) {
                for nr in batch {
                    let key = tx.upsert_rate_key(&nr.rate_key).await?;
                    let rate = PricingRate {
                        id: Uuid::new_v4(),
                        snapshot_id,
                        rate_key_id: key.id,
                        unit: nr.unit.clone(),
                        price: nr.price,
                        currency: nr.currency.clone(),
                        confidence: nr.confidence,
                        tier_min: nr.tier_min,
                        tier_max: nr.tier_max,
                        effective_date: None,
                        created_at: Utc::now(),
                    };
                    tx.create_rate(&rate).await?;
                }
                written += batch.len();
                debug!("Wrote {written}/{} rates", rates.len());
            }

            tx.activate_snapshot(snapshot_id).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match body {
            Ok(()) => {
                tx.commit().await.context("commit failed")?;
                info!("Snapshot {snapshot_id} activated");
                Ok(snapshot_id)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    warn!("Rollback after failed streaming commit also failed: {rb}");
                }
                Err(err)
            }
        }
    }

    /// Soft memory advisory: with no collector to force, the 80% trigger
    /// only logs; batch size is the real control on peak residency.
    fn check_memory(&self, resident_rates: usize) {
        let estimated_mb = resident_rates * APPROX_RATE_BYTES / (1024 * 1024);
        if estimated_mb > self.config.max_memory_mb * 80 / 100 {
            warn!(
                "Estimated residency {estimated_mb}MB above 80% of {}MB cap",
                self.config.max_memory_mb
            );
        }
    }

    fn fail(&self, err: anyhow::Error, state: &RunState, duration: Duration) -> LifecycleResult {
        warn!("Streaming ingestion failed: {err:#}");
        LifecycleResult {
            success: false,
            phase: IngestionPhase::Failed,
            message: None,
            error: Some(format!("{err:#}")),
            duration,
            snapshot_id: None,
            backup_path: None,
            content_hash: None,
            raw_count: state.total_fetched,
            normalized_count: state.total_normalized,
        }
    }

    fn cleanup(&self, state: &mut RunState) {
        for file in &state.temp_files {
            if let Err(err) = fs::remove_file(file) {
                debug!("Failed to remove temp file {file:?}: {err}");
            }
        }
        state.temp_files.clear();
    }

    // Checkpoint management

    pub fn checkpoint_path(&self, lc_config: &LifecycleConfig) -> PathBuf {
        self.config.work_dir.join(format!(
            "checkpoint_{}_{}.json",
            lc_config.provider, lc_config.region
        ))
    }

    fn load_checkpoint(&self, lc_config: &LifecycleConfig) -> Option<IngestionCheckpoint> {
        let data = fs::read(self.checkpoint_path(lc_config)).ok()?;
        serde_json::from_slice(&data).ok()
    }

    fn save_checkpoint(&self, lc_config: &LifecycleConfig, state: &mut RunState) -> Result<()> {
        if state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }
        let checkpoint = IngestionCheckpoint {
            provider: lc_config.provider.to_string(),
            region: lc_config.region.clone(),
            started_at: state.started_at,
            completed_services: state.completed_services.clone(),
            total_prices: state.total_fetched,
            temp_files: state.temp_files.clone(),
        };

        let data = serde_json::to_vec(&checkpoint).context("failed to encode checkpoint")?;
        fs::write(self.checkpoint_path(lc_config), data).context("failed to write checkpoint")?;
        Ok(())
    }

    fn delete_checkpoint(&self, lc_config: &LifecycleConfig) {
        let _ = fs::remove_file(self.checkpoint_path(lc_config));
    }

    /// Remove spill files for this (provider, region) that no checkpoint
    /// accounts for, e.g. a service that was mid-write when a previous run
    /// died.
    fn sweep_stale_temp_files(&self, lc_config: &LifecycleConfig, keep: &[PathBuf]) {
        let prefix = format!("pricing_{}_{}_", lc_config.provider, lc_config.region);
        let Ok(entries) = fs::read_dir(&self.config.work_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();
            if name.starts_with(&prefix) && !keep.contains(&path) {
                debug!("Removing stale temp file {path:?}");
                let _ = fs::remove_file(&path);
            }
        }
    }
}

/// Service name as a filesystem-safe tag ("Virtual Machines" → "virtual-machines").
fn service_file_tag(service: &str) -> String {
    service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Read a gzipped JSON-lines temp file back into memory. Undecodable
/// lines are skipped.
fn read_temp_file(path: &Path) -> Result<Vec<NormalizedRate>> {
    let file =
        File::open(path).with_context(|| format!("failed to open temp file {path:?}"))?;
    let reader = BufReader::new(GzDecoder::new(BufReader::new(file)));

    let mut rates = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read temp file line")?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<NormalizedRate>(&line) {
            Ok(rate) => rates.push(rate),
            Err(err) => debug!("Skipping undecodable temp line: {err}"),
        }
    }
    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_presets() {
        let low = StreamingConfig::low_memory();
        assert_eq!(
            (low.batch_size, low.max_memory_mb, low.concurrent_fetches, low.gc_interval),
            (5_000, 1_024, 1, 3)
        );

        let default = StreamingConfig::default();
        assert_eq!(
            (
                default.batch_size,
                default.max_memory_mb,
                default.concurrent_fetches,
                default.gc_interval
            ),
            (10_000, 2_048, 2, 5)
        );

        let high = StreamingConfig::high_memory();
        assert_eq!(
            (high.batch_size, high.max_memory_mb, high.concurrent_fetches, high.gc_interval),
            (50_000, 8_192, 4, 10)
        );
    }

    #[test]
    fn temp_file_round_trip() {
        use crate::ingest::validator::make_rate;
        use crate::model::CloudProvider;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rates.jsonl.gz");

        let rates = vec![
            make_rate(
                CloudProvider::Aws,
                "AmazonEC2",
                "Compute Instance",
                "us-east-1",
                &[("instance_type", "t3.micro")],
                "hours",
                "0.0104",
            ),
            make_rate(
                CloudProvider::Aws,
                "AmazonS3",
                "Storage",
                "us-east-1",
                &[("storage_class", "standard")],
                "GB-month",
                "0.023",
            ),
        ];

        let file = File::create(&path).unwrap();
        let mut writer = BufWriter::new(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        ));
        for rate in &rates {
            serde_json::to_writer(&mut writer, rate).unwrap();
            writer.write_all(b"\n").unwrap();
        }
        writer.into_inner().unwrap().finish().unwrap();

        let restored = read_temp_file(&path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].rate_key.service, "AmazonEC2");
        assert_eq!(restored[1].unit, "GB-month");
    }

    #[test]
    fn service_tags_are_filesystem_safe() {
        assert_eq!(service_file_tag("AmazonEC2"), "amazonec2");
        assert_eq!(service_file_tag("Virtual Machines"), "virtual-machines");
        assert_eq!(service_file_tag("Pub/Sub"), "pub-sub");
    }

    #[test]
    fn checkpoint_serialization() {
        let checkpoint = IngestionCheckpoint {
            provider: "aws".to_string(),
            region: "us-east-1".to_string(),
            started_at: Some(Utc::now()),
            completed_services: vec!["AmazonEC2".to_string()],
            total_prices: 1234,
            temp_files: vec![PathBuf::from("/tmp/pricing_aws.jsonl.gz")],
        };

        let json = serde_json::to_string(&checkpoint).unwrap();
        let parsed: IngestionCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.total_prices, 1234);
        assert_eq!(parsed.completed_services, vec!["AmazonEC2"]);
        assert_eq!(parsed.temp_files.len(), 1);
    }
}
