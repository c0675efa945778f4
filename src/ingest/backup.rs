//! Backup and restore for pricing snapshots
//!
//! One gzip-compressed JSON document per backup, written before any
//! database commit and re-read to verify the stored content hash.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ingest::fetch::NormalizedRate;
use crate::ingest::hash::content_hash;
use crate::model::CloudProvider;

pub const BACKUP_SCHEMA_VERSION: &str = "1.0";

/// A complete snapshot dump for backup/restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBackup {
    pub provider: CloudProvider,
    pub region: String,
    pub alias: String,
    pub timestamp: DateTime<Utc>,
    pub content_hash: String,
    pub rate_count: usize,
    pub schema_version: String,
    pub rates: Vec<NormalizedRate>,
}

impl SnapshotBackup {
    pub fn new(
        provider: CloudProvider,
        region: impl Into<String>,
        alias: impl Into<String>,
        content_hash: impl Into<String>,
        rates: Vec<NormalizedRate>,
    ) -> Self {
        Self {
            provider,
            region: region.into(),
            alias: alias.into(),
            timestamp: Utc::now(),
            content_hash: content_hash.into(),
            rate_count: rates.len(),
            schema_version: BACKUP_SCHEMA_VERSION.to_string(),
            rates,
        }
    }
}

/// Metadata about a backup file on disk
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub provider: CloudProvider,
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

/// Writes, reads, and verifies snapshot backups
#[derive(Debug, Default, Clone)]
pub struct BackupManager;

impl BackupManager {
    pub fn new() -> Self {
        Self
    }

    /// Write a backup under `<base>/<cloud>/<region>_<timestamp>.json.gz`
    pub fn write_backup(&self, base_dir: &Path, backup: &SnapshotBackup) -> Result<PathBuf> {
        let provider_dir = base_dir.join(backup.provider.as_str());
        fs::create_dir_all(&provider_dir)
            .with_context(|| format!("Failed to create backup directory {provider_dir:?}"))?;

        let filename = format!(
            "{}_{}.json.gz",
            backup.region,
            backup.timestamp.format("%Y-%m-%dT%H-%M-%S")
        );
        let full_path = provider_dir.join(filename);

        let file = File::create(&full_path)
            .with_context(|| format!("Failed to create backup file {full_path:?}"))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let body =
            serde_json::to_vec_pretty(backup).context("Failed to serialize backup")?;
        encoder
            .write_all(&body)
            .context("Failed to write backup body")?;
        encoder
            .finish()
            .context("Failed to finish backup compression")?
            .flush()
            .context("Failed to flush backup file")?;

        info!(
            "Wrote backup for {}/{} ({} rates) to {}",
            backup.provider,
            backup.region,
            backup.rate_count,
            full_path.display()
        );
        Ok(full_path)
    }

    /// Read a backup back, decompressing by extension, and validate it.
    pub fn read_backup(&self, path: &Path) -> Result<SnapshotBackup> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open backup file {path:?}"))?;

        let mut body = String::new();
        if path.extension().is_some_and(|ext| ext == "gz") {
            GzDecoder::new(BufReader::new(file))
                .read_to_string(&mut body)
                .context("Failed to decompress backup")?;
        } else {
            BufReader::new(file)
                .read_to_string(&mut body)
                .context("Failed to read backup")?;
        }

        let backup: SnapshotBackup =
            serde_json::from_str(&body).context("Failed to decode backup")?;
        self.validate_backup(&backup)
            .context("Backup validation failed")?;
        Ok(backup)
    }

    /// Structural and content checks: non-empty header fields, rate count
    /// matching the array, and a recomputed content hash matching the
    /// stored one.
    pub fn validate_backup(&self, backup: &SnapshotBackup) -> Result<()> {
        if backup.region.is_empty() {
            bail!("backup missing region");
        }
        if backup.content_hash.is_empty() {
            bail!("backup missing content hash");
        }
        if backup.rate_count == 0 {
            bail!("backup has 0 rates");
        }
        if backup.rates.len() != backup.rate_count {
            bail!(
                "backup rate count mismatch: header says {}, actual {}",
                backup.rate_count,
                backup.rates.len()
            );
        }

        let actual = content_hash(&backup.rates);
        if actual != backup.content_hash {
            bail!(
                "backup content hash mismatch: expected {}, got {}",
                backup.content_hash,
                actual
            );
        }
        Ok(())
    }

    /// List backup files under a base directory, newest layouts only.
    pub fn list_backups(&self, base_dir: &Path) -> Result<Vec<BackupInfo>> {
        let mut backups = Vec::new();

        for provider in [CloudProvider::Aws, CloudProvider::Azure, CloudProvider::Gcp] {
            let provider_dir = base_dir.join(provider.as_str());
            if !provider_dir.exists() {
                continue;
            }

            for entry in fs::read_dir(&provider_dir)
                .with_context(|| format!("Failed to read {provider_dir:?}"))?
            {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".json") && !name.ends_with(".json.gz") {
                    continue;
                }
                let metadata = entry.metadata()?;
                backups.push(BackupInfo {
                    provider,
                    path: entry.path(),
                    filename: name,
                    size: metadata.len(),
                });
            }
        }

        Ok(backups)
    }
}
