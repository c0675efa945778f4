//! Strict ingestion lifecycle state machine
//!
//! Eight phases, strictly monotonic: Init → Fetching → Normalizing →
//! Validating → Staging → BackedUp → Committing → Active, with Failed as
//! the terminal abort state. No database write happens before a verified
//! on-disk backup exists, and the commit is a single transaction: the
//! snapshot, its rates, and the active-flag swap become visible together
//! or not at all.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ingest::backup::{BackupManager, SnapshotBackup};
use crate::ingest::fetch::{NormalizedRate, PriceFetcher, PriceNormalizer, RawPrice};
use crate::ingest::hash::content_hash;
use crate::ingest::validator::IngestionValidator;
use crate::model::{CloudProvider, PricingRate, SnapshotBuilder};
use crate::store::PricingStore;

/// Current phase of the ingestion lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionPhase {
    Init,
    /// Downloading from the cloud API. No DB access.
    Fetching,
    /// Transforming to canonical form. No DB access.
    Normalizing,
    /// Governance checks. DB reads only.
    Validating,
    /// Validation passed, preparing. No side effects.
    Staging,
    /// Backup written and verified on disk.
    BackedUp,
    /// Single DB transaction in flight.
    Committing,
    /// Complete; the resolver can use the snapshot.
    Active,
    /// Aborted; no partial state.
    Failed,
}

impl IngestionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Validating => "validating",
            Self::Staging => "staging",
            Self::BackedUp => "backed_up",
            Self::Committing => "committing",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for IngestionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error tagged with the phase that produced it
#[derive(Debug, thiserror::Error)]
#[error("{phase} phase failed: {source}")]
pub struct LifecycleError {
    pub phase: IngestionPhase,
    #[source]
    pub source: anyhow::Error,
}

impl LifecycleError {
    fn new(phase: IngestionPhase, source: anyhow::Error) -> Self {
        Self { phase, source }
    }
}

/// Lifecycle configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub provider: CloudProvider,
    pub region: String,
    pub alias: String,
    /// "production" | "staging" | "development"
    pub environment: String,
    pub backup_dir: PathBuf,
    pub dry_run: bool,
    /// Must stay false in production; the guard enforces it.
    pub allow_mock_pricing: bool,
    pub min_coverage: f64,
    pub timeout: Duration,
}

impl LifecycleConfig {
    pub fn new(provider: CloudProvider, region: impl Into<String>) -> Self {
        Self {
            provider,
            region: region.into(),
            alias: "default".to_string(),
            environment: "production".to_string(),
            backup_dir: PathBuf::from("./pricing-backups"),
            dry_run: false,
            allow_mock_pricing: false,
            min_coverage: 95.0,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// In-memory state during a run. Nothing here touches the database until
/// the commit phase.
#[derive(Debug, Default)]
struct LifecycleState {
    raw_prices: Vec<RawPrice>,
    normalized: Vec<NormalizedRate>,
    content_hash: String,
    backup_path: Option<PathBuf>,
    backup_verified: bool,
    snapshot_id: Option<Uuid>,
    errors: Vec<String>,
}

/// Outcome of an ingestion run
#[derive(Debug)]
pub struct LifecycleResult {
    pub success: bool,
    pub phase: IngestionPhase,
    pub message: Option<String>,
    pub error: Option<String>,
    pub duration: Duration,
    pub snapshot_id: Option<Uuid>,
    pub backup_path: Option<PathBuf>,
    pub content_hash: Option<String>,
    pub raw_count: usize,
    pub normalized_count: usize,
}

/// The strict ingestion state machine
///
/// One `execute` at a time per instance; cross-process coordination for
/// the same (cloud, region, alias) is the operator's concern — the
/// content-hash idempotency rule keeps duplicate runs from producing
/// duplicate visible state.
pub struct Lifecycle {
    gate: Mutex<()>,
    fetcher: Arc<dyn PriceFetcher>,
    normalizer: Arc<dyn PriceNormalizer>,
    validator: IngestionValidator,
    backup_mgr: BackupManager,
    store: Arc<dyn PricingStore>,
}

impl Lifecycle {
    pub fn new(
        fetcher: Arc<dyn PriceFetcher>,
        normalizer: Arc<dyn PriceNormalizer>,
        store: Arc<dyn PricingStore>,
    ) -> Self {
        Self {
            gate: Mutex::new(()),
            fetcher,
            normalizer,
            validator: IngestionValidator::new(),
            backup_mgr: BackupManager::new(),
            store,
        }
    }

    /// Replace the default validator, e.g. to add ingestion contracts.
    pub fn with_validator(mut self, validator: IngestionValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Run the complete lifecycle under the configured deadline.
    pub async fn execute(&self, config: &LifecycleConfig) -> Result<LifecycleResult> {
        let _guard = self.gate.lock().await;
        let started = std::time::Instant::now();

        let mut state = LifecycleState::default();
        let mut phase = IngestionPhase::Init;

        let outcome = if config.timeout > Duration::ZERO {
            match tokio::time::timeout(config.timeout, self.run(config, &mut state, &mut phase))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LifecycleError::new(
                    phase,
                    anyhow!("deadline of {:?} exceeded", config.timeout),
                )),
            }
        } else {
            self.run(config, &mut state, &mut phase).await
        };

        let duration = started.elapsed();
        match outcome {
            Ok(message) => Ok(LifecycleResult {
                success: true,
                phase: IngestionPhase::Active,
                message: Some(message),
                error: None,
                duration,
                snapshot_id: state.snapshot_id,
                backup_path: state.backup_path,
                content_hash: if state.content_hash.is_empty() {
                    None
                } else {
                    Some(state.content_hash)
                },
                raw_count: state.raw_prices.len(),
                normalized_count: state.normalized.len(),
            }),
            Err(err) => {
                warn!("Ingestion failed during {}: {}", err.phase, err.source);
                state.errors.push(err.to_string());
                Ok(LifecycleResult {
                    success: false,
                    phase: IngestionPhase::Failed,
                    message: None,
                    error: Some(err.to_string()),
                    duration,
                    snapshot_id: None,
                    backup_path: state.backup_path,
                    content_hash: None,
                    raw_count: state.raw_prices.len(),
                    normalized_count: state.normalized.len(),
                })
            }
        }
    }

    async fn run(
        &self,
        config: &LifecycleConfig,
        state: &mut LifecycleState,
        phase: &mut IngestionPhase,
    ) -> Result<String, LifecycleError> {
        self.enforce_production_guards(config)
            .map_err(|e| LifecycleError::new(IngestionPhase::Init, e))?;

        *phase = IngestionPhase::Fetching;
        self.phase_fetching(config, state)
            .await
            .map_err(|e| LifecycleError::new(IngestionPhase::Fetching, e))?;

        *phase = IngestionPhase::Normalizing;
        self.phase_normalizing(state)
            .map_err(|e| LifecycleError::new(IngestionPhase::Normalizing, e))?;

        *phase = IngestionPhase::Validating;
        self.phase_validating(config, state)
            .await
            .map_err(|e| LifecycleError::new(IngestionPhase::Validating, e))?;

        // Staging: validation passed, data is ready for backup. Still no
        // database access.
        *phase = IngestionPhase::Staging;

        *phase = IngestionPhase::BackedUp;
        self.phase_backup(config, state)
            .map_err(|e| LifecycleError::new(IngestionPhase::BackedUp, e))?;

        if config.dry_run {
            info!("Dry-run: stopping before database commit");
            return Ok("dry-run completed, no DB writes".to_string());
        }

        *phase = IngestionPhase::Committing;
        self.phase_committing(config, state)
            .await
            .map_err(|e| LifecycleError::new(IngestionPhase::Committing, e))?;

        *phase = IngestionPhase::Active;
        Ok("ingestion complete".to_string())
    }

    /// Hard guards evaluated before any fetch work.
    fn enforce_production_guards(&self, config: &LifecycleConfig) -> Result<()> {
        if config.environment == "production" && config.allow_mock_pricing {
            anyhow::bail!("mock pricing forbidden in production environment");
        }
        if config.environment == "production" && !self.fetcher.is_real_api() {
            anyhow::bail!("fetcher is not a real API implementation");
        }
        Ok(())
    }

    async fn phase_fetching(
        &self,
        config: &LifecycleConfig,
        state: &mut LifecycleState,
    ) -> Result<()> {
        info!(
            "Fetching pricing for {}/{}",
            config.provider, config.region
        );
        let raw_prices = self
            .fetcher
            .fetch_region(&config.region)
            .await
            .context("fetch failed")?;

        if raw_prices.is_empty() {
            anyhow::bail!("fetch returned 0 prices");
        }

        info!("Fetched {} raw prices", raw_prices.len());
        state.raw_prices = raw_prices;
        Ok(())
    }

    fn phase_normalizing(&self, state: &mut LifecycleState) -> Result<()> {
        let normalized = self
            .normalizer
            .normalize(&state.raw_prices)
            .context("normalization failed")?;

        if normalized.is_empty() {
            anyhow::bail!("normalization produced 0 rates");
        }

        state.content_hash = content_hash(&normalized);
        info!(
            "Normalized {} rates, content hash {}",
            normalized.len(),
            state.content_hash
        );
        state.normalized = normalized;
        Ok(())
    }

    async fn phase_validating(
        &self,
        config: &LifecycleConfig,
        state: &mut LifecycleState,
    ) -> Result<()> {
        let mut validator = self.validator.clone();
        validator.set_min_coverage_percent(config.min_coverage);

        // Previous snapshot rate count for the coverage floor. Read-only.
        let prev_rate_count = match self
            .store
            .get_active_snapshot(config.provider, &config.region, &config.alias)
            .await?
        {
            Some(prev) => self.store.count_rates(prev.id).await.unwrap_or(0) as usize,
            None => 0,
        };

        validator.validate_all(&state.normalized, prev_rate_count)
    }

    fn phase_backup(&self, config: &LifecycleConfig, state: &mut LifecycleState) -> Result<()> {
        let backup = SnapshotBackup::new(
            config.provider,
            config.region.clone(),
            config.alias.clone(),
            state.content_hash.clone(),
            state.normalized.clone(),
        );

        let backup_path = self
            .backup_mgr
            .write_backup(&config.backup_dir, &backup)
            .context("backup failed")?;

        // Read back and verify before anything may touch the database.
        let restored = self
            .backup_mgr
            .read_backup(&backup_path)
            .context("backup verification failed")?;
        if restored.content_hash != state.content_hash {
            anyhow::bail!(
                "backup hash mismatch: expected {}, got {}",
                state.content_hash,
                restored.content_hash
            );
        }

        state.backup_path = Some(backup_path);
        state.backup_verified = true;
        Ok(())
    }

    async fn phase_committing(
        &self,
        config: &LifecycleConfig,
        state: &mut LifecycleState,
    ) -> Result<()> {
        // A commit without a verified backup is never allowed.
        if !state.backup_verified || state.backup_path.is_none() {
            anyhow::bail!("cannot commit without verified backup");
        }

        // Idempotency: identical content was already committed. No
        // transaction is opened on this path.
        if let Some(existing) = self
            .store
            .find_snapshot_by_hash(
                config.provider,
                &config.region,
                &config.alias,
                &state.content_hash,
            )
            .await?
        {
            info!(
                "Content hash {} already committed as snapshot {}; skipping",
                state.content_hash, existing.id
            );
            state.snapshot_id = Some(existing.id);
            return Ok(());
        }

        let snapshot = SnapshotBuilder::new(
            config.provider,
            config.region.clone(),
            "strict_ingestion_lifecycle",
        )
        .with_alias(config.alias.clone())
        .build(state.content_hash.clone());
        let snapshot_id = snapshot.id;

        let mut tx = self
            .store
            .begin_tx()
            .await
            .context("failed to begin transaction")?;

        let body = async {
            tx.create_snapshot(&snapshot)
                .await
                .context("failed to create snapshot")?;

            for nr in &state.normalized {
                let key = tx
                    .upsert_rate_key(&nr.rate_key)
                    .await
                    .context("failed to upsert rate key")?;

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
                tx.create_rate(&rate).await.context("failed to create rate")?;
            }

            tx.activate_snapshot(snapshot_id)
                .await
                .context("failed to activate snapshot")?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match body {
            Ok(()) => {
                tx.commit().await.context("commit failed")?;
                info!("Committed and activated snapshot {snapshot_id}");
                state.snapshot_id = Some(snapshot_id);
                Ok(())
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    warn!("Rollback after failed commit also failed: {rb}");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        use IngestionPhase::*;
        let phases = [
            Init, Fetching, Normalizing, Validating, Staging, BackedUp, Committing, Active,
        ];
        for pair in phases.windows(2) {
            assert!(pair[0] < pair[1], "{} must precede {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn phase_names() {
        let expected = [
            (IngestionPhase::Init, "init"),
            (IngestionPhase::Fetching, "fetching"),
            (IngestionPhase::Normalizing, "normalizing"),
            (IngestionPhase::Validating, "validating"),
            (IngestionPhase::Staging, "staging"),
            (IngestionPhase::BackedUp, "backed_up"),
            (IngestionPhase::Committing, "committing"),
            (IngestionPhase::Active, "active"),
            (IngestionPhase::Failed, "failed"),
        ];
        for (phase, name) in expected {
            assert_eq!(phase.as_str(), name);
        }
    }

    #[test]
    fn config_defaults_are_safe() {
        let config = LifecycleConfig::new(CloudProvider::Aws, "us-east-1");
        assert_eq!(config.environment, "production");
        assert!(!config.allow_mock_pricing);
        assert!(!config.dry_run);
        assert_eq!(config.alias, "default");
        assert_eq!(config.min_coverage, 95.0);
        assert_eq!(config.timeout, Duration::from_secs(1800));
    }

    #[test]
    fn lifecycle_error_carries_phase() {
        let err = LifecycleError::new(IngestionPhase::BackedUp, anyhow!("disk full"));
        let text = err.to_string();
        assert!(text.contains("backed_up"));
        assert!(format!("{:#}", anyhow::Error::from(err)).contains("disk full"));
    }
}
