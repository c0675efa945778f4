//! Pricing resolution against the active snapshot
//!
//! The read path: look up the active snapshot for (cloud, region, alias),
//! then resolve a rate by containment match. Permissive mode turns missing
//! data into symbolic results the estimation engine can carry through;
//! strict mode raises. Snapshots touched during a session are recorded for
//! reproducibility.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::model::{CloudProvider, TieredRate};
use crate::store::PricingStore;

/// Resolver behavior on missing data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StrictMode {
    /// Missing rates become symbolic results
    #[default]
    Permissive,
    /// Missing rates are errors
    Strict,
}

/// Rate resolution parameters
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub cloud: CloudProvider,
    pub service: String,
    pub product_family: String,
    pub region: String,
    pub attributes: BTreeMap<String, String>,
    pub unit: String,
    /// Empty = resolver default
    pub alias: String,
}

/// Resolution outcome: either a priced rate or a symbolic placeholder
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub price: Option<Decimal>,
    pub currency: String,
    pub confidence: f64,
    pub snapshot_id: Option<Uuid>,
    pub source: String,
    pub is_symbolic: bool,
    pub reason: Option<String>,
}

/// Tiered resolution outcome
#[derive(Debug, Clone)]
pub struct TieredResolutionResult {
    pub tiers: Vec<TieredRate>,
    pub snapshot_id: Option<Uuid>,
    pub is_symbolic: bool,
    pub reason: Option<String>,
}

impl TieredResolutionResult {
    /// Cost for a usage amount over these tiers.
    pub fn calculate_cost(&self, usage: Decimal) -> (Decimal, f64) {
        calculate_tiered_cost(usage, &self.tiers)
    }
}

/// Audit record of a snapshot the resolver read
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotAudit {
    pub cloud: CloudProvider,
    pub region: String,
    pub alias: String,
    pub snapshot_id: Uuid,
}

/// Pricing resolver over the committed store
pub struct Resolver {
    store: Arc<dyn PricingStore>,
    default_alias: String,
    mode: StrictMode,
    used_snapshots: Mutex<BTreeMap<String, SnapshotAudit>>,
}

impl Resolver {
    pub fn new(store: Arc<dyn PricingStore>) -> Self {
        Self {
            store,
            default_alias: "default".to_string(),
            mode: StrictMode::Permissive,
            used_snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_mode(mut self, mode: StrictMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.default_alias = alias.into();
        self
    }

    fn effective_alias<'a>(&'a self, alias: &'a str) -> &'a str {
        if alias.is_empty() {
            &self.default_alias
        } else {
            alias
        }
    }

    fn record_snapshot(&self, req: &ResolutionRequest, alias: &str, snapshot_id: Uuid) {
        let key = format!("{}:{}:{}", req.cloud, req.region, alias);
        self.used_snapshots.lock().unwrap().insert(
            key,
            SnapshotAudit {
                cloud: req.cloud,
                region: req.region.clone(),
                alias: alias.to_string(),
                snapshot_id,
            },
        );
    }

    /// Resolve a single rate.
    pub async fn resolve(&self, req: &ResolutionRequest) -> Result<ResolutionResult> {
        let alias = self.effective_alias(&req.alias).to_string();

        let snapshot = self
            .store
            .get_active_snapshot(req.cloud, &req.region, &alias)
            .await?;
        let Some(snapshot) = snapshot else {
            if self.mode == StrictMode::Strict {
                return Err(anyhow!(
                    "no active pricing snapshot for {}/{}/{}",
                    req.cloud,
                    req.region,
                    alias
                ));
            }
            return Ok(ResolutionResult {
                price: None,
                currency: String::new(),
                confidence: 0.0,
                snapshot_id: None,
                source: String::new(),
                is_symbolic: true,
                reason: Some(format!(
                    "no pricing snapshot for {}/{}",
                    req.cloud, req.region
                )),
            });
        };
        self.record_snapshot(req, &alias, snapshot.id);

        let rate = self
            .store
            .resolve_rate(
                req.cloud,
                &req.service,
                &req.product_family,
                &req.region,
                &req.attributes,
                &req.unit,
                &alias,
            )
            .await?;

        match rate {
            Some(rate) => Ok(ResolutionResult {
                price: Some(rate.price),
                currency: rate.currency,
                confidence: rate.confidence,
                snapshot_id: Some(rate.snapshot_id),
                source: rate.source,
                is_symbolic: false,
                reason: None,
            }),
            None => {
                if self.mode == StrictMode::Strict {
                    return Err(anyhow!(
                        "no rate for {}/{} unit={} in {}",
                        req.service,
                        req.product_family,
                        req.unit,
                        req.region
                    ));
                }
                Ok(ResolutionResult {
                    price: None,
                    currency: String::new(),
                    confidence: 0.0,
                    snapshot_id: Some(snapshot.id),
                    source: snapshot.source,
                    is_symbolic: true,
                    reason: Some(format!(
                        "rate not found: {}/{}/{}",
                        req.service, req.product_family, req.unit
                    )),
                })
            }
        }
    }

    /// Resolve all tiers for a rate, ascending by tier minimum.
    pub async fn resolve_tiered(&self, req: &ResolutionRequest) -> Result<TieredResolutionResult> {
        let alias = self.effective_alias(&req.alias).to_string();

        let snapshot = self
            .store
            .get_active_snapshot(req.cloud, &req.region, &alias)
            .await?;
        let Some(snapshot) = snapshot else {
            if self.mode == StrictMode::Strict {
                return Err(anyhow!(
                    "no active pricing snapshot for {}/{}/{}",
                    req.cloud,
                    req.region,
                    alias
                ));
            }
            return Ok(TieredResolutionResult {
                tiers: Vec::new(),
                snapshot_id: None,
                is_symbolic: true,
                reason: Some(format!(
                    "no pricing snapshot for {}/{}",
                    req.cloud, req.region
                )),
            });
        };
        self.record_snapshot(req, &alias, snapshot.id);

        let tiers = self
            .store
            .resolve_tiered_rates(
                req.cloud,
                &req.service,
                &req.product_family,
                &req.region,
                &req.attributes,
                &req.unit,
                &alias,
            )
            .await?;

        if tiers.is_empty() {
            if self.mode == StrictMode::Strict {
                return Err(anyhow!(
                    "no tiered rates for {}/{} unit={} in {}",
                    req.service,
                    req.product_family,
                    req.unit,
                    req.region
                ));
            }
            return Ok(TieredResolutionResult {
                tiers: Vec::new(),
                snapshot_id: Some(snapshot.id),
                is_symbolic: true,
                reason: Some(format!(
                    "tiered rates not found: {}/{}",
                    req.service, req.product_family
                )),
            });
        }

        Ok(TieredResolutionResult {
            tiers,
            snapshot_id: Some(snapshot.id),
            is_symbolic: false,
            reason: None,
        })
    }

    /// Snapshots read during this session, keyed `cloud:region:alias`.
    pub fn used_snapshots(&self) -> BTreeMap<String, Uuid> {
        self.used_snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot_id))
            .collect()
    }

    /// Audit records for reproducibility.
    pub fn audit_info(&self) -> Vec<SnapshotAudit> {
        self.used_snapshots
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    pub fn reset_snapshots(&self) {
        self.used_snapshots.lock().unwrap().clear();
    }
}

/// Greedy tiered cost: each `[min, max)` band is filled in order, an
/// unbounded top tier takes the remainder. Returned confidence is the
/// minimum across the tiers consumed.
pub fn calculate_tiered_cost(usage: Decimal, tiers: &[TieredRate]) -> (Decimal, f64) {
    if tiers.is_empty() {
        return (Decimal::ZERO, 0.0);
    }

    let mut total = Decimal::ZERO;
    let mut remaining = usage;
    let mut min_confidence = 1.0f64;

    for tier in tiers {
        if remaining <= Decimal::ZERO {
            break;
        }

        let tier_usage = match tier.max {
            None => remaining,
            Some(max) => {
                let tier_size = max - tier.min;
                if remaining > tier_size {
                    tier_size
                } else {
                    remaining
                }
            }
        };

        total += tier_usage * tier.price;
        remaining -= tier_usage;

        if tier.confidence < min_confidence {
            min_confidence = tier.confidence;
        }
    }

    (total, min_confidence)
}
