//! In-memory pricing store
//!
//! Mirrors the Postgres store's semantics closely enough to drive the full
//! ingestion lifecycle without a database: containment attribute matching,
//! active+ready filtering, the unique content-hash and rate-tier
//! constraints, and buffered transactions that publish nothing until
//! commit.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{
    CloudProvider, PricingRate, PricingSnapshot, RateKey, ResolvedRate, SnapshotState, TieredRate,
};
use crate::store::{PricingStore, PricingTx};

#[derive(Default)]
struct MemState {
    snapshots: Vec<PricingSnapshot>,
    keys: Vec<RateKey>,
    rates: Vec<PricingRate>,
}

impl MemState {
    fn insert_snapshot(&mut self, snapshot: &PricingSnapshot) -> Result<()> {
        if self.snapshots.iter().any(|s| {
            s.cloud == snapshot.cloud
                && s.region == snapshot.region
                && s.provider_alias == snapshot.provider_alias
                && s.hash == snapshot.hash
        }) {
            bail!(
                "duplicate snapshot content for {}/{}/{}",
                snapshot.cloud,
                snapshot.region,
                snapshot.provider_alias
            );
        }
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    /// Mirrors the schema's (snapshot_id, rate_key_id, unit, tier_min,
    /// tier_max) uniqueness.
    fn rate_conflicts(&self, rate: &PricingRate) -> bool {
        self.rates.iter().any(|r| {
            r.snapshot_id == rate.snapshot_id
                && r.rate_key_id == rate.rate_key_id
                && r.unit == rate.unit
                && r.tier_min == rate.tier_min
                && r.tier_max == rate.tier_max
        })
    }

    fn find_key(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Option<&RateKey> {
        self.keys.iter().find(|k| {
            k.cloud == cloud
                && k.service == service
                && k.product_family == product_family
                && k.region == region
                && &k.attributes == attrs
        })
    }

    fn activate(&mut self, id: Uuid) -> Result<()> {
        let target = self
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .context("snapshot to activate not found")?;

        for s in &mut self.snapshots {
            if s.id != id
                && s.cloud == target.cloud
                && s.region == target.region
                && s.provider_alias == target.provider_alias
                && s.is_active
            {
                s.is_active = false;
                s.state = SnapshotState::Archived;
            }
        }
        let s = self
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .expect("target checked above");
        s.is_active = true;
        s.state = SnapshotState::Ready;
        Ok(())
    }

    /// Matching rates for the active snapshot, tiers ascending (none first)
    fn matching_rates(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
        unit: &str,
        alias: &str,
    ) -> Vec<(PricingRate, &PricingSnapshot)> {
        let Some(snapshot) = self.snapshots.iter().find(|s| {
            s.cloud == cloud
                && s.region == region
                && s.provider_alias == alias
                && s.is_active
                && s.state == SnapshotState::Ready
        }) else {
            return Vec::new();
        };

        let key_ids: Vec<Uuid> = self
            .keys
            .iter()
            .filter(|k| {
                k.cloud == cloud
                    && k.region == region
                    && k.service == service
                    && k.product_family == product_family
                    && attrs.iter().all(|(ak, av)| k.attributes.get(ak) == Some(av))
            })
            .map(|k| k.id)
            .collect();

        let mut rates: Vec<(PricingRate, &PricingSnapshot)> = self
            .rates
            .iter()
            .filter(|r| {
                r.snapshot_id == snapshot.id && r.unit == unit && key_ids.contains(&r.rate_key_id)
            })
            .map(|r| (r.clone(), snapshot))
            .collect();

        rates.sort_by(|(a, _), (b, _)| match (a.tier_min, b.tier_min) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        });
        rates
    }
}

/// Shared-state in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total committed snapshot rows (test helper)
    pub fn snapshot_count(&self) -> usize {
        self.state.lock().unwrap().snapshots.len()
    }

    /// Total committed rate rows (test helper)
    pub fn rate_count(&self) -> usize {
        self.state.lock().unwrap().rates.len()
    }
}

#[async_trait]
impl PricingStore for MemoryStore {
    async fn create_snapshot(&self, snapshot: &PricingSnapshot) -> Result<()> {
        self.state.lock().unwrap().insert_snapshot(snapshot)
    }

    async fn get_snapshot(&self, id: Uuid) -> Result<Option<PricingSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state.snapshots.iter().find(|s| s.id == id).cloned())
    }

    async fn get_active_snapshot(
        &self,
        cloud: CloudProvider,
        region: &str,
        alias: &str,
    ) -> Result<Option<PricingSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .iter()
            .find(|s| {
                s.cloud == cloud
                    && s.region == region
                    && s.provider_alias == alias
                    && s.is_active
                    && s.state == SnapshotState::Ready
            })
            .cloned())
    }

    async fn activate_snapshot(&self, id: Uuid) -> Result<()> {
        self.state.lock().unwrap().activate(id)
    }

    async fn list_snapshots(
        &self,
        cloud: CloudProvider,
        region: &str,
    ) -> Result<Vec<PricingSnapshot>> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<PricingSnapshot> = state
            .snapshots
            .iter()
            .filter(|s| s.cloud == cloud && s.region == region)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn find_snapshot_by_hash(
        &self,
        cloud: CloudProvider,
        region: &str,
        alias: &str,
        hash: &str,
    ) -> Result<Option<PricingSnapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .iter()
            .filter(|s| {
                s.cloud == cloud
                    && s.region == region
                    && s.provider_alias == alias
                    && s.hash == hash
            })
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn upsert_rate_key(&self, key: &RateKey) -> Result<RateKey> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.find_key(
            key.cloud,
            &key.service,
            &key.product_family,
            &key.region,
            &key.attributes,
        ) {
            return Ok(existing.clone());
        }
        state.keys.push(key.clone());
        Ok(key.clone())
    }

    async fn get_rate_key(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Result<Option<RateKey>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .find_key(cloud, service, product_family, region, attrs)
            .cloned())
    }

    async fn create_rate(&self, rate: &PricingRate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.rate_conflicts(rate) {
            bail!(
                "duplicate rate for snapshot {} key {} unit {}",
                rate.snapshot_id,
                rate.rate_key_id,
                rate.unit
            );
        }
        state.rates.push(rate.clone());
        Ok(())
    }

    async fn bulk_create_rates(&self, rates: &[PricingRate]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let mut seen = HashSet::new();
        for rate in rates {
            let key = (
                rate.snapshot_id,
                rate.rate_key_id,
                rate.unit.clone(),
                rate.tier_min,
                rate.tier_max,
            );
            if !seen.insert(key) || state.rate_conflicts(rate) {
                bail!(
                    "duplicate rate for snapshot {} key {} unit {}",
                    rate.snapshot_id,
                    rate.rate_key_id,
                    rate.unit
                );
            }
        }
        state.rates.extend_from_slice(rates);
        Ok(())
    }

    async fn count_rates(&self, snapshot_id: Uuid) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rates
            .iter()
            .filter(|r| r.snapshot_id == snapshot_id)
            .count() as i64)
    }

    async fn resolve_rate(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
        unit: &str,
        alias: &str,
    ) -> Result<Option<ResolvedRate>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .matching_rates(cloud, service, product_family, region, attrs, unit, alias)
            .into_iter()
            .next()
            .map(|(rate, snapshot)| ResolvedRate {
                price: rate.price,
                currency: rate.currency,
                confidence: rate.confidence,
                tier_min: rate.tier_min,
                tier_max: rate.tier_max,
                snapshot_id: snapshot.id,
                source: snapshot.source.clone(),
            }))
    }

    async fn resolve_tiered_rates(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
        unit: &str,
        alias: &str,
    ) -> Result<Vec<TieredRate>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .matching_rates(cloud, service, product_family, region, attrs, unit, alias)
            .into_iter()
            .map(|(rate, _)| TieredRate {
                min: rate.tier_min.unwrap_or_default(),
                max: rate.tier_max,
                price: rate.price,
                confidence: rate.confidence,
            })
            .collect())
    }

    async fn begin_tx(&self) -> Result<Box<dyn PricingTx>> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            pending_snapshots: Vec::new(),
            pending_keys: Vec::new(),
            pending_rates: Vec::new(),
            pending_activations: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

/// Buffered transaction: nothing is visible until commit
pub struct MemoryTx {
    state: Arc<Mutex<MemState>>,
    pending_snapshots: Vec<PricingSnapshot>,
    pending_keys: Vec<RateKey>,
    pending_rates: Vec<PricingRate>,
    pending_activations: Vec<Uuid>,
}

#[async_trait]
impl PricingTx for MemoryTx {
    async fn create_snapshot(&mut self, snapshot: &PricingSnapshot) -> Result<()> {
        self.pending_snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn upsert_rate_key(&mut self, key: &RateKey) -> Result<RateKey> {
        let same_identity = |k: &RateKey| {
            k.cloud == key.cloud
                && k.service == key.service
                && k.product_family == key.product_family
                && k.region == key.region
                && k.attributes == key.attributes
        };

        if let Some(existing) = self.pending_keys.iter().find(|k| same_identity(k)) {
            return Ok(existing.clone());
        }
        {
            let state = self.state.lock().unwrap();
            if let Some(existing) = state.keys.iter().find(|k| same_identity(k)) {
                return Ok(existing.clone());
            }
        }
        self.pending_keys.push(key.clone());
        Ok(key.clone())
    }

    async fn create_rate(&mut self, rate: &PricingRate) -> Result<()> {
        self.pending_rates.push(rate.clone());
        Ok(())
    }

    async fn activate_snapshot(&mut self, id: Uuid) -> Result<()> {
        self.pending_activations.push(id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        // Constraint checks before any mutation so a failed commit
        // publishes nothing.
        for snapshot in &self.pending_snapshots {
            if state.snapshots.iter().any(|s| {
                s.cloud == snapshot.cloud
                    && s.region == snapshot.region
                    && s.provider_alias == snapshot.provider_alias
                    && s.hash == snapshot.hash
            }) {
                bail!(
                    "duplicate snapshot content for {}/{}/{}",
                    snapshot.cloud,
                    snapshot.region,
                    snapshot.provider_alias
                );
            }
        }
        let mut seen = HashSet::new();
        for rate in &self.pending_rates {
            let key = (
                rate.snapshot_id,
                rate.rate_key_id,
                rate.unit.clone(),
                rate.tier_min,
                rate.tier_max,
            );
            if !seen.insert(key) || state.rate_conflicts(rate) {
                bail!(
                    "duplicate rate for snapshot {} key {} unit {}",
                    rate.snapshot_id,
                    rate.rate_key_id,
                    rate.unit
                );
            }
        }
        for snapshot in &self.pending_snapshots {
            state.snapshots.push(snapshot.clone());
        }
        state.keys.extend(self.pending_keys);
        state.rates.extend(self.pending_rates);
        for id in self.pending_activations {
            state.activate(id)?;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
