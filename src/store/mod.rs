//! Pricing store interface
//!
//! `PricingStore` is the seam between ingestion/resolution and the
//! database. The commit flow runs entirely through `PricingTx` so that a
//! snapshot, its rates, and the activation swap become visible atomically
//! or not at all.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{
    CloudProvider, PricingRate, PricingSnapshot, RateKey, ResolvedRate, TieredRate,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Database connection configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DB_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/cloudrate".to_string()),
            max_connections: 25,
            min_connections: 5,
            max_lifetime: Some(Duration::from_secs(300)),
        }
    }
}

/// Interface for pricing database operations
#[async_trait]
pub trait PricingStore: Send + Sync {
    // Snapshots
    async fn create_snapshot(&self, snapshot: &PricingSnapshot) -> Result<()>;
    async fn get_snapshot(&self, id: Uuid) -> Result<Option<PricingSnapshot>>;
    /// The single snapshot the resolver reads: is_active AND state = ready.
    async fn get_active_snapshot(
        &self,
        cloud: CloudProvider,
        region: &str,
        alias: &str,
    ) -> Result<Option<PricingSnapshot>>;
    async fn activate_snapshot(&self, id: Uuid) -> Result<()>;
    async fn list_snapshots(
        &self,
        cloud: CloudProvider,
        region: &str,
    ) -> Result<Vec<PricingSnapshot>>;
    async fn find_snapshot_by_hash(
        &self,
        cloud: CloudProvider,
        region: &str,
        alias: &str,
        hash: &str,
    ) -> Result<Option<PricingSnapshot>>;

    // Rate keys
    async fn upsert_rate_key(&self, key: &RateKey) -> Result<RateKey>;
    async fn get_rate_key(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Result<Option<RateKey>>;

    // Rates
    async fn create_rate(&self, rate: &PricingRate) -> Result<()>;
    async fn bulk_create_rates(&self, rates: &[PricingRate]) -> Result<()>;
    async fn count_rates(&self, snapshot_id: Uuid) -> Result<i64>;

    // Resolution
    #[allow(clippy::too_many_arguments)]
    async fn resolve_rate(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
        unit: &str,
        alias: &str,
    ) -> Result<Option<ResolvedRate>>;
    #[allow(clippy::too_many_arguments)]
    async fn resolve_tiered_rates(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &BTreeMap<String, String>,
        unit: &str,
        alias: &str,
    ) -> Result<Vec<TieredRate>>;

    // Transactions
    async fn begin_tx(&self) -> Result<Box<dyn PricingTx>>;

    // Health
    async fn ping(&self) -> Result<()>;
    async fn close(&self);
}

/// Transaction interface for atomic snapshot commits
#[async_trait]
pub trait PricingTx: Send {
    async fn create_snapshot(&mut self, snapshot: &PricingSnapshot) -> Result<()>;
    async fn upsert_rate_key(&mut self, key: &RateKey) -> Result<RateKey>;
    async fn create_rate(&mut self, rate: &PricingRate) -> Result<()>;
    /// Archives every other active snapshot for the target's
    /// (cloud, region, alias) and marks the target active + ready.
    async fn activate_snapshot(&mut self, id: Uuid) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}
