//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use cloudrate::ingest::{PriceFetcher, RawPrice};
use cloudrate::model::{CloudProvider, PricingRate, RateKey, SnapshotBuilder};
use cloudrate::store::{MemoryStore, PricingStore, PricingTx};

/// Fetcher returning a fixed price list. `real` controls `is_real_api`.
pub struct FakeFetcher {
    pub prices: Vec<RawPrice>,
    pub real: bool,
}

#[async_trait]
impl PriceFetcher for FakeFetcher {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    async fn fetch_region(&self, _region: &str) -> Result<Vec<RawPrice>> {
        Ok(self.prices.clone())
    }

    fn supported_regions(&self) -> Vec<String> {
        vec!["us-east-1".to_string()]
    }

    fn supported_services(&self) -> Vec<String> {
        vec!["AmazonEC2".to_string(), "AmazonS3".to_string()]
    }

    fn is_real_api(&self) -> bool {
        self.real
    }
}

/// Raw price with AWS-style camelCase attributes.
pub fn raw_price(
    service: &str,
    product_family: &str,
    attrs: &[(&str, &str)],
    unit: &str,
    price: &str,
) -> RawPrice {
    RawPrice {
        sku: format!("SKU-{service}-{unit}"),
        service_code: service.to_string(),
        product_family: product_family.to_string(),
        region: "us-east-1".to_string(),
        unit: unit.to_string(),
        price_per_unit: price.to_string(),
        currency: "USD".to_string(),
        attributes: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        tier_start: None,
        tier_end: None,
        effective_date: None,
    }
}

/// The three-rate catalog from the happy-path scenario.
pub fn happy_path_prices() -> Vec<RawPrice> {
    vec![
        raw_price(
            "AmazonEC2",
            "Compute Instance",
            &[("instanceType", "t3.micro"), ("operatingSystem", "Linux")],
            "Hrs",
            "0.0104",
        ),
        raw_price(
            "AmazonEC2",
            "Storage",
            &[("volumeApiName", "gp3")],
            "GB-Mo",
            "0.08",
        ),
        raw_price(
            "AmazonS3",
            "Storage",
            &[("storageClass", "Standard")],
            "GB-Mo",
            "0.023",
        ),
    ]
}

/// Seed an active snapshot with `rate_count` committed rates and return
/// its id.
pub async fn seed_active_snapshot(
    store: &MemoryStore,
    cloud: CloudProvider,
    region: &str,
    alias: &str,
    hash: &str,
    rate_count: usize,
) -> Uuid {
    let snapshot = SnapshotBuilder::new(cloud, region, "seed")
        .with_alias(alias)
        .build(hash);
    let snapshot_id = snapshot.id;
    store.create_snapshot(&snapshot).await.unwrap();

    for i in 0..rate_count {
        let key = RateKey::new(
            cloud,
            "AmazonEC2",
            "Compute Instance",
            region,
            [("instance_type".to_string(), format!("seed.{i}"))]
                .into_iter()
                .collect(),
        );
        let key = store.upsert_rate_key(&key).await.unwrap();
        store
            .create_rate(&PricingRate {
                id: Uuid::new_v4(),
                snapshot_id,
                rate_key_id: key.id,
                unit: "hours".to_string(),
                price: "0.01".parse().unwrap(),
                currency: "USD".to_string(),
                confidence: 1.0,
                tier_min: None,
                tier_max: None,
                effective_date: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    store.activate_snapshot(snapshot_id).await.unwrap();
    snapshot_id
}

/// Store wrapper whose transactions fail at activation, after buffering
/// snapshot and rate writes.
pub struct ActivationFailingStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl PricingStore for ActivationFailingStore {
    async fn create_snapshot(&self, snapshot: &cloudrate::model::PricingSnapshot) -> Result<()> {
        self.inner.create_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, id: Uuid) -> Result<Option<cloudrate::model::PricingSnapshot>> {
        self.inner.get_snapshot(id).await
    }

    async fn get_active_snapshot(
        &self,
        cloud: CloudProvider,
        region: &str,
        alias: &str,
    ) -> Result<Option<cloudrate::model::PricingSnapshot>> {
        self.inner.get_active_snapshot(cloud, region, alias).await
    }

    async fn activate_snapshot(&self, id: Uuid) -> Result<()> {
        self.inner.activate_snapshot(id).await
    }

    async fn list_snapshots(
        &self,
        cloud: CloudProvider,
        region: &str,
    ) -> Result<Vec<cloudrate::model::PricingSnapshot>> {
        self.inner.list_snapshots(cloud, region).await
    }

    async fn find_snapshot_by_hash(
        &self,
        cloud: CloudProvider,
        region: &str,
        alias: &str,
        hash: &str,
    ) -> Result<Option<cloudrate::model::PricingSnapshot>> {
        self.inner
            .find_snapshot_by_hash(cloud, region, alias, hash)
            .await
    }

    async fn upsert_rate_key(&self, key: &RateKey) -> Result<RateKey> {
        self.inner.upsert_rate_key(key).await
    }

    async fn get_rate_key(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &std::collections::BTreeMap<String, String>,
    ) -> Result<Option<RateKey>> {
        self.inner
            .get_rate_key(cloud, service, product_family, region, attrs)
            .await
    }

    async fn create_rate(&self, rate: &PricingRate) -> Result<()> {
        self.inner.create_rate(rate).await
    }

    async fn bulk_create_rates(&self, rates: &[PricingRate]) -> Result<()> {
        self.inner.bulk_create_rates(rates).await
    }

    async fn count_rates(&self, snapshot_id: Uuid) -> Result<i64> {
        self.inner.count_rates(snapshot_id).await
    }

    async fn resolve_rate(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &std::collections::BTreeMap<String, String>,
        unit: &str,
        alias: &str,
    ) -> Result<Option<cloudrate::model::ResolvedRate>> {
        self.inner
            .resolve_rate(cloud, service, product_family, region, attrs, unit, alias)
            .await
    }

    async fn resolve_tiered_rates(
        &self,
        cloud: CloudProvider,
        service: &str,
        product_family: &str,
        region: &str,
        attrs: &std::collections::BTreeMap<String, String>,
        unit: &str,
        alias: &str,
    ) -> Result<Vec<cloudrate::model::TieredRate>> {
        self.inner
            .resolve_tiered_rates(cloud, service, product_family, region, attrs, unit, alias)
            .await
    }

    async fn begin_tx(&self) -> Result<Box<dyn PricingTx>> {
        let inner = self.inner.begin_tx().await?;
        Ok(Box::new(ActivationFailingTx { inner }))
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

pub struct ActivationFailingTx {
    inner: Box<dyn PricingTx>,
}

#[async_trait]
impl PricingTx for ActivationFailingTx {
    async fn create_snapshot(&mut self, snapshot: &cloudrate::model::PricingSnapshot) -> Result<()> {
        self.inner.create_snapshot(snapshot).await
    }

    async fn upsert_rate_key(&mut self, key: &RateKey) -> Result<RateKey> {
        self.inner.upsert_rate_key(key).await
    }

    async fn create_rate(&mut self, rate: &PricingRate) -> Result<()> {
        self.inner.create_rate(rate).await
    }

    async fn activate_snapshot(&mut self, _id: Uuid) -> Result<()> {
        anyhow::bail!("injected activation failure")
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

#[allow(dead_code)]
pub fn fetcher(prices: Vec<RawPrice>) -> Arc<FakeFetcher> {
    Arc::new(FakeFetcher { prices, real: true })
}
