//! Fetcher and normalizer registry
//!
//! Process-wide mapping from cloud provider to its production fetcher and
//! normalizer. Reads are concurrent; registration takes the write lock.
//! Tests that need custom fetchers build a fresh `FetcherRegistry` instead
//! of mutating the global one.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::{anyhow, Result};

use crate::ingest::aws::{AwsPricingApiFetcher, AwsPricingApiNormalizer};
use crate::ingest::azure::{AzurePricingApiClient, AzurePricingNormalizer};
use crate::ingest::fetch::{PriceFetcher, PriceNormalizer};
use crate::ingest::gcp::{GcpPricingApiClient, GcpPricingNormalizer};
use crate::model::CloudProvider;

static GLOBAL_REGISTRY: OnceLock<FetcherRegistry> = OnceLock::new();

/// The global registry, initialized once with the production defaults.
pub fn registry() -> &'static FetcherRegistry {
    GLOBAL_REGISTRY.get_or_init(|| {
        let registry = FetcherRegistry::new();
        registry.register_defaults();
        registry
    })
}

/// Global lookup that additionally rejects non-real-API fetchers.
pub fn production_fetcher(cloud: CloudProvider) -> Result<Arc<dyn PriceFetcher>> {
    let fetcher = registry().fetcher(cloud)?;
    if !fetcher.is_real_api() {
        return Err(anyhow!(
            "fetcher for {cloud} is not a real API implementation"
        ));
    }
    Ok(fetcher)
}

/// Global normalizer lookup.
pub fn production_normalizer(cloud: CloudProvider) -> Result<Arc<dyn PriceNormalizer>> {
    registry().normalizer(cloud)
}

/// Concurrency-safe fetcher/normalizer mapping
#[derive(Default)]
pub struct FetcherRegistry {
    fetchers: RwLock<HashMap<CloudProvider, Arc<dyn PriceFetcher>>>,
    normalizers: RwLock<HashMap<CloudProvider, Arc<dyn PriceNormalizer>>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the production API clients for all three clouds.
    pub fn register_defaults(&self) {
        self.register_fetcher(CloudProvider::Aws, Arc::new(AwsPricingApiFetcher::new()));
        self.register_normalizer(CloudProvider::Aws, Arc::new(AwsPricingApiNormalizer::new()));

        self.register_fetcher(
            CloudProvider::Azure,
            Arc::new(AzurePricingApiClient::new(None)),
        );
        self.register_normalizer(CloudProvider::Azure, Arc::new(AzurePricingNormalizer));

        self.register_fetcher(CloudProvider::Gcp, Arc::new(GcpPricingApiClient::new(None)));
        self.register_normalizer(CloudProvider::Gcp, Arc::new(GcpPricingNormalizer));
    }

    pub fn register_fetcher(&self, cloud: CloudProvider, fetcher: Arc<dyn PriceFetcher>) {
        self.fetchers.write().unwrap().insert(cloud, fetcher);
    }

    pub fn register_normalizer(&self, cloud: CloudProvider, normalizer: Arc<dyn PriceNormalizer>) {
        self.normalizers.write().unwrap().insert(cloud, normalizer);
    }

    pub fn fetcher(&self, cloud: CloudProvider) -> Result<Arc<dyn PriceFetcher>> {
        self.fetchers
            .read()
            .unwrap()
            .get(&cloud)
            .cloned()
            .ok_or_else(|| anyhow!("no fetcher registered for cloud: {cloud}"))
    }

    pub fn normalizer(&self, cloud: CloudProvider) -> Result<Arc<dyn PriceNormalizer>> {
        self.normalizers
            .read()
            .unwrap()
            .get(&cloud)
            .cloned()
            .ok_or_else(|| anyhow!("no normalizer registered for cloud: {cloud}"))
    }

    /// Whether the registered fetcher for a cloud uses a real API.
    pub fn is_real_api(&self, cloud: CloudProvider) -> bool {
        self.fetchers
            .read()
            .unwrap()
            .get(&cloud)
            .is_some_and(|f| f.is_real_api())
    }
}
