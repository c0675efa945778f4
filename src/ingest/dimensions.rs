//! Dimension filtering
//!
//! Provider catalogs carry dozens of attributes per product; only a few
//! matter for matching. An allowlist per (cloud, service) keeps rate keys
//! small and prevents key-space explosion. Unconfigured services pass
//! through unfiltered.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;

use crate::ingest::fetch::{NormalizedRate, PriceNormalizer, RawPrice};
use crate::model::CloudProvider;

/// Configuration for one allowed dimension
#[derive(Debug, Clone)]
pub struct DimensionConfig {
    pub key: String,
    pub is_required: bool,
    pub priority: u32,
}

/// Per-service dimension allowlist
#[derive(Debug, Clone, Default)]
pub struct DimensionAllowlist {
    // cloud:service -> dimension -> config
    dimensions: HashMap<String, HashMap<String, DimensionConfig>>,
}

impl DimensionAllowlist {
    pub fn new() -> Self {
        let mut list = Self::default();
        list.load_defaults();
        list
    }

    fn load_defaults(&mut self) {
        use CloudProvider::Aws;

        self.add(Aws, "AmazonEC2", "instance_type", true, 100);
        self.add(Aws, "AmazonEC2", "os", true, 90);
        self.add(Aws, "AmazonEC2", "tenancy", false, 80);
        self.add(Aws, "AmazonEC2", "volume_type", false, 70);
        self.add(Aws, "AmazonEC2", "product_family", false, 60);
        self.add(Aws, "AmazonEC2", "usage_type", false, 60);
        self.add(Aws, "AmazonEC2", "capacity_status", false, 50);

        self.add(Aws, "AmazonRDS", "instance_type", true, 100);
        self.add(Aws, "AmazonRDS", "engine", true, 90);
        self.add(Aws, "AmazonRDS", "deployment", false, 70);
        self.add(Aws, "AmazonRDS", "license", false, 60);

        self.add(Aws, "AWSLambda", "memory_size", false, 80);
        self.add(Aws, "AWSLambda", "group", false, 70);
        self.add(Aws, "AWSLambda", "architecture", false, 60);

        self.add(Aws, "AmazonS3", "storage_class", true, 100);
        self.add(Aws, "AmazonS3", "volume_type", false, 80);

        self.add(Aws, "ElasticLoadBalancing", "product_family", true, 100);
        self.add(Aws, "ElasticLoadBalancing", "usage_type", false, 70);

        self.add(Aws, "AmazonDynamoDB", "group", false, 80);
        self.add(Aws, "AmazonDynamoDB", "usage_type", false, 70);
    }

    pub fn add(
        &mut self,
        cloud: CloudProvider,
        service: &str,
        dimension: &str,
        required: bool,
        priority: u32,
    ) {
        self.dimensions
            .entry(format!("{cloud}:{service}"))
            .or_default()
            .insert(
                dimension.to_string(),
                DimensionConfig {
                    key: dimension.to_string(),
                    is_required: required,
                    priority,
                },
            );
    }

    pub fn allowed(
        &self,
        cloud: CloudProvider,
        service: &str,
    ) -> Option<&HashMap<String, DimensionConfig>> {
        self.dimensions.get(&format!("{cloud}:{service}"))
    }

    pub fn required(&self, cloud: CloudProvider, service: &str) -> Vec<String> {
        self.allowed(cloud, service)
            .map(|dims| {
                dims.values()
                    .filter(|c| c.is_required)
                    .map(|c| c.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_allowed(&self, cloud: CloudProvider, service: &str, dimension: &str) -> bool {
        match self.allowed(cloud, service) {
            Some(dims) => dims.contains_key(dimension),
            None => true, // no list = allow all
        }
    }

    /// Filter attributes down to the allowlist for a service.
    pub fn filter(
        &self,
        cloud: CloudProvider,
        service: &str,
        attrs: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        match self.allowed(cloud, service) {
            Some(allowed) => attrs
                .iter()
                .filter(|(k, _)| allowed.contains_key(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => attrs.clone(),
        }
    }
}

/// Wraps a normalizer with dimension filtering and post-filter dedup
pub struct FilteredNormalizer<N> {
    inner: N,
    allowlist: DimensionAllowlist,
}

impl<N: PriceNormalizer> FilteredNormalizer<N> {
    pub fn new(inner: N) -> Self {
        Self {
            inner,
            allowlist: DimensionAllowlist::new(),
        }
    }

    pub fn with_allowlist(mut self, allowlist: DimensionAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    /// Filtering can collapse distinct raw keys onto one; keep the first.
    fn deduplicate(rates: Vec<NormalizedRate>) -> Vec<NormalizedRate> {
        let mut seen = HashSet::new();
        rates
            .into_iter()
            .filter(|r| seen.insert(format!("{}|{}", r.rate_key.descriptor(), r.unit)))
            .collect()
    }
}

impl<N: PriceNormalizer> PriceNormalizer for FilteredNormalizer<N> {
    fn cloud(&self) -> CloudProvider {
        self.inner.cloud()
    }

    fn normalize(&self, raw: &[RawPrice]) -> Result<Vec<NormalizedRate>> {
        let mut rates = self.inner.normalize(raw)?;
        for rate in &mut rates {
            rate.rate_key.attributes = self.allowlist.filter(
                rate.rate_key.cloud,
                &rate.rate_key.service,
                &rate.rate_key.attributes,
            );
        }
        Ok(Self::deduplicate(rates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::aws::AwsPricingApiNormalizer;

    #[test]
    fn filter_keeps_only_allowed_dimensions() {
        let allowlist = DimensionAllowlist::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("instance_type".to_string(), "t3.micro".to_string());
        attrs.insert("os".to_string(), "linux".to_string());
        attrs.insert("clock_speed".to_string(), "2.5 ghz".to_string());

        let filtered = allowlist.filter(CloudProvider::Aws, "AmazonEC2", &attrs);
        assert!(filtered.contains_key("instance_type"));
        assert!(filtered.contains_key("os"));
        assert!(!filtered.contains_key("clock_speed"));
    }

    #[test]
    fn unconfigured_service_passes_through() {
        let allowlist = DimensionAllowlist::new();
        let mut attrs = BTreeMap::new();
        attrs.insert("anything".to_string(), "goes".to_string());

        let filtered = allowlist.filter(CloudProvider::Aws, "AmazonRoute53", &attrs);
        assert_eq!(filtered, attrs);
        assert!(allowlist.is_allowed(CloudProvider::Aws, "AmazonRoute53", "anything"));
    }

    #[test]
    fn required_dimensions_reported() {
        let allowlist = DimensionAllowlist::new();
        let mut required = allowlist.required(CloudProvider::Aws, "AmazonEC2");
        required.sort();
        assert_eq!(required, vec!["instance_type", "os"]);
    }

    #[test]
    fn filtering_deduplicates_collapsed_keys() {
        let normalizer = FilteredNormalizer::new(AwsPricingApiNormalizer::new());

        // Two raw products that differ only in a disallowed dimension.
        let make = |clock: &str| RawPrice {
            service_code: "AmazonEC2".to_string(),
            product_family: "Compute Instance".to_string(),
            region: "us-east-1".to_string(),
            unit: "Hrs".to_string(),
            price_per_unit: "0.0104".to_string(),
            currency: "USD".to_string(),
            attributes: [
                ("instanceType".to_string(), "t3.micro".to_string()),
                ("clockSpeed".to_string(), clock.to_string()),
            ]
            .into_iter()
            .collect(),
            ..RawPrice::default()
        };

        let rates = normalizer.normalize(&[make("2.5 GHz"), make("3.1 GHz")]).unwrap();
        assert_eq!(rates.len(), 1);
        assert!(!rates[0].rate_key.attributes.contains_key("clock_speed"));
    }
}
