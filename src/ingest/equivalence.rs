//! Region equivalence detection
//!
//! Many regions publish byte-identical pricing. Hashing each region's
//! rates with region-identifying attributes removed groups equivalent
//! regions under one canonical region (first alphabetically), which lets
//! operators skip redundant snapshots.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ingest::fetch::NormalizedRate;
use crate::ingest::hash::{canonical_price, hex_lower};

/// A group of regions with identical pricing
#[derive(Debug, Clone)]
pub struct RegionGroup {
    /// First alphabetically among the equivalent regions
    pub canonical_region: String,
    pub aliases: Vec<String>,
    pub equivalence_hash: String,
    pub rate_count: usize,
}

/// Detects equivalent pricing between regions
#[derive(Debug, Default)]
pub struct EquivalenceDetector {
    hash_to_regions: HashMap<String, Vec<String>>,
    region_to_hash: HashMap<String, String>,
    region_rate_counts: HashMap<String, usize>,
}

impl EquivalenceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one region's rates.
    pub fn add_region_rates(&mut self, region: &str, rates: &[NormalizedRate]) {
        let hash = equivalence_hash(rates);
        self.region_to_hash.insert(region.to_string(), hash.clone());
        self.region_rate_counts.insert(region.to_string(), rates.len());
        self.hash_to_regions
            .entry(hash)
            .or_default()
            .push(region.to_string());
    }

    /// Group regions by equivalence hash, canonical region first.
    pub fn detect_equivalence(&self) -> Vec<RegionGroup> {
        let mut groups: Vec<RegionGroup> = self
            .hash_to_regions
            .iter()
            .map(|(hash, regions)| {
                let mut regions = regions.clone();
                regions.sort();
                let canonical = regions[0].clone();
                let rate_count = self.region_rate_counts.get(&canonical).copied().unwrap_or(0);
                RegionGroup {
                    canonical_region: canonical,
                    aliases: regions[1..].to_vec(),
                    equivalence_hash: hash.clone(),
                    rate_count,
                }
            })
            .collect();

        groups.sort_by(|a, b| a.canonical_region.cmp(&b.canonical_region));
        groups
    }

    /// Canonical region for a region, itself when not analyzed or unique.
    pub fn canonical_region(&self, region: &str) -> String {
        let Some(hash) = self.region_to_hash.get(region) else {
            return region.to_string();
        };
        let Some(regions) = self.hash_to_regions.get(hash) else {
            return region.to_string();
        };
        let mut sorted = regions.clone();
        sorted.sort();
        sorted
            .into_iter()
            .next()
            .unwrap_or_else(|| region.to_string())
    }
}

#[derive(Serialize)]
struct RateForHash<'a> {
    #[serde(rename = "s")]
    service: &'a str,
    #[serde(rename = "pf")]
    product_family: &'a str,
    #[serde(rename = "u")]
    unit: &'a str,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "c")]
    currency: &'a str,
    #[serde(rename = "a")]
    attributes: BTreeMap<&'a str, &'a str>,
}

/// Hash representing all pricing for a region with region-identifying
/// attributes excluded. Truncated to 16 bytes for storage efficiency.
fn equivalence_hash(rates: &[NormalizedRate]) -> String {
    let mut hash_rates: Vec<RateForHash> = rates
        .iter()
        .map(|r| RateForHash {
            service: &r.rate_key.service,
            product_family: &r.rate_key.product_family,
            unit: &r.unit,
            price: canonical_price(&r.price),
            currency: &r.currency,
            attributes: r
                .rate_key
                .attributes
                .iter()
                .filter(|(k, _)| {
                    !matches!(k.as_str(), "region" | "region_code" | "location" | "service_region")
                })
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
        })
        .collect();

    hash_rates.sort_by(|a, b| {
        (a.service, a.product_family, &a.price).cmp(&(b.service, b.product_family, &b.price))
    });

    let data = serde_json::to_vec(&hash_rates).unwrap_or_default();
    let digest = Sha256::digest(&data);
    hex_lower(&digest[..16])
}
