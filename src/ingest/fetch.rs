//! Fetcher and normalizer contracts
//!
//! Fetchers pull raw retail prices from a provider API and never touch the
//! database. Normalizers turn raw records into canonical rates with
//! snake_case attribute keys, canonical units, and decimal prices.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{CloudProvider, RateKey};

/// A raw price record as returned by a cloud pricing API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPrice {
    pub sku: String,
    pub service_code: String,
    pub product_family: String,
    pub region: String,
    pub unit: String,
    /// Price kept as the provider's string form until normalization
    pub price_per_unit: String,
    pub currency: String,
    pub attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<DateTime<Utc>>,
}

/// The canonical output of normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRate {
    pub rate_key: RateKey,
    pub unit: String,
    pub price: Decimal,
    pub currency: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_min: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier_max: Option<Decimal>,
}

/// Fetches raw prices from a cloud pricing API
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    fn cloud(&self) -> CloudProvider;

    /// Fetch all prices for a region. No database access.
    async fn fetch_region(&self, region: &str) -> Result<Vec<RawPrice>>;

    fn supported_regions(&self) -> Vec<String>;

    fn supported_services(&self) -> Vec<String>;

    /// Whether this fetcher calls a real cloud API. Production runs refuse
    /// any fetcher that does not override this to `true`.
    fn is_real_api(&self) -> bool {
        false
    }
}

/// Converts raw prices to normalized rates
pub trait PriceNormalizer: Send + Sync {
    fn cloud(&self) -> CloudProvider;

    fn normalize(&self, raw: &[RawPrice]) -> Result<Vec<NormalizedRate>>;
}

/// Generic attribute canonicalization: lowercase snake_case keys,
/// lowercase trimmed values, empty and `n/a` values dropped.
pub fn normalize_attributes(raw: &HashMap<String, String>) -> std::collections::BTreeMap<String, String> {
    let mut result = std::collections::BTreeMap::new();
    for (k, v) in raw {
        let key = k.to_lowercase().replace(' ', "_");
        let val = v.trim().to_lowercase();
        if val.is_empty() || val == "na" || val == "n/a" {
            continue;
        }
        result.insert(key, val);
    }
    result
}

/// camelCase / PascalCase → snake_case for attribute keys
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else if ch == ' ' || ch == '-' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Parse a provider price string into a decimal. Empty strings are zero.
pub fn parse_price(s: &str) -> Result<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Decimal::ZERO);
    }
    s.parse::<Decimal>()
        .map_err(|e| anyhow::anyhow!("invalid price {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_normalization_drops_noise() {
        let mut raw = HashMap::new();
        raw.insert("Instance Type".to_string(), " T3.Micro ".to_string());
        raw.insert("tenancy".to_string(), "N/A".to_string());
        raw.insert("license".to_string(), "".to_string());

        let attrs = normalize_attributes(&raw);
        assert_eq!(attrs.get("instance_type").map(String::as_str), Some("t3.micro"));
        assert!(!attrs.contains_key("tenancy"));
        assert!(!attrs.contains_key("license"));
    }

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("resourceGroup"), "resource_group");
        assert_eq!(to_snake_case("IsPrimaryMeterRegion"), "is_primary_meter_region");
        assert_eq!(to_snake_case("usage type"), "usage_type");
    }

    #[test]
    fn price_parsing() {
        assert_eq!(parse_price("0.0104").unwrap().to_string(), "0.0104");
        assert_eq!(parse_price("").unwrap(), Decimal::ZERO);
        assert!(parse_price("not-a-price").is_err());
    }
}
