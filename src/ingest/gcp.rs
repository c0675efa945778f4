//! GCP Cloud Billing Catalog API client
//!
//! Lists all billable services, then pages each service's SKUs. Tiered
//! rates in a SKU's pricing expression each become one `RawPrice`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::ingest::fetch::{
    parse_price, to_snake_case, NormalizedRate, PriceFetcher, PriceNormalizer, RawPrice,
};
use crate::model::{CloudProvider, RateKey};

const GCP_BILLING_BASE: &str = "https://cloudbilling.googleapis.com/v1";

/// GCP pricing client configuration
#[derive(Debug, Clone)]
pub struct GcpPricingConfig {
    pub http_timeout: Duration,
    /// Services to fetch; empty = all
    pub services: Vec<String>,
}

impl Default for GcpPricingConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10 * 60),
            services: all_gcp_services(),
        }
    }
}

/// All GCP services with catalog pricing
pub fn all_gcp_services() -> Vec<String> {
    [
        // Compute
        "Compute Engine",
        "Cloud Functions",
        "Cloud Run",
        "Google Kubernetes Engine",
        "App Engine",
        // Storage
        "Cloud Storage",
        "Persistent Disk",
        "Filestore",
        // Database
        "Cloud SQL",
        "Cloud Spanner",
        "Firestore",
        "Cloud Bigtable",
        "Memorystore",
        "AlloyDB",
        // Networking
        "Cloud NAT",
        "Cloud Load Balancing",
        "Cloud DNS",
        "Cloud CDN",
        "Cloud Armor",
        "Cloud VPN",
        "Cloud Interconnect",
        // Analytics
        "BigQuery",
        "Dataflow",
        "Dataproc",
        "Pub/Sub",
        "Cloud Composer",
        // Security
        "Secret Manager",
        "Cloud KMS",
        // Management
        "Cloud Logging",
        "Cloud Monitoring",
        "Cloud Trace",
        // Containers
        "Artifact Registry",
        "Container Registry",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Production GCP Cloud Billing client
pub struct GcpPricingApiClient {
    http: Client,
    base_url: String,
    services: Vec<String>,
}

impl GcpPricingApiClient {
    pub fn new(config: Option<GcpPricingConfig>) -> Self {
        let config = config.unwrap_or_default();
        Self {
            http: Client::builder()
                .timeout(config.http_timeout)
                .build()
                .expect("default reqwest client"),
            base_url: GCP_BILLING_BASE.to_string(),
            services: config.services,
        }
    }

    async fn list_services(&self) -> Result<Vec<GcpService>> {
        let mut all_services = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut url = format!("{}/services", self.base_url);
            if !page_token.is_empty() {
                url.push_str(&format!("?pageToken={page_token}"));
            }

            let response: GcpServicesResponse = self
                .http
                .get(&url)
                .send()
                .await
                .context("services request failed")?
                .error_for_status()
                .context("GCP services API returned an error status")?
                .json()
                .await
                .context("failed to decode services response")?;

            all_services.extend(response.services);
            if response.next_page_token.is_empty() {
                break;
            }
            page_token = response.next_page_token;
        }

        Ok(all_services)
    }

    async fn fetch_service_skus(&self, service_id: &str, region: &str) -> Result<Vec<RawPrice>> {
        let mut all_prices = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut url = format!("{}/{}/skus", self.base_url, service_id);
            if !page_token.is_empty() {
                url.push_str(&format!("?pageToken={page_token}"));
            }

            let response: GcpSkusResponse = self
                .http
                .get(&url)
                .send()
                .await
                .context("skus request failed")?
                .error_for_status()
                .context("GCP SKUs API returned an error status")?
                .json()
                .await
                .context("failed to decode skus response")?;

            for sku in &response.skus {
                if region != "global" && !sku_matches_region(sku, region) {
                    continue;
                }
                all_prices.extend(sku_to_prices(sku, region));
            }

            if response.next_page_token.is_empty() {
                break;
            }
            page_token = response.next_page_token;
        }

        Ok(all_prices)
    }
}

#[async_trait]
impl PriceFetcher for GcpPricingApiClient {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    async fn fetch_region(&self, region: &str) -> Result<Vec<RawPrice>> {
        let services = self
            .list_services()
            .await
            .context("failed to list GCP services")?;

        let mut all_prices = Vec::new();
        for service in &services {
            match self.fetch_service_skus(&service.name, region).await {
                Ok(prices) => all_prices.extend(prices),
                Err(err) => {
                    warn!("Failed to fetch SKUs for {}: {err:#}", service.display_name);
                }
            }
        }

        if all_prices.is_empty() {
            anyhow::bail!("failed to fetch any pricing for GCP region {region}");
        }
        Ok(all_prices)
    }

    fn supported_regions(&self) -> Vec<String> {
        [
            // Americas
            "us-central1", "us-east1", "us-east4", "us-east5",
            "us-west1", "us-west2", "us-west3", "us-west4",
            "us-south1",
            "northamerica-northeast1", "northamerica-northeast2",
            "southamerica-east1", "southamerica-west1",
            // Europe
            "europe-west1", "europe-west2", "europe-west3",
            "europe-west4", "europe-west6", "europe-west8", "europe-west9",
            "europe-north1", "europe-central2",
            "europe-southwest1",
            // Asia Pacific
            "asia-east1", "asia-east2",
            "asia-northeast1", "asia-northeast2", "asia-northeast3",
            "asia-south1", "asia-south2",
            "asia-southeast1", "asia-southeast2",
            "australia-southeast1", "australia-southeast2",
            // Middle East
            "me-west1", "me-central1",
            // Global services
            "global",
        ]
        .iter()
        .map(|r| r.to_string())
        .collect()
    }

    fn supported_services(&self) -> Vec<String> {
        self.services.clone()
    }

    fn is_real_api(&self) -> bool {
        true
    }
}

fn sku_matches_region(sku: &GcpSku, region: &str) -> bool {
    if sku.service_regions.is_empty() {
        return true; // Global SKU
    }
    sku.service_regions
        .iter()
        .any(|r| r == region || r == "global")
}

fn sku_to_prices(sku: &GcpSku, region: &str) -> Vec<RawPrice> {
    let mut prices = Vec::new();

    for pricing_info in &sku.pricing_info {
        for tier_rate in &pricing_info.pricing_expression.tiered_rates {
            let unit_price =
                tier_rate.unit_price.units as f64 + tier_rate.unit_price.nanos as f64 / 1e9;
            if unit_price == 0.0 {
                continue; // Free tier
            }

            let mut price = RawPrice {
                sku: sku.sku_id.clone(),
                service_code: sku.category.service_display_name.clone(),
                product_family: sku.category.resource_family.clone(),
                region: region.to_string(),
                unit: pricing_info.pricing_expression.usage_unit.clone(),
                price_per_unit: format!("{unit_price:.10}"),
                currency: tier_rate.unit_price.currency_code.clone(),
                attributes: build_sku_attributes(sku),
                tier_start: None,
                tier_end: None,
                effective_date: None,
            };
            if tier_rate.start_usage_amount > 0.0 {
                price.tier_start = Some(tier_rate.start_usage_amount);
            }

            prices.push(price);
        }
    }

    prices
}

fn build_sku_attributes(sku: &GcpSku) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    if !sku.description.is_empty() {
        attrs.insert("description".to_string(), sku.description.clone());
    }
    if !sku.category.resource_group.is_empty() {
        attrs.insert("resourceGroup".to_string(), sku.category.resource_group.clone());
    }
    if !sku.category.usage_type.is_empty() {
        attrs.insert("usageType".to_string(), sku.category.usage_type.clone());
    }
    if let Some(region) = sku.service_regions.iter().find(|r| !r.is_empty()) {
        attrs.insert("serviceRegion".to_string(), region.clone());
    }
    attrs
}

#[derive(Debug, Deserialize)]
struct GcpServicesResponse {
    #[serde(default)]
    services: Vec<GcpService>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: String,
}

#[derive(Debug, Deserialize)]
struct GcpService {
    /// Format: `services/{service_id}`
    name: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct GcpSkusResponse {
    #[serde(default)]
    skus: Vec<GcpSku>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcpSku {
    #[serde(rename = "skuId")]
    sku_id: String,
    description: String,
    category: GcpCategory,
    #[serde(rename = "serviceRegions")]
    service_regions: Vec<String>,
    #[serde(rename = "pricingInfo")]
    pricing_info: Vec<GcpPricingInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcpCategory {
    #[serde(rename = "serviceDisplayName")]
    service_display_name: String,
    #[serde(rename = "resourceFamily")]
    resource_family: String,
    #[serde(rename = "resourceGroup")]
    resource_group: String,
    #[serde(rename = "usageType")]
    usage_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcpPricingInfo {
    #[serde(rename = "pricingExpression")]
    pricing_expression: GcpPricingExpression,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcpPricingExpression {
    #[serde(rename = "usageUnit")]
    usage_unit: String,
    #[serde(rename = "tieredRates")]
    tiered_rates: Vec<GcpTieredRate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcpTieredRate {
    #[serde(rename = "startUsageAmount")]
    start_usage_amount: f64,
    #[serde(rename = "unitPrice")]
    unit_price: GcpMoney,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcpMoney {
    #[serde(rename = "currencyCode")]
    currency_code: String,
    #[serde(deserialize_with = "units_from_string_or_int")]
    units: i64,
    nanos: i32,
}

/// The Billing API serializes `units` as a JSON string.
fn units_from_string_or_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::String(s) => s.parse().map_err(D::Error::custom),
        StringOrInt::Int(i) => Ok(i),
    }
}

/// Normalizes GCP catalog prices to canonical rates
pub struct GcpPricingNormalizer;

impl PriceNormalizer for GcpPricingNormalizer {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    fn normalize(&self, raw: &[RawPrice]) -> Result<Vec<NormalizedRate>> {
        let mut rates = Vec::new();

        for r in raw {
            let Ok(price) = parse_price(&r.price_per_unit) else {
                continue;
            };
            if price.is_zero() {
                continue;
            }

            let rate_key = RateKey::new(
                CloudProvider::Gcp,
                r.service_code.clone(),
                r.product_family.clone(),
                r.region.clone(),
                normalize_gcp_attributes(&r.attributes),
            );

            rates.push(NormalizedRate {
                rate_key,
                unit: normalize_gcp_unit(&r.unit),
                price,
                currency: r.currency.clone(),
                confidence: 1.0,
                tier_min: r.tier_start.and_then(rust_decimal::Decimal::from_f64_retain),
                tier_max: r.tier_end.and_then(rust_decimal::Decimal::from_f64_retain),
            });
        }

        Ok(rates)
    }
}

fn normalize_gcp_attributes(
    raw: &HashMap<String, String>,
) -> std::collections::BTreeMap<String, String> {
    let mut result = std::collections::BTreeMap::new();
    for (k, v) in raw {
        if v.is_empty() {
            continue;
        }
        let key = match k.as_str() {
            "resourceGroup" => "resource_group".to_string(),
            "usageType" => "usage_type".to_string(),
            "description" => "description".to_string(),
            "serviceRegion" => "service_region".to_string(),
            other => to_snake_case(other),
        };
        result.insert(key, v.to_lowercase());
    }
    result
}

fn normalize_gcp_unit(unit: &str) -> String {
    match unit {
        "h" => "hours".to_string(),
        "mo" => "month".to_string(),
        "GiBy" => "GB".to_string(),
        "GiBy.h" => "GB-hours".to_string(),
        "GiBy.mo" => "GB-month".to_string(),
        "By" => "bytes".to_string(),
        "count" => "count".to_string(),
        "request" => "requests".to_string(),
        "s" => "seconds".to_string(),
        other => other.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_table() {
        for (input, expected) in [
            ("h", "hours"),
            ("GiBy.mo", "GB-month"),
            ("By", "bytes"),
            ("request", "requests"),
            ("GiBy.d", "giby.d"),
        ] {
            assert_eq!(normalize_gcp_unit(input), expected);
        }
    }

    #[test]
    fn money_units_and_nanos_combine() {
        let sku = GcpSku {
            sku_id: "0000-0000".to_string(),
            description: "N1 Predefined Instance Core".to_string(),
            category: GcpCategory {
                service_display_name: "Compute Engine".to_string(),
                resource_family: "Compute".to_string(),
                ..GcpCategory::default()
            },
            service_regions: vec!["us-central1".to_string()],
            pricing_info: vec![GcpPricingInfo {
                pricing_expression: GcpPricingExpression {
                    usage_unit: "h".to_string(),
                    tiered_rates: vec![GcpTieredRate {
                        start_usage_amount: 0.0,
                        unit_price: GcpMoney {
                            currency_code: "USD".to_string(),
                            units: 0,
                            nanos: 31_611_000,
                        },
                    }],
                },
            }],
        };

        let prices = sku_to_prices(&sku, "us-central1");
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].price_per_unit, "0.0316110000");
        assert_eq!(prices[0].unit, "h");
    }

    #[test]
    fn free_tiers_are_skipped() {
        let sku = GcpSku {
            pricing_info: vec![GcpPricingInfo {
                pricing_expression: GcpPricingExpression {
                    usage_unit: "GiBy.mo".to_string(),
                    tiered_rates: vec![GcpTieredRate {
                        start_usage_amount: 0.0,
                        unit_price: GcpMoney::default(),
                    }],
                },
            }],
            ..GcpSku::default()
        };
        assert!(sku_to_prices(&sku, "us-central1").is_empty());
    }

    #[test]
    fn region_matching_handles_global() {
        let mut sku = GcpSku::default();
        assert!(sku_matches_region(&sku, "us-central1"));

        sku.service_regions = vec!["global".to_string()];
        assert!(sku_matches_region(&sku, "us-central1"));

        sku.service_regions = vec!["europe-west1".to_string()];
        assert!(!sku_matches_region(&sku, "us-central1"));
    }

    #[test]
    fn units_decode_from_string() {
        let money: GcpMoney =
            serde_json::from_str(r#"{"currencyCode":"USD","units":"3","nanos":500000000}"#)
                .unwrap();
        assert_eq!(money.units, 3);
        assert_eq!(money.nanos, 500_000_000);
    }
}
