//! AWS Pricing API integration
//!
//! Walks the public offer index: per-service `region_index.json`, then the
//! region's current version document. Products and their OnDemand price
//! dimensions become `RawPrice` records.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ingest::fetch::{
    normalize_attributes, parse_price, NormalizedRate, PriceFetcher, PriceNormalizer, RawPrice,
};
use crate::model::{CloudProvider, RateKey};

const AWS_PRICING_BASE: &str = "https://pricing.us-east-1.amazonaws.com";
const AWS_INDEX_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches retail pricing from the AWS Pricing API
pub struct AwsPricingApiFetcher {
    http: Client,
    base_url: String,
    regions: Vec<&'static str>,
    services: Vec<String>,
}

impl Default for AwsPricingApiFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsPricingApiFetcher {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .timeout(AWS_INDEX_TIMEOUT)
                .build()
                .expect("default reqwest client"),
            base_url: AWS_PRICING_BASE.to_string(),
            regions: vec![
                // US
                "us-east-1", "us-east-2", "us-west-1", "us-west-2",
                // Canada
                "ca-central-1", "ca-west-1",
                // Europe
                "eu-west-1", "eu-west-2", "eu-west-3", "eu-central-1", "eu-central-2",
                "eu-north-1", "eu-south-1", "eu-south-2",
                // Asia Pacific
                "ap-southeast-1", "ap-southeast-2", "ap-southeast-3", "ap-southeast-4",
                "ap-northeast-1", "ap-northeast-2", "ap-northeast-3",
                "ap-east-1", "ap-south-1", "ap-south-2",
                // South America
                "sa-east-1",
                // Middle East
                "me-south-1", "me-central-1", "il-central-1",
                // Africa
                "af-south-1",
            ],
            services: [
                "AmazonEC2", "AmazonRDS", "AWSLambda", "AmazonS3", "ElasticLoadBalancing",
                "AmazonDynamoDB", "AmazonElastiCache", "AmazonCloudWatch", "AmazonRoute53",
                "AWSSecretsManager", "AWSKMS", "AmazonSNS", "AmazonSQS", "AmazonECS",
                "AmazonEKS", "AWSFargate", "AmazonCloudFront", "AWSCodeBuild",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    /// Restrict the services fetched (used for the SERVICES env filter).
    pub fn set_allowed_services(&mut self, services: Vec<String>) {
        if !services.is_empty() {
            self.services = services;
        }
    }

    async fn fetch_service_pricing(&self, service: &str, region: &str) -> Result<Vec<RawPrice>> {
        let index_url = format!(
            "{}/offers/v1.0/aws/{}/current/region_index.json",
            self.base_url, service
        );
        let index: AwsRegionIndex = self
            .http
            .get(&index_url)
            .send()
            .await
            .context("index request failed")?
            .error_for_status()
            .context("index not found")?
            .json()
            .await
            .context("failed to parse region index")?;

        let region_entry = index
            .regions
            .get(region)
            .with_context(|| format!("region {region} not found in index"))?;

        let region_url = format!("{}{}", self.base_url, region_entry.current_version_url);
        let price_list: AwsPriceList = self
            .http
            .get(&region_url)
            .send()
            .await
            .context("region pricing request failed")?
            .error_for_status()
            .context("region pricing not found")?
            .json()
            .await
            .context("failed to parse price list")?;

        Ok(parse_price_list(&price_list, service, region))
    }
}

#[async_trait]
impl PriceFetcher for AwsPricingApiFetcher {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    async fn fetch_region(&self, region: &str) -> Result<Vec<RawPrice>> {
        let mut all_prices = Vec::new();

        for service in &self.services {
            match self.fetch_service_pricing(service, region).await {
                Ok(prices) => {
                    debug!("Fetched {} prices for {service}", prices.len());
                    all_prices.extend(prices);
                }
                Err(err) => {
                    warn!("Failed to fetch {service} pricing: {err:#}");
                }
            }
        }

        Ok(all_prices)
    }

    fn supported_regions(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.to_string()).collect()
    }

    fn supported_services(&self) -> Vec<String> {
        self.services.clone()
    }

    fn is_real_api(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct AwsRegionIndex {
    regions: HashMap<String, AwsRegionEntry>,
}

#[derive(Debug, Deserialize)]
struct AwsRegionEntry {
    #[serde(rename = "currentVersionUrl")]
    current_version_url: String,
}

#[derive(Debug, Deserialize)]
struct AwsPriceList {
    #[serde(default)]
    products: HashMap<String, AwsProduct>,
    #[serde(default)]
    terms: AwsTerms,
}

#[derive(Debug, Default, Deserialize)]
struct AwsTerms {
    #[serde(rename = "OnDemand", default)]
    on_demand: HashMap<String, HashMap<String, AwsTerm>>,
}

#[derive(Debug, Deserialize)]
struct AwsProduct {
    #[serde(rename = "productFamily", default)]
    product_family: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AwsTerm {
    #[serde(rename = "effectiveDate", default)]
    effective_date: String,
    #[serde(rename = "priceDimensions", default)]
    price_dimensions: HashMap<String, AwsPriceDimension>,
}

#[derive(Debug, Deserialize)]
struct AwsPriceDimension {
    #[serde(rename = "beginRange", default)]
    begin_range: String,
    #[serde(rename = "endRange", default)]
    end_range: String,
    #[serde(default)]
    unit: String,
    #[serde(rename = "pricePerUnit", default)]
    price_per_unit: AwsPricePerUnit,
}

#[derive(Debug, Default, Deserialize)]
struct AwsPricePerUnit {
    #[serde(rename = "USD", default)]
    usd: String,
}

fn parse_price_list(price_list: &AwsPriceList, service: &str, region: &str) -> Vec<RawPrice> {
    let mut prices = Vec::new();

    for (sku, product_terms) in &price_list.terms.on_demand {
        let Some(product) = price_list.products.get(sku) else {
            continue;
        };

        // Filter out other regions' products.
        if let Some(code) = product.attributes.get("regionCode") {
            if !code.is_empty() && code != region {
                continue;
            }
        }
        if let Some(location) = product.attributes.get("location") {
            if !location.is_empty() && !matches_region(location, region) {
                continue;
            }
        }

        for term in product_terms.values() {
            for dim in term.price_dimensions.values() {
                let mut price = RawPrice {
                    sku: sku.clone(),
                    service_code: service.to_string(),
                    product_family: product.product_family.clone(),
                    region: region.to_string(),
                    unit: dim.unit.clone(),
                    price_per_unit: dim.price_per_unit.usd.clone(),
                    currency: "USD".to_string(),
                    attributes: product.attributes.clone(),
                    tier_start: None,
                    tier_end: None,
                    effective_date: None,
                };

                if !dim.begin_range.is_empty() && dim.begin_range != "0" {
                    price.tier_start = dim.begin_range.parse().ok();
                }
                if !dim.end_range.is_empty() && dim.end_range != "Inf" {
                    price.tier_end = dim.end_range.parse().ok();
                }
                if !term.effective_date.is_empty() {
                    price.effective_date = parse_effective_date(&term.effective_date);
                }

                prices.push(price);
            }
        }
    }

    prices
}

fn parse_effective_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}

/// AWS price lists name regions by location ("US East (N. Virginia)");
/// map those back to region codes.
fn matches_region(location: &str, region: &str) -> bool {
    let candidates: &[&str] = match region {
        // US
        "us-east-1" => &["US East (N. Virginia)", "US-East"],
        "us-east-2" => &["US East (Ohio)"],
        "us-west-1" => &["US West (N. California)"],
        "us-west-2" => &["US West (Oregon)"],
        // Canada
        "ca-central-1" => &["Canada (Central)"],
        "ca-west-1" => &["Canada West (Calgary)"],
        // Europe
        "eu-west-1" => &["EU (Ireland)", "Europe (Ireland)", "EU-West"],
        "eu-west-2" => &["EU (London)", "Europe (London)"],
        "eu-west-3" => &["EU (Paris)", "Europe (Paris)"],
        "eu-central-1" => &["EU (Frankfurt)", "Europe (Frankfurt)"],
        "eu-central-2" => &["EU (Zurich)", "Europe (Zurich)"],
        "eu-north-1" => &["EU (Stockholm)", "Europe (Stockholm)"],
        "eu-south-1" => &["EU (Milan)", "Europe (Milan)"],
        "eu-south-2" => &["EU (Spain)", "Europe (Spain)"],
        // Asia Pacific
        "ap-southeast-1" => &["Asia Pacific (Singapore)"],
        "ap-southeast-2" => &["Asia Pacific (Sydney)"],
        "ap-southeast-3" => &["Asia Pacific (Jakarta)"],
        "ap-southeast-4" => &["Asia Pacific (Melbourne)"],
        "ap-northeast-1" => &["Asia Pacific (Tokyo)"],
        "ap-northeast-2" => &["Asia Pacific (Seoul)"],
        "ap-northeast-3" => &["Asia Pacific (Osaka)"],
        "ap-east-1" => &["Asia Pacific (Hong Kong)"],
        "ap-south-1" => &["Asia Pacific (Mumbai)"],
        "ap-south-2" => &["Asia Pacific (Hyderabad)"],
        // South America
        "sa-east-1" => &["South America (São Paulo)", "South America (Sao Paulo)"],
        // Middle East
        "me-south-1" => &["Middle East (Bahrain)"],
        "me-central-1" => &["Middle East (UAE)"],
        "il-central-1" => &["Israel (Tel Aviv)"],
        // Africa
        "af-south-1" => &["Africa (Cape Town)"],
        _ => return false,
    };

    candidates
        .iter()
        .any(|c| location.contains(c) || *c == location)
}

/// Normalizes AWS Pricing API records to canonical rates
pub struct AwsPricingApiNormalizer {
    dimension_mapping: HashMap<&'static str, &'static str>,
}

impl Default for AwsPricingApiNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsPricingApiNormalizer {
    pub fn new() -> Self {
        Self {
            dimension_mapping: HashMap::from([
                ("instanceType", "instance_type"),
                ("instanceFamily", "instance_family"),
                ("operatingSystem", "os"),
                ("tenancy", "tenancy"),
                ("preInstalledSw", "software"),
                ("licenseModel", "license"),
                ("capacitystatus", "capacity_status"),
                ("volumeApiName", "volume_type"),
                ("volumeType", "volume_class"),
                ("storageClass", "storage_class"),
                ("databaseEngine", "engine"),
                ("databaseEdition", "edition"),
                ("deploymentOption", "deployment"),
                ("productFamily", "product_family"),
                ("usagetype", "usage_type"),
                ("memory", "memory"),
                ("vcpu", "vcpu"),
                ("physicalProcessor", "processor"),
                ("clockSpeed", "clock_speed"),
                ("networkPerformance", "network"),
            ]),
        }
    }

    fn normalize_aws_attributes(
        &self,
        raw: &HashMap<String, String>,
    ) -> std::collections::BTreeMap<String, String> {
        // Rename the known dimensions first, then apply the generic rule.
        let mut renamed = HashMap::with_capacity(raw.len());
        for (k, v) in raw {
            let key = self
                .dimension_mapping
                .get(k.as_str())
                .map(|canonical| canonical.to_string())
                .unwrap_or_else(|| k.clone());
            renamed.insert(key, v.clone());
        }
        normalize_attributes(&renamed)
    }
}

impl PriceNormalizer for AwsPricingApiNormalizer {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    fn normalize(&self, raw: &[RawPrice]) -> Result<Vec<NormalizedRate>> {
        let mut rates = Vec::new();

        for r in raw {
            if r.price_per_unit.is_empty() {
                continue;
            }
            let Ok(price) = parse_price(&r.price_per_unit) else {
                continue;
            };
            if price.is_zero() {
                continue;
            }

            let attrs = self.normalize_aws_attributes(&r.attributes);
            let rate_key = RateKey::new(
                CloudProvider::Aws,
                r.service_code.clone(),
                r.product_family.clone(),
                r.region.clone(),
                attrs,
            );

            rates.push(NormalizedRate {
                rate_key,
                unit: normalize_aws_unit(&r.unit),
                price,
                currency: r.currency.clone(),
                // Direct from the AWS API = full confidence.
                confidence: 1.0,
                tier_min: r.tier_start.and_then(Decimal::from_f64),
                tier_max: r.tier_end.and_then(Decimal::from_f64),
            });
        }

        Ok(rates)
    }
}

fn normalize_aws_unit(unit: &str) -> String {
    match unit {
        "Hrs" | "hrs" => "hours".to_string(),
        "GB-Mo" | "GB-month" => "GB-month".to_string(),
        "GB" => "GB".to_string(),
        "Requests" | "requests" => "requests".to_string(),
        "GB-Second" | "GB-Seconds" | "Lambda-GB-Second" => "GB-seconds".to_string(),
        "Quantity" => "units".to_string(),
        "LCU-Hrs" => "LCU-hours".to_string(),
        "NLCU-Hrs" => "NLCU-hours".to_string(),
        other => other.to_lowercase(),
    }
}
