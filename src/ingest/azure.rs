//! Azure Retail Prices API client
//!
//! Fetches complete regional catalogs by paginating the public Retail
//! Prices endpoint with an OData region filter.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::ingest::fetch::{
    parse_price, to_snake_case, NormalizedRate, PriceFetcher, PriceNormalizer, RawPrice,
};
use crate::model::{CloudProvider, RateKey};

const AZURE_RETAIL_PRICES_URL: &str = "https://prices.azure.com/api/retail/prices";
const AZURE_API_VERSION: &str = "2023-01-01-preview";

/// Azure pricing client configuration
#[derive(Debug, Clone)]
pub struct AzurePricingConfig {
    pub http_timeout: Duration,
    /// Services to fetch; empty = all
    pub services: Vec<String>,
}

impl Default for AzurePricingConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10 * 60),
            services: all_azure_services(),
        }
    }
}

/// All Azure services with retail pricing
pub fn all_azure_services() -> Vec<String> {
    [
        // Compute
        "Virtual Machines",
        "Virtual Machine Scale Sets",
        "Azure Functions",
        "Container Instances",
        "Azure Kubernetes Service",
        "App Service",
        "Batch",
        // Storage
        "Storage",
        "Blob Storage",
        "File Storage",
        "Queue Storage",
        "Table Storage",
        "Managed Disks",
        "Azure NetApp Files",
        // Database
        "SQL Database",
        "Azure Database for MySQL",
        "Azure Database for PostgreSQL",
        "Azure Cosmos DB",
        "Azure Cache for Redis",
        "Azure Synapse Analytics",
        "Azure Database for MariaDB",
        // Networking
        "Virtual Network",
        "Load Balancer",
        "Application Gateway",
        "VPN Gateway",
        "Azure DNS",
        "Azure Front Door",
        "Azure CDN",
        "Azure Firewall",
        "ExpressRoute",
        "Bandwidth",
        // Analytics
        "Azure Databricks",
        "HDInsight",
        "Azure Data Factory",
        "Azure Stream Analytics",
        "Event Hubs",
        // Integration
        "Service Bus",
        "Event Grid",
        "Logic Apps",
        "API Management",
        // Security
        "Key Vault",
        "Azure Active Directory",
        "Azure DDoS Protection",
        "Azure Sentinel",
        // Management
        "Azure Monitor",
        "Log Analytics",
        "Application Insights",
        "Azure Automation",
        // Containers
        "Container Registry",
        // AI/ML
        "Azure Machine Learning",
        "Cognitive Services",
        "Azure OpenAI Service",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Production Azure Retail Prices client
pub struct AzurePricingApiClient {
    http: Client,
    base_url: String,
    services: Vec<String>,
}

impl AzurePricingApiClient {
    pub fn new(config: Option<AzurePricingConfig>) -> Self {
        let config = config.unwrap_or_default();
        Self {
            http: Client::builder()
                .timeout(config.http_timeout)
                .build()
                .expect("default reqwest client"),
            base_url: AZURE_RETAIL_PRICES_URL.to_string(),
            services: config.services,
        }
    }

    fn build_url(&self, filter: &str) -> String {
        format!(
            "{}?$filter={}&api-version={}",
            self.base_url,
            urlencode(filter),
            AZURE_API_VERSION
        )
    }

    async fn fetch_page(&self, page_url: &str) -> Result<(Vec<RawPrice>, String)> {
        let response: AzurePricingResponse = self
            .http
            .get(page_url)
            .send()
            .await
            .context("failed to fetch pricing")?
            .error_for_status()
            .context("Azure API returned an error status")?
            .json()
            .await
            .context("failed to decode response")?;

        let mut prices = Vec::new();
        for item in response.items {
            // Zero-priced and reservation-only items carry no signal.
            if item.retail_price == 0.0 {
                continue;
            }

            let mut price = RawPrice {
                sku: item.sku_id.clone(),
                service_code: item.service_name.clone(),
                product_family: item.service_family.clone(),
                region: item.arm_region_name.clone(),
                unit: item.unit_of_measure.clone(),
                price_per_unit: format!("{:.10}", item.retail_price),
                currency: item.currency_code.clone(),
                attributes: build_attributes(&item),
                tier_start: None,
                tier_end: None,
                effective_date: None,
            };

            if !item.effective_start_date.is_empty() {
                price.effective_date = item
                    .effective_start_date
                    .parse::<DateTime<Utc>>()
                    .ok();
            }
            if item.tier_minimum_units > 0.0 {
                price.tier_start = Some(item.tier_minimum_units);
            }

            prices.push(price);
        }

        Ok((prices, response.next_page_link))
    }
}

#[async_trait]
impl PriceFetcher for AzurePricingApiClient {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Azure
    }

    async fn fetch_region(&self, region: &str) -> Result<Vec<RawPrice>> {
        let mut all_prices = Vec::new();
        let filter = format!("armRegionName eq '{region}'");
        let mut next_link = self.build_url(&filter);

        while !next_link.is_empty() {
            let (prices, next) = self
                .fetch_page(&next_link)
                .await
                .context("failed to fetch Azure pricing page")?;
            all_prices.extend(prices);
            next_link = next;

            if all_prices.len() % 10_000 == 0 && !all_prices.is_empty() {
                debug!("Fetched {} Azure prices for {region}", all_prices.len());
            }
        }

        if all_prices.is_empty() {
            anyhow::bail!("failed to fetch any pricing for Azure region {region}");
        }
        Ok(all_prices)
    }

    fn supported_regions(&self) -> Vec<String> {
        [
            // Americas
            "eastus", "eastus2", "westus", "westus2", "westus3",
            "centralus", "northcentralus", "southcentralus", "westcentralus",
            "canadacentral", "canadaeast",
            "brazilsouth", "brazilsoutheast",
            // Europe
            "northeurope", "westeurope",
            "uksouth", "ukwest",
            "francecentral", "francesouth",
            "germanywestcentral", "germanynorth",
            "switzerlandnorth", "switzerlandwest",
            "norwayeast", "norwaywest",
            "swedencentral",
            "polandcentral",
            // Asia Pacific
            "eastasia", "southeastasia",
            "australiaeast", "australiasoutheast", "australiacentral",
            "japaneast", "japanwest",
            "koreacentral", "koreasouth",
            "centralindia", "westindia", "southindia",
            // Middle East & Africa
            "uaenorth", "uaecentral",
            "southafricanorth", "southafricawest",
            "qatarcentral",
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

fn build_attributes(item: &AzurePriceItem) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let pairs = [
        ("skuName", &item.sku_name),
        ("productName", &item.product_name),
        ("meterName", &item.meter_name),
        ("armSkuName", &item.arm_sku_name),
        ("type", &item.item_type),
        ("productId", &item.product_id),
        ("meterId", &item.meter_id),
        ("location", &item.location),
    ];
    for (key, value) in pairs {
        if !value.is_empty() {
            attrs.insert(key.to_string(), value.clone());
        }
    }
    if item.is_primary_meter_region {
        attrs.insert("isPrimaryMeterRegion".to_string(), "true".to_string());
    }
    attrs
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            ' ' => out.push_str("%20"),
            '\'' => out.push_str("%27"),
            c if c.is_ascii_alphanumeric() || "-_.~=".contains(c) => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct AzurePricingResponse {
    #[serde(rename = "Items", default)]
    items: Vec<AzurePriceItem>,
    #[serde(rename = "NextPageLink", default)]
    next_page_link: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AzurePriceItem {
    #[serde(rename = "currencyCode")]
    currency_code: String,
    #[serde(rename = "tierMinimumUnits")]
    tier_minimum_units: f64,
    #[serde(rename = "retailPrice")]
    retail_price: f64,
    #[serde(rename = "armRegionName")]
    arm_region_name: String,
    location: String,
    #[serde(rename = "effectiveStartDate")]
    effective_start_date: String,
    #[serde(rename = "meterId")]
    meter_id: String,
    #[serde(rename = "meterName")]
    meter_name: String,
    #[serde(rename = "productId")]
    product_id: String,
    #[serde(rename = "skuId")]
    sku_id: String,
    #[serde(rename = "productName")]
    product_name: String,
    #[serde(rename = "skuName")]
    sku_name: String,
    #[serde(rename = "serviceName")]
    service_name: String,
    #[serde(rename = "serviceFamily")]
    service_family: String,
    #[serde(rename = "unitOfMeasure")]
    unit_of_measure: String,
    #[serde(rename = "type")]
    item_type: String,
    #[serde(rename = "isPrimaryMeterRegion")]
    is_primary_meter_region: bool,
    #[serde(rename = "armSkuName")]
    arm_sku_name: String,
}

/// Normalizes Azure retail prices to canonical rates
pub struct AzurePricingNormalizer;

impl PriceNormalizer for AzurePricingNormalizer {
    fn cloud(&self) -> CloudProvider {
        CloudProvider::Azure
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
                CloudProvider::Azure,
                r.service_code.clone(),
                r.product_family.clone(),
                r.region.clone(),
                normalize_azure_attributes(&r.attributes),
            );

            rates.push(NormalizedRate {
                rate_key,
                unit: normalize_azure_unit(&r.unit),
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

fn normalize_azure_attributes(
    raw: &HashMap<String, String>,
) -> std::collections::BTreeMap<String, String> {
    let mut result = std::collections::BTreeMap::new();
    for (k, v) in raw {
        if v.is_empty() {
            continue;
        }
        let key = match k.as_str() {
            "skuName" => "sku_name".to_string(),
            "productName" => "product_name".to_string(),
            "meterName" => "meter_name".to_string(),
            "armSkuName" => "vm_size".to_string(),
            "type" => "type".to_string(),
            "location" => "location".to_string(),
            "isPrimaryMeterRegion" => "is_primary_region".to_string(),
            other => to_snake_case(other),
        };
        result.insert(key, v.to_lowercase());
    }
    result
}

fn normalize_azure_unit(unit: &str) -> String {
    match unit {
        "1 Hour" | "1/Hour" => "hours".to_string(),
        "1 GB/Hour" => "GB-hours".to_string(),
        "1 GB/Month" => "GB-month".to_string(),
        "1 GB" => "GB".to_string(),
        "10K" => "10K-requests".to_string(),
        "1M" => "1M-requests".to_string(),
        "10,000 Transactions" => "10K-transactions".to_string(),
        "100" => "100-units".to_string(),
        "1" => "unit".to_string(),
        other => other.to_lowercase().replace(' ', "-"),
    }
}
