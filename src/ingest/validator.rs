//! Pre-commit ingestion governance
//!
//! Pure checks over the normalized rate set: no I/O. A breach fails the
//! whole lifecycle before any backup or database write happens.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{bail, Result};

use crate::ingest::fetch::NormalizedRate;
use crate::model::CloudProvider;

/// Requirements for one service's ingestion
#[derive(Debug, Clone)]
pub struct IngestionContract {
    pub cloud: CloudProvider,
    pub service: String,
    pub required_dimensions: Vec<String>,
    pub min_rate_count: usize,
}

impl IngestionContract {
    pub fn new(cloud: CloudProvider, service: &str, dims: &[&str], min_rate_count: usize) -> Self {
        Self {
            cloud,
            service: service.to_string(),
            required_dimensions: dims.iter().map(|d| d.to_string()).collect(),
            min_rate_count,
        }
    }

    fn key(&self) -> String {
        format!("{}:{}", self.cloud, self.service)
    }
}

/// Default contracts. Required dimensions are relaxed to empty because the
/// provider APIs do not always include the expected attributes.
pub fn default_contracts() -> Vec<IngestionContract> {
    use CloudProvider::*;
    vec![
        IngestionContract::new(Aws, "AmazonEC2", &[], 100),
        IngestionContract::new(Aws, "AmazonRDS", &[], 50),
        IngestionContract::new(Aws, "AmazonS3", &[], 10),
        IngestionContract::new(Aws, "AWSLambda", &[], 5),
        IngestionContract::new(Aws, "AWSELB", &[], 5),
        IngestionContract::new(Aws, "AmazonDynamoDB", &[], 5),
        IngestionContract::new(Azure, "Virtual Machines", &[], 100),
        IngestionContract::new(Azure, "Storage", &[], 20),
        IngestionContract::new(Gcp, "Compute Engine", &[], 100),
        IngestionContract::new(Gcp, "Cloud Storage", &[], 10),
    ]
}

/// Per-service validation outcome
#[derive(Debug, Clone)]
pub struct ServiceValidation {
    pub service: String,
    pub rate_count: usize,
    pub required_count: usize,
    pub missing_dimensions: Vec<String>,
    pub is_valid: bool,
}

/// Full validation report for a rate set
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub service_results: HashMap<String, ServiceValidation>,
    pub total_rates: usize,
    pub total_dimensions: usize,
    pub missing_services: Vec<String>,
    pub errors: Vec<String>,
}

/// Validates ingested rates against contracts and the coverage floor
#[derive(Debug, Clone)]
pub struct IngestionValidator {
    contracts: HashMap<String, IngestionContract>,
    min_coverage_percent: f64,
    check_duplicates: bool,
}

impl Default for IngestionValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionValidator {
    pub fn new() -> Self {
        let mut contracts = HashMap::new();
        for c in default_contracts() {
            contracts.insert(c.key(), c);
        }
        Self {
            contracts,
            min_coverage_percent: 95.0,
            check_duplicates: false,
        }
    }

    pub fn set_min_coverage_percent(&mut self, pct: f64) {
        self.min_coverage_percent = pct;
    }

    /// Duplicate detection is opt-in: tiered rates legitimately share a
    /// rate key, so the check only makes sense for non-tiered catalogs.
    pub fn with_duplicate_check(mut self, enabled: bool) -> Self {
        self.check_duplicates = enabled;
        self
    }

    pub fn add_contract(&mut self, contract: IngestionContract) {
        self.contracts.insert(contract.key(), contract);
    }

    /// Run every pre-commit check; the first breach aborts.
    pub fn validate_all(&self, rates: &[NormalizedRate], prev_rate_count: usize) -> Result<()> {
        if rates.is_empty() {
            bail!("normalization produced 0 rates");
        }

        self.validate_prices_positive(rates)?;
        self.validate_dimensions_complete(rates)?;
        if self.check_duplicates {
            self.validate_no_duplicates(rates)?;
        }
        if prev_rate_count > 0 {
            self.validate_coverage_not_decreased(rates.len(), prev_rate_count)?;
        }
        Ok(())
    }

    pub fn validate_prices_positive(&self, rates: &[NormalizedRate]) -> Result<()> {
        for r in rates {
            if r.price.is_sign_negative() && !r.price.is_zero() {
                bail!(
                    "negative price found: {}/{}/{} = {}",
                    r.rate_key.service,
                    r.rate_key.product_family,
                    r.rate_key.region,
                    r.price
                );
            }
        }
        Ok(())
    }

    /// Every required dimension must appear in at least one rate's
    /// attribute map for that service. Services absent from this ingest
    /// are not checked.
    pub fn validate_dimensions_complete(&self, rates: &[NormalizedRate]) -> Result<()> {
        let by_service = dimensions_by_service(rates);

        for contract in self.contracts.values() {
            let Some(present) = by_service.get(contract.service.as_str()) else {
                continue;
            };
            for dim in &contract.required_dimensions {
                if !present.contains(dim.as_str()) {
                    bail!(
                        "service {} missing required dimension: {}",
                        contract.service,
                        dim
                    );
                }
            }
        }
        Ok(())
    }

    pub fn validate_no_duplicates(&self, rates: &[NormalizedRate]) -> Result<()> {
        let mut seen = HashSet::new();
        for r in rates {
            let key = format!("{}|{}", r.rate_key.descriptor(), r.unit);
            if !seen.insert(key.clone()) {
                bail!("duplicate rate key found: {key}");
            }
        }
        Ok(())
    }

    pub fn validate_coverage_not_decreased(
        &self,
        new_count: usize,
        prev_count: usize,
    ) -> Result<()> {
        if new_count == 0 {
            bail!("new snapshot has 0 rates, previous had {prev_count}");
        }

        let coverage_percent = new_count as f64 / prev_count as f64 * 100.0;
        if coverage_percent < self.min_coverage_percent {
            bail!(
                "coverage decreased: new has {} rates ({:.1}%) vs previous {} rates, minimum {:.1}% required",
                new_count,
                coverage_percent,
                prev_count,
                self.min_coverage_percent
            );
        }
        Ok(())
    }

    /// Non-aborting report form: per-service rate counts, missing
    /// dimensions and missing contracted services.
    pub fn validate(&self, cloud: CloudProvider, rates: &[NormalizedRate]) -> ValidationResult {
        let mut result = ValidationResult {
            is_valid: true,
            total_rates: rates.len(),
            ..ValidationResult::default()
        };

        let mut by_service: HashMap<&str, Vec<&NormalizedRate>> = HashMap::new();
        for r in rates {
            by_service.entry(&r.rate_key.service).or_default().push(r);
        }

        let mut all_dims = HashSet::new();
        for r in rates {
            for k in r.rate_key.attributes.keys() {
                all_dims.insert(k.as_str());
            }
        }
        result.total_dimensions = all_dims.len();

        for contract in self.contracts.values() {
            if contract.cloud != cloud {
                continue;
            }

            let service_rates = by_service
                .get(contract.service.as_str())
                .map(Vec::as_slice)
                .unwrap_or_default();

            if service_rates.is_empty() {
                result.missing_services.push(contract.service.clone());
                result.is_valid = false;
                continue;
            }

            let mut present: HashSet<&str> = HashSet::new();
            for r in service_rates {
                for k in r.rate_key.attributes.keys() {
                    present.insert(k.as_str());
                }
            }

            let missing: Vec<String> = contract
                .required_dimensions
                .iter()
                .filter(|d| !present.contains(d.as_str()))
                .cloned()
                .collect();

            let mut is_valid = missing.is_empty();
            if service_rates.len() < contract.min_rate_count {
                result.errors.push(format!(
                    "{}: only {} rates, need {}",
                    contract.service,
                    service_rates.len(),
                    contract.min_rate_count
                ));
                is_valid = false;
            }
            for dim in &missing {
                result.errors.push(format!(
                    "{}: missing required dimension '{}'",
                    contract.service, dim
                ));
            }
            if !is_valid {
                result.is_valid = false;
            }

            result.service_results.insert(
                contract.key(),
                ServiceValidation {
                    service: contract.service.clone(),
                    rate_count: service_rates.len(),
                    required_count: contract.min_rate_count,
                    missing_dimensions: missing,
                    is_valid,
                },
            );
        }

        result
    }
}

fn dimensions_by_service(rates: &[NormalizedRate]) -> HashMap<&str, HashSet<&str>> {
    let mut by_service: HashMap<&str, HashSet<&str>> = HashMap::new();
    for r in rates {
        let dims = by_service.entry(&r.rate_key.service).or_default();
        for k in r.rate_key.attributes.keys() {
            dims.insert(k.as_str());
        }
    }
    by_service
}

/// Helper for building rates in tests and fixtures
pub fn make_rate(
    cloud: CloudProvider,
    service: &str,
    product_family: &str,
    region: &str,
    attrs: &[(&str, &str)],
    unit: &str,
    price: &str,
) -> NormalizedRate {
    let attributes: BTreeMap<String, String> = attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    NormalizedRate {
        rate_key: crate::model::RateKey::new(cloud, service, product_family, region, attributes),
        unit: unit.to_string(),
        price: price.parse().expect("valid decimal literal"),
        currency: "USD".to_string(),
        confidence: 1.0,
        tier_min: None,
        tier_max: None,
    }
}
