//! Pricing drift detection
//!
//! Read-only comparison of two committed rate sets. Rates are indexed by
//! key descriptor + unit; price changes, additions, and removals become
//! drift records.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::ingest::fetch::NormalizedRate;

/// Kind of price movement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftType {
    Increase,
    Decrease,
    New,
    Removed,
}

/// A single price change between two snapshots
#[derive(Debug, Clone)]
pub struct DriftRecord {
    pub service: String,
    pub product_family: String,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub price_delta: Decimal,
    pub percent_change: f64,
    pub unit: String,
    pub drift_type: DriftType,
    pub is_significant: bool,
}

/// Aggregate drift between two rate sets
#[derive(Debug, Clone, Default)]
pub struct DriftSummary {
    pub total_changes: usize,
    pub price_increases: usize,
    pub price_decreases: usize,
    pub new_rates: usize,
    pub removed_rates: usize,
    pub avg_percent_change: f64,
    pub max_percent_change: f64,
    pub significant_changes: usize,
    pub records: Vec<DriftRecord>,
}

impl DriftSummary {
    pub fn has_significant_drift(&self) -> bool {
        self.significant_changes > 0
    }

    pub fn significant_records(&self) -> Vec<&DriftRecord> {
        self.records.iter().filter(|r| r.is_significant).collect()
    }

    pub fn group_by_service(&self) -> HashMap<&str, Vec<&DriftRecord>> {
        let mut by_service: HashMap<&str, Vec<&DriftRecord>> = HashMap::new();
        for record in &self.records {
            by_service
                .entry(record.service.as_str())
                .or_default()
                .push(record);
        }
        by_service
    }
}

impl std::fmt::Display for DriftSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pricing drift: {} changes ({} significant) - {} increases, {} decreases, {} new, {} removed - avg {:.2}%, max {:.2}%",
            self.total_changes,
            self.significant_changes,
            self.price_increases,
            self.price_decreases,
            self.new_rates,
            self.removed_rates,
            self.avg_percent_change,
            self.max_percent_change
        )
    }
}

/// Compares rate sets and flags significant price changes
#[derive(Debug, Clone)]
pub struct DriftDetector {
    /// Fractional change considered significant (0.05 = 5%)
    significance_threshold: f64,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DriftDetector {
    pub fn new() -> Self {
        Self {
            significance_threshold: 0.05,
        }
    }

    pub fn with_threshold(mut self, fraction: f64) -> Self {
        self.significance_threshold = fraction;
        self
    }

    /// Compare two rate sets directly.
    pub fn detect_drift_from_rates(
        &self,
        old_rates: &[NormalizedRate],
        new_rates: &[NormalizedRate],
    ) -> DriftSummary {
        let index = |rates: &[NormalizedRate]| -> HashMap<String, NormalizedRate> {
            rates
                .iter()
                .map(|r| (format!("{}|{}", r.rate_key.descriptor(), r.unit), r.clone()))
                .collect()
        };
        let old_index = index(old_rates);
        let new_index = index(new_rates);

        let mut summary = DriftSummary::default();

        for (key, new_rate) in &new_index {
            match old_index.get(key) {
                Some(old_rate) => {
                    if old_rate.price != new_rate.price {
                        let record = self.changed_record(old_rate, new_rate);
                        if record.is_significant {
                            summary.significant_changes += 1;
                        }
                        match record.drift_type {
                            DriftType::Increase => summary.price_increases += 1,
                            DriftType::Decrease => summary.price_decreases += 1,
                            _ => {}
                        }
                        summary.records.push(record);
                        summary.total_changes += 1;
                    }
                }
                None => {
                    summary.records.push(DriftRecord {
                        service: new_rate.rate_key.service.clone(),
                        product_family: new_rate.rate_key.product_family.clone(),
                        old_price: Decimal::ZERO,
                        new_price: new_rate.price,
                        price_delta: new_rate.price,
                        percent_change: 100.0,
                        unit: new_rate.unit.clone(),
                        drift_type: DriftType::New,
                        is_significant: true,
                    });
                    summary.total_changes += 1;
                    summary.new_rates += 1;
                    summary.significant_changes += 1;
                }
            }
        }

        for (key, old_rate) in &old_index {
            if !new_index.contains_key(key) {
                summary.records.push(DriftRecord {
                    service: old_rate.rate_key.service.clone(),
                    product_family: old_rate.rate_key.product_family.clone(),
                    old_price: old_rate.price,
                    new_price: Decimal::ZERO,
                    price_delta: -old_rate.price,
                    percent_change: -100.0,
                    unit: old_rate.unit.clone(),
                    drift_type: DriftType::Removed,
                    is_significant: true,
                });
                summary.total_changes += 1;
                summary.removed_rates += 1;
                summary.significant_changes += 1;
            }
        }

        if summary.total_changes > 0 {
            let mut total_pct = 0.0;
            let mut max_pct = 0.0f64;
            for record in &summary.records {
                let abs = record.percent_change.abs();
                total_pct += abs;
                if abs > max_pct {
                    max_pct = abs;
                }
            }
            summary.avg_percent_change = total_pct / summary.total_changes as f64;
            summary.max_percent_change = max_pct;
        }

        summary
    }

    fn changed_record(&self, old_rate: &NormalizedRate, new_rate: &NormalizedRate) -> DriftRecord {
        let delta = new_rate.price - old_rate.price;
        let percent_change = if old_rate.price.is_zero() {
            0.0
        } else {
            (delta / old_rate.price * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        };

        DriftRecord {
            service: new_rate.rate_key.service.clone(),
            product_family: new_rate.rate_key.product_family.clone(),
            old_price: old_rate.price,
            new_price: new_rate.price,
            price_delta: delta,
            percent_change,
            unit: new_rate.unit.clone(),
            drift_type: if delta.is_sign_positive() {
                DriftType::Increase
            } else {
                DriftType::Decrease
            },
            is_significant: percent_change.abs() >= self.significance_threshold * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::validator::make_rate;
    use crate::model::CloudProvider;

    fn ec2(instance: &str, price: &str) -> NormalizedRate {
        make_rate(
            CloudProvider::Aws,
            "AmazonEC2",
            "Compute Instance",
            "us-east-1",
            &[("instance_type", instance)],
            "hours",
            price,
        )
    }

    #[test]
    fn no_drift_for_identical_sets() {
        let detector = DriftDetector::new();
        let rates = vec![ec2("t3.micro", "0.0104")];
        let summary = detector.detect_drift_from_rates(&rates, &rates.clone());
        assert_eq!(summary.total_changes, 0);
        assert!(!summary.has_significant_drift());
    }

    #[test]
    fn price_increase_detected() {
        let detector = DriftDetector::new();
        let summary = detector
            .detect_drift_from_rates(&[ec2("t3.micro", "0.0100")], &[ec2("t3.micro", "0.0110")]);

        assert_eq!(summary.total_changes, 1);
        assert_eq!(summary.price_increases, 1);
        let record = &summary.records[0];
        assert_eq!(record.drift_type, DriftType::Increase);
        assert!((record.percent_change - 10.0).abs() < 1e-9);
        assert!(record.is_significant); // 10% >= 5%
    }

    #[test]
    fn small_change_is_insignificant() {
        let detector = DriftDetector::new();
        let summary = detector
            .detect_drift_from_rates(&[ec2("t3.micro", "1.00")], &[ec2("t3.micro", "1.01")]);
        assert_eq!(summary.total_changes, 1);
        assert_eq!(summary.significant_changes, 0);
    }

    #[test]
    fn additions_and_removals_counted() {
        let detector = DriftDetector::new();
        let summary = detector.detect_drift_from_rates(
            &[ec2("t3.micro", "0.0104"), ec2("m5.large", "0.096")],
            &[ec2("t3.micro", "0.0104"), ec2("c5.large", "0.085")],
        );
        assert_eq!(summary.new_rates, 1);
        assert_eq!(summary.removed_rates, 1);
        assert_eq!(summary.total_changes, 2);
        assert!(summary.has_significant_drift());
    }
}
