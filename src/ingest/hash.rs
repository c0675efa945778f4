//! Deterministic content hashing over normalized rate sets
//!
//! Two rate sets hash identically iff they are equal as multisets of
//! (rate key, unit, price) triples. Snapshot metadata (timestamps, source)
//! is excluded so re-ingesting unchanged pricing reproduces the hash.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::ingest::fetch::NormalizedRate;

/// Canonical price string: normalized decimal, trailing zeros stripped,
/// so `0.10` and `0.1000` hash identically.
pub fn canonical_price(price: &Decimal) -> String {
    price.normalize().to_string()
}

/// Compute the lowercase-hex SHA-256 content hash of a rate set.
///
/// Rates are sorted by (key descriptor, unit, canonical price) before
/// hashing, which makes the result independent of input order.
pub fn content_hash(rates: &[NormalizedRate]) -> String {
    let mut entries: Vec<(String, &str, String)> = rates
        .iter()
        .map(|r| (r.rate_key.descriptor(), r.unit.as_str(), canonical_price(&r.price)))
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (descriptor, unit, price) in &entries {
        hasher.update(descriptor.as_bytes());
        hasher.update(unit.as_bytes());
        hasher.update(price.as_bytes());
    }
    hex_lower(&hasher.finalize())
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rust_decimal::Decimal;

    use super::*;
    use crate::model::{CloudProvider, RateKey};

    fn rate(service: &str, attr: (&str, &str), unit: &str, price: &str) -> NormalizedRate {
        let mut attrs = BTreeMap::new();
        attrs.insert(attr.0.to_string(), attr.1.to_string());
        NormalizedRate {
            rate_key: RateKey::new(
                CloudProvider::Aws,
                service,
                "Compute Instance",
                "us-east-1",
                attrs,
            ),
            unit: unit.to_string(),
            price: price.parse().unwrap(),
            currency: "USD".to_string(),
            confidence: 1.0,
            tier_min: None,
            tier_max: None,
        }
    }

    #[test]
    fn hash_is_permutation_invariant() {
        let a = rate("AmazonEC2", ("instance_type", "t3.micro"), "hours", "0.0104");
        let b = rate("AmazonS3", ("storage_class", "standard"), "GB-month", "0.023");
        let c = rate("AmazonEC2", ("instance_type", "m5.large"), "hours", "0.096");

        let forward = content_hash(&[a.clone(), b.clone(), c.clone()]);
        let reversed = content_hash(&[c, b, a]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn hash_changes_with_price() {
        let original = rate("AmazonEC2", ("instance_type", "t3.micro"), "hours", "0.0104");
        let mut bumped = original.clone();
        bumped.price = "0.0105".parse().unwrap();
        assert_ne!(content_hash(&[original]), content_hash(&[bumped]));
    }

    #[test]
    fn hash_changes_with_unit_and_key() {
        let original = rate("AmazonEC2", ("instance_type", "t3.micro"), "hours", "0.0104");

        let mut other_unit = original.clone();
        other_unit.unit = "GB-month".to_string();
        assert_ne!(content_hash(&[original.clone()]), content_hash(&[other_unit]));

        let other_key = rate("AmazonEC2", ("instance_type", "t3.small"), "hours", "0.0104");
        assert_ne!(content_hash(&[original]), content_hash(&[other_key]));
    }

    #[test]
    fn hash_ignores_price_representation() {
        let tenth = rate("AmazonEC2", ("instance_type", "t3.micro"), "hours", "0.10");
        let padded = rate("AmazonEC2", ("instance_type", "t3.micro"), "hours", "0.1000");
        // Key ids differ but descriptors match, so the hashes must too.
        assert_eq!(content_hash(&[tenth]), content_hash(&[padded]));
    }

    #[test]
    fn canonical_price_strips_trailing_zeros() {
        let d: Decimal = "1.2300".parse().unwrap();
        assert_eq!(canonical_price(&d), "1.23");
    }
}
