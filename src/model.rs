//! Canonical pricing model
//!
//! Snapshots are immutable point-in-time captures of a provider's retail
//! pricing for one (cloud, region, alias) tuple. Rate keys identify what is
//! priced and are shared across snapshots; rates bind a price to a key
//! within exactly one snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cloud provider tag
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            other => Err(anyhow::anyhow!("unknown cloud provider: {other}")),
        }
    }
}

/// Database state of a snapshot
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    /// Created, not yet validated
    #[default]
    Pending,
    /// Validated, backup written
    Staging,
    /// Committed, resolver can use
    Ready,
    /// Validation or commit failed
    Failed,
    /// Superseded by a newer snapshot
    Archived,
}

impl SnapshotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Staging => "staging",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time pricing capture
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PricingSnapshot {
    pub id: Uuid,
    pub cloud: CloudProvider,
    pub region: String,
    pub provider_alias: String,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    /// Lowercase hex SHA-256 of the normalized rate set
    pub hash: String,
    pub version: String,
    pub is_active: bool,
    pub state: SnapshotState,
    pub created_at: DateTime<Utc>,
}

/// A unique pricing lookup key
///
/// Attribute keys are lowercased snake_case, values lowercased and trimmed.
/// `BTreeMap` keeps iteration order deterministic for hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateKey {
    pub id: Uuid,
    pub cloud: CloudProvider,
    pub service: String,
    pub product_family: String,
    pub region: String,
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl RateKey {
    pub fn new(
        cloud: CloudProvider,
        service: impl Into<String>,
        product_family: impl Into<String>,
        region: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cloud,
            service: service.into(),
            product_family: product_family.into(),
            region: region.into(),
            attributes,
            created_at: Utc::now(),
        }
    }

    /// Canonical descriptor used for hashing and drift indexing:
    /// `cloud|service|product_family|region|k1=v1,k2=v2,...`
    pub fn descriptor(&self) -> String {
        let attrs = self
            .attributes
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}|{}|{}|{}|{}",
            self.cloud, self.service, self.product_family, self.region, attrs
        )
    }
}

/// A price bound to a rate key within a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRate {
    pub id: Uuid,
    pub snapshot_id: Uuid,
    pub rate_key_id: Uuid,
    pub unit: String,
    pub price: Decimal,
    pub currency: String,
    pub confidence: f64,
    pub tier_min: Option<Decimal>,
    pub tier_max: Option<Decimal>,
    pub effective_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of a pricing lookup
#[derive(Debug, Clone)]
pub struct ResolvedRate {
    pub price: Decimal,
    pub currency: String,
    pub confidence: f64,
    pub tier_min: Option<Decimal>,
    pub tier_max: Option<Decimal>,
    pub snapshot_id: Uuid,
    pub source: String,
}

/// A single pricing tier: `[min, max)` with its own unit price
#[derive(Debug, Clone)]
pub struct TieredRate {
    pub min: Decimal,
    /// `None` = unbounded top tier
    pub max: Option<Decimal>,
    pub price: Decimal,
    pub confidence: f64,
}

/// Builder for pricing snapshots
pub struct SnapshotBuilder {
    snapshot: PricingSnapshot,
}

impl SnapshotBuilder {
    pub fn new(cloud: CloudProvider, region: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            snapshot: PricingSnapshot {
                id: Uuid::new_v4(),
                cloud,
                region: region.into(),
                provider_alias: "default".to_string(),
                source: source.into(),
                fetched_at: now,
                valid_from: now,
                valid_to: None,
                hash: String::new(),
                version: "1.0".to_string(),
                is_active: false,
                state: SnapshotState::Pending,
                created_at: now,
            },
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.snapshot.provider_alias = alias.into();
        self
    }

    pub fn with_valid_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.snapshot.valid_from = from;
        self.snapshot.valid_to = Some(to);
        self
    }

    pub fn build(mut self, hash: impl Into<String>) -> PricingSnapshot {
        self.snapshot.hash = hash.into();
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_provider_round_trip() {
        for (s, cloud) in [
            ("aws", CloudProvider::Aws),
            ("azure", CloudProvider::Azure),
            ("gcp", CloudProvider::Gcp),
        ] {
            assert_eq!(s.parse::<CloudProvider>().unwrap(), cloud);
            assert_eq!(cloud.as_str(), s);
        }
        assert!("oracle".parse::<CloudProvider>().is_err());
    }

    #[test]
    fn descriptor_sorts_attributes() {
        let mut attrs = BTreeMap::new();
        attrs.insert("os".to_string(), "linux".to_string());
        attrs.insert("instance_type".to_string(), "t3.micro".to_string());
        let key = RateKey::new(
            CloudProvider::Aws,
            "AmazonEC2",
            "Compute Instance",
            "us-east-1",
            attrs,
        );
        assert_eq!(
            key.descriptor(),
            "aws|AmazonEC2|Compute Instance|us-east-1|instance_type=t3.micro,os=linux"
        );
    }

    #[test]
    fn builder_defaults() {
        let snapshot = SnapshotBuilder::new(CloudProvider::Aws, "us-east-1", "test").build("abc");
        assert_eq!(snapshot.provider_alias, "default");
        assert_eq!(snapshot.version, "1.0");
        assert_eq!(snapshot.state, SnapshotState::Pending);
        assert!(!snapshot.is_active);
        assert_eq!(snapshot.hash, "abc");
    }
}
