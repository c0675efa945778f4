//! Pricing ingestion
//!
//! Strictly separated from estimation: fetch → normalize → validate →
//! backup → commit. The lifecycle in this module is the only writer of
//! pricing snapshots.

pub mod aws;
pub mod azure;
pub mod backup;
pub mod dimensions;
pub mod drift;
pub mod equivalence;
pub mod fetch;
pub mod gcp;
pub mod hash;
pub mod lifecycle;
pub mod registry;
pub mod streaming;
pub mod validator;

pub use aws::{AwsPricingApiFetcher, AwsPricingApiNormalizer};
pub use azure::{AzurePricingApiClient, AzurePricingConfig, AzurePricingNormalizer};
pub use backup::{BackupInfo, BackupManager, SnapshotBackup};
pub use dimensions::{DimensionAllowlist, FilteredNormalizer};
pub use drift::{DriftDetector, DriftRecord, DriftSummary, DriftType};
pub use equivalence::{EquivalenceDetector, RegionGroup};
pub use fetch::{NormalizedRate, PriceFetcher, PriceNormalizer, RawPrice};
pub use gcp::{GcpPricingApiClient, GcpPricingConfig, GcpPricingNormalizer};
pub use hash::content_hash;
pub use lifecycle::{
    IngestionPhase, Lifecycle, LifecycleConfig, LifecycleError, LifecycleResult,
};
pub use registry::{production_fetcher, production_normalizer, registry, FetcherRegistry};
pub use streaming::{IngestionCheckpoint, StreamingConfig, StreamingLifecycle};
pub use validator::{default_contracts, IngestionContract, IngestionValidator, ValidationResult};
