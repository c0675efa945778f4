//! cloudrate — snapshot-based cloud pricing ingestion and resolution
//!
//! Ingests retail pricing catalogs from AWS, Azure, and GCP, transforms
//! them into canonical rates, and commits them as immutable,
//! content-addressed snapshots in PostgreSQL. A resolver serves rate
//! lookups against the single active snapshot per (cloud, region, alias).
//!
//! The ingestion lifecycle guarantees no database mutation before a
//! verified on-disk backup exists, then swaps the new snapshot in with one
//! atomic transaction.

pub mod ingest;
pub mod model;
pub mod regions;
pub mod resolver;
pub mod store;

pub use model::{
    CloudProvider, PricingRate, PricingSnapshot, RateKey, ResolvedRate, SnapshotBuilder,
    SnapshotState, TieredRate,
};
pub use resolver::{
    calculate_tiered_cost, ResolutionRequest, ResolutionResult, Resolver, SnapshotAudit,
    StrictMode, TieredResolutionResult,
};
pub use store::{DatabaseConfig, MemoryStore, PostgresStore, PricingStore, PricingTx};
