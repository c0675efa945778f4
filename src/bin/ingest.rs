//! Pricing ingestion entry point
//!
//! Environment-driven: connects to the pricing database, applies
//! migrations, and runs the strict ingestion lifecycle for one
//! (cloud, region). Exits 0 on success, 1 on any fatal error with a
//! single-line summary on stderr.
//!
//! Environment:
//!   DB_URL       (required) postgres connection URL
//!   CLOUD        aws | azure | gcp          (default aws)
//!   REGION       provider region code       (default us-east-1)
//!   SERVICES     comma-separated filter     (optional, AWS only)
//!   BACKUP_DIR   backup destination         (default /app/backups)
//!   APP_ENV      production | development   (default production)

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cloudrate::ingest::{registry, AwsPricingApiFetcher, Lifecycle, LifecycleConfig};
use cloudrate::model::CloudProvider;
use cloudrate::store::{PostgresStore, PricingStore};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Configuration from environment.
    let db_url = std::env::var("DB_URL").context("DB_URL environment variable is required")?;
    let cloud: CloudProvider = std::env::var("CLOUD")
        .unwrap_or_else(|_| "aws".to_string())
        .parse()?;
    let region = std::env::var("REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let backup_dir =
        PathBuf::from(std::env::var("BACKUP_DIR").unwrap_or_else(|_| "/app/backups".to_string()));
    let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "production".to_string());

    // Connect and wait for the database to come up.
    let store = PostgresStore::from_url(&db_url)
        .await
        .context("failed to connect to database")?;
    for attempt in 1..=30u32 {
        match store.ping().await {
            Ok(()) => {
                info!("Connected to database");
                break;
            }
            Err(err) if attempt == 30 => {
                return Err(err.context("database did not become ready"));
            }
            Err(_) => {
                info!("Waiting for database... ({attempt}/30)");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    store.migrate().await?;

    // Registry lookup, with the optional service filter.
    let fetcher = match services_filter() {
        Some(services) if cloud == CloudProvider::Aws => {
            info!("Filtering fetch to {} services", services.len());
            let mut aws = AwsPricingApiFetcher::new();
            aws.set_allowed_services(services);
            Arc::new(aws) as Arc<dyn cloudrate::ingest::PriceFetcher>
        }
        Some(_) => {
            info!("Fetcher for {cloud} does not support service filtering");
            registry().fetcher(cloud)?
        }
        None => registry().fetcher(cloud)?,
    };
    let normalizer = registry().normalizer(cloud)?;

    std::fs::create_dir_all(&backup_dir).context("failed to create backup dir")?;

    let store: Arc<dyn PricingStore> = Arc::new(store);
    let lifecycle = Lifecycle::new(fetcher, normalizer, store);

    let mut config = LifecycleConfig::new(cloud, region.clone());
    config.backup_dir = backup_dir;
    config.environment = environment;

    info!("Starting ingestion for {cloud}/{region}");
    let result = lifecycle.execute(&config).await?;

    if !result.success {
        anyhow::bail!(
            "ingestion failed in phase {}: {}",
            result.phase,
            result.error.unwrap_or_default()
        );
    }

    info!(
        "Ingestion completed: snapshot {:?}, {} rates in {:?}",
        result.snapshot_id, result.normalized_count, result.duration
    );
    Ok(())
}

fn services_filter() -> Option<Vec<String>> {
    let raw = std::env::var("SERVICES").ok()?;
    let services: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if services.is_empty() {
        None
    } else {
        Some(services)
    }
}
