//! cubehouse pipeline CLI.
//!
//! One subcommand per pipeline stage; stages compose in shell scripts or
//! schedulers. Pending work left in the warehouse is picked up by the
//! next invocation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cubehouse_core::config::AppConfig;
use cubehouse_core::EnglishNormalizer;
use cubehouse_metadata::SqliteStore;
use cubehouse_pipeline::{dimensions, ingest, registry, spine, verify, PipelineContext};
use cubehouse_storage::ContentStore;
use cubehouse_wds::HttpWdsClient;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cubehouse")]
#[command(about = "StatCan WDS mirror and dimension harmonization pipeline")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CUBEHOUSE_CONFIG",
        default_value = "cubehouse.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the full cube catalog snapshot
    FetchSpine,
    /// Load the active snapshot into the catalog tables
    LoadSpine,
    /// Seed download status rows for every catalog product
    SeedStatus,
    /// Scan the change feed and flag stale cubes for re-download
    DiscoverChanges,
    /// Download pending cube zips
    FetchCubes,
    /// Download pending cube metadata
    FetchMetadata,
    /// Reconcile archived files against the artifact registry
    VerifyFiles,
    /// Parse fetched metadata into the raw dictionary tables
    LoadRawDimensions,
    /// Build the harmonized dimension registry
    BuildRegistry,
    /// Recompute canonical member base names
    NormalizeLabels,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let ctx = build_context(config).await?;

    // Fetch loops drain cleanly on Ctrl-C; interrupted keys stay pending
    // and resume on the next invocation.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, draining in-flight work");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::FetchSpine => {
            let summary = ingest::fetch_spine(&ctx).await?;
            tracing::info!(
                outcome = ?summary.outcome,
                hash = %summary.hash,
                cubes = summary.cube_count,
                "fetch-spine complete"
            );
        }
        Commands::LoadSpine => {
            let summary = spine::load_spine(&ctx).await?;
            tracing::info!(
                cubes = summary.cubes,
                subjects = summary.subjects,
                surveys = summary.surveys,
                "load-spine complete"
            );
        }
        Commands::SeedStatus => {
            let summary = ingest::seed_status(&ctx).await?;
            tracing::info!(
                cubes = summary.cubes_seeded,
                metadata = summary.metadata_seeded,
                "seed-status complete"
            );
        }
        Commands::DiscoverChanges => {
            let summary = ingest::discover_changes(&ctx).await?;
            tracing::info!(
                days = summary.days_checked,
                changes = summary.changes_recorded,
                flagged = summary.flagged,
                "discover-changes complete"
            );
        }
        Commands::FetchCubes => {
            let summary = ingest::fetch_cubes(&ctx, &cancel).await?;
            tracing::info!(
                attempted = summary.attempted,
                adopted = summary.adopted,
                unchanged = summary.unchanged,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "fetch-cubes complete"
            );
        }
        Commands::FetchMetadata => {
            let summary = ingest::fetch_metadata(&ctx, &cancel).await?;
            tracing::info!(
                attempted = summary.attempted,
                adopted = summary.adopted,
                unchanged = summary.unchanged,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "fetch-metadata complete"
            );
        }
        Commands::VerifyFiles => {
            let report = verify::verify_files(&ctx).await?;
            tracing::info!(
                spine = ?report.spine,
                cubes = ?report.cubes,
                metadata = ?report.metadata,
                "verify-files complete"
            );
        }
        Commands::LoadRawDimensions => {
            let summary = dimensions::load_raw_dimensions(&ctx).await?;
            tracing::info!(
                products = summary.products,
                failed = summary.failed,
                dimensions = summary.dimensions,
                members = summary.members,
                "load-raw-dimensions complete"
            );
        }
        Commands::BuildRegistry => {
            let summary = registry::build_registry(&ctx).await?;
            tracing::info!(
                raw_members = summary.raw_members,
                processed_dimensions = summary.processed_dimensions,
                canonical_dimensions = summary.canonical_dimensions,
                canonical_members = summary.canonical_members,
                cycles = summary.cycles,
                "build-registry complete"
            );
        }
        Commands::NormalizeLabels => {
            let updated = registry::normalize_labels(&ctx).await?;
            tracing::info!(updated = updated, "normalize-labels complete");
        }
    }

    Ok(())
}

/// Load configuration from an optional TOML file merged with
/// `CUBEHOUSE_`-prefixed environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = path, "loading configuration file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!(config_path = path, "no config file, using defaults and environment");
    }

    figment
        .merge(Env::prefixed("CUBEHOUSE_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// Open the warehouse, the content store and the WDS client, and wire
/// them into one pipeline context.
async fn build_context(config: AppConfig) -> Result<PipelineContext> {
    let warehouse = SqliteStore::open(&config.database.path)
        .await
        .with_context(|| {
            format!("failed to open warehouse at {}", config.database.path.display())
        })?;

    let content = ContentStore::open(&config.storage.root)
        .await
        .with_context(|| {
            format!("failed to open raw store at {}", config.storage.root.display())
        })?;
    content
        .health_check()
        .await
        .context("raw store health check failed")?;

    let wds = HttpWdsClient::new(config.wds.clone()).context("failed to build WDS client")?;

    Ok(PipelineContext::new(
        Arc::new(warehouse),
        Arc::new(content),
        Arc::new(wds),
        Arc::new(EnglishNormalizer),
        config,
    ))
}
