//! Catalog sync CLI
//!
//! Local execution entry point. For AWS Lambda, use `catalog-sync-lambda`.

use std::path::PathBuf;

use catalog_sync::{
    config::load_config,
    error::{AppError, Result},
    pipeline::SyncOrchestrator,
    services::{DocumentGrouper, DocumentSource, FileDocumentSource},
    storage::open_store,
};
use clap::{Parser, Subcommand};

/// catalog-sync - curated link catalog importer
#[derive(Parser, Debug)]
#[command(
    name = "catalog-sync",
    version,
    about = "Group, enrich and merge a curated link catalog"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync: group, gate, enrich, merge
    Sync {
        /// Merge even when the catalog did not grow
        #[arg(long)]
        force: bool,

        /// Read the catalog from a local file instead of the configured URL
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Remove duplicate records from every catalog partition
    Dedup,

    /// Group a local catalog file and print the result, without any network or store access
    Parse {
        /// Catalog file to group
        #[arg(long)]
        source: PathBuf,
    },

    /// Validate the configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("catalog-sync starting...");

    let mut config = load_config(&cli.config)?;
    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Sync { force, source } => {
            config.store.force_write |= force;
            let orchestrator = SyncOrchestrator::from_config(config, source.as_deref()).await?;
            let report = orchestrator.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Dedup => {
            let orchestrator = SyncOrchestrator::from_config(config, None).await?;
            let result = orchestrator.dedup().await?;
            if !result.failed.is_empty() {
                return Err(AppError::store(format!(
                    "dedup failed for {} partitions: {}",
                    result.failed.len(),
                    result.failed.join(", ")
                )));
            }
        }

        Command::Parse { source } => {
            let source = FileDocumentSource::new(source);
            let text = source.load().await;
            if text.is_empty() {
                return Err(AppError::source(format!(
                    "{} is empty or unreadable",
                    source.describe()
                )));
            }

            let grouped = DocumentGrouper::new(config.sync.min_group_entries).group_text(&text);
            for (title, entries) in &grouped.groups {
                println!("{:>5}  {}", entries.len(), title);
            }
            println!(
                "{} groups, {} raw entries",
                grouped.group_count(),
                grouped.total_entries
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            // load_config already validated; also check the store URI resolves.
            open_store(&config.store).await?;
            log::info!("✓ Config OK (store: {})", config.store.uri);
        }
    }

    log::info!("Done!");

    Ok(())
}
