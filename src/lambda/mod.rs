// src/lambda/mod.rs

//! AWS Lambda handler for the catalog sync.
//!
//! Each invocation loads the configuration, wires the production
//! collaborators and performs one sync run.

use std::path::PathBuf;

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::load_config;
use crate::error::Result;
use crate::pipeline::{SyncOrchestrator, SyncReport};

/// Environment variable naming the bundled configuration file.
pub const CONFIG_PATH_ENV: &str = "CATALOG_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "data/config.toml";

/// Lambda invocation payload.
#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    /// Merge even when the catalog did not grow
    #[serde(default)]
    pub force_write: bool,
}

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
pub struct SyncResponse {
    /// Whether the run completed
    pub success: bool,

    /// Run details, absent when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,

    /// Error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

/// Main Lambda handler function.
#[instrument(skip(event))]
pub async fn handler(
    event: LambdaEvent<SyncRequest>,
) -> std::result::Result<SyncResponse, LambdaError> {
    let start = std::time::Instant::now();
    let (request, _context) = event.into_parts();

    info!("Starting sync: force_write={}", request.force_write);

    let response = match run_sync(&request).await {
        Ok(report) => {
            info!(
                "Sync completed: {} raw entries, {} new",
                report.raw_entries,
                report.new_entries()
            );
            SyncResponse {
                success: true,
                report: Some(report),
                ..Default::default()
            }
        }
        Err(e) => {
            error!("Sync failed: {}", e);
            SyncResponse {
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    };

    Ok(SyncResponse {
        execution_time_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        ..response
    })
}

async fn run_sync(request: &SyncRequest) -> Result<SyncReport> {
    let path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = load_config(&path)?;
    config.store.force_write |= request.force_write;

    SyncOrchestrator::from_config(config, None).await?.run().await
}
