// src/pipeline/sync.rs

//! End-to-end catalog sync.
//!
//! One run connects to the store, reads and groups the catalog document,
//! asks the change gate whether anything grew, enriches the groups with
//! metrics, and merges them. The store is closed on every path once the
//! connection has been opened.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::gate::ChangeGate;
use crate::pipeline::merge::{CatalogDedup, CatalogMerger};
use crate::services::enricher::{EnrichPolicy, Enricher};
use crate::services::grouper::DocumentGrouper;
use crate::services::metrics::{HttpMetricFetcher, MetricSource};
use crate::services::source::{DocumentSource, FileDocumentSource, HttpDocumentSource};
use crate::storage::{CatalogStore, open_store};
use crate::utils::http;
use crate::utils::log::{step, summary};

const TOTAL_STEPS: usize = 5;

/// What one sync run did.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    /// Raw entries across retained groups
    pub raw_entries: u64,
    /// Change against the recorded total, negative when the document shrank
    pub delta: i64,
    /// Whether the gate let the run merge
    pub proceeded: bool,
    /// Groups that reached the merge step
    pub groups: usize,
    pub records_upserted: usize,
    pub records_inserted: usize,
    pub duplicates_removed: usize,
    pub fetch_failures: usize,
    pub upsert_failures: usize,
    /// Partitions whose dedup sweep could not run
    pub dedup_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn started(now: DateTime<Utc>) -> Self {
        Self {
            raw_entries: 0,
            delta: 0,
            proceeded: false,
            groups: 0,
            records_upserted: 0,
            records_inserted: 0,
            duplicates_removed: 0,
            fetch_failures: 0,
            upsert_failures: 0,
            dedup_failures: 0,
            started_at: now,
            finished_at: now,
        }
    }

    /// Number of catalog entries the run added.
    pub fn new_entries(&self) -> u64 {
        if self.proceeded {
            u64::try_from(self.delta.max(0)).unwrap_or_default()
        } else {
            0
        }
    }

    fn log_summary(&self) {
        summary(
            "Catalog sync",
            &[
                ("raw entries", self.raw_entries.to_string()),
                ("delta", format!("{:+}", self.delta)),
                ("proceeded", self.proceeded.to_string()),
                ("groups", self.groups.to_string()),
                (
                    "records",
                    format!(
                        "{} upserted, {} inserted",
                        self.records_upserted, self.records_inserted
                    ),
                ),
                ("duplicates removed", self.duplicates_removed.to_string()),
                (
                    "failures",
                    format!(
                        "{} fetch, {} upsert, {} dedup",
                        self.fetch_failures, self.upsert_failures, self.dedup_failures
                    ),
                ),
            ],
        );
    }
}

/// Runs syncs against injected collaborators.
pub struct SyncOrchestrator {
    config: Config,
    store: Arc<dyn CatalogStore>,
    source: Arc<dyn DocumentSource>,
    metrics: Arc<dyn MetricSource>,
}

impl SyncOrchestrator {
    pub fn new(
        config: Config,
        store: Arc<dyn CatalogStore>,
        source: Arc<dyn DocumentSource>,
        metrics: Arc<dyn MetricSource>,
    ) -> Self {
        Self {
            config,
            store,
            source,
            metrics,
        }
    }

    /// Wire the production collaborators named by the configuration.
    ///
    /// The document comes from `source_file` when given, otherwise from
    /// the configured URL.
    pub async fn from_config(config: Config, source_file: Option<&Path>) -> Result<Self> {
        let client = http::create_async_client(
            &config.metrics.user_agent,
            config.metrics.timeout_secs,
        )?;
        let metrics = HttpMetricFetcher::with_client(client.clone(), &config.metrics)?;
        let store = open_store(&config.store).await?;
        let source: Arc<dyn DocumentSource> = match source_file {
            Some(path) => Arc::new(FileDocumentSource::new(path)),
            None => Arc::new(HttpDocumentSource::new(client, &config.source.url)),
        };

        Ok(Self::new(config, store, source, Arc::new(metrics)))
    }

    /// Run one sync.
    ///
    /// Steps: connect, group, gate, enrich, merge. The gate runs before
    /// enrichment because it needs only the raw entry total, so a run over
    /// an unchanged document makes no metric requests at all.
    ///
    /// Only a failed store connection is returned as an error; everything
    /// else is logged and reflected in the report. Once connected, the store
    /// is closed even if a step panics; the panic then continues unwinding.
    pub async fn run(&self) -> Result<SyncReport> {
        let mut report = SyncReport::started(Utc::now());

        step(1, TOTAL_STEPS, "Connect - Opening the catalog store");
        if let Err(e) = self.store.connect().await {
            log::error!("Unable to connect to the catalog store: {}", e);
            return Err(e);
        }

        let outcome = AssertUnwindSafe(self.sync_connected(&mut report))
            .catch_unwind()
            .await;
        self.close_store().await;
        if let Err(panic) = outcome {
            std::panic::resume_unwind(panic);
        }

        report.finished_at = Utc::now();
        report.log_summary();
        Ok(report)
    }

    /// Sweep duplicates from every partition of the catalog.
    pub async fn dedup(&self) -> Result<CatalogDedup> {
        self.store.connect().await?;
        let outcome = AssertUnwindSafe(self.merger().dedup_all())
            .catch_unwind()
            .await;
        self.close_store().await;

        let result = match outcome {
            Ok(result) => result?,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        summary(
            "Catalog dedup",
            &[
                ("partitions", result.partitions.to_string()),
                ("duplicates removed", result.removed.to_string()),
                ("failed partitions", result.failed.len().to_string()),
            ],
        );
        Ok(result)
    }

    async fn sync_connected(&self, report: &mut SyncReport) {
        step(2, TOTAL_STEPS, "Group - Reading the catalog document");
        let text = self.source.load().await;
        log::info!("Read {} bytes from {}", text.len(), self.source.describe());
        let grouped = DocumentGrouper::new(self.config.sync.min_group_entries).group_text(&text);
        report.raw_entries = grouped.total_entries as u64;

        step(3, TOTAL_STEPS, "Gate - Comparing with the last recorded run");
        let decision = ChangeGate::from_config(&self.config.store)
            .check(
                self.store.as_ref(),
                report.raw_entries,
                self.config.store.force_write,
            )
            .await;
        report.delta = decision.delta;
        report.proceeded = decision.proceed;
        if !decision.proceed {
            log::info!("Nothing to sync");
            return;
        }

        step(4, TOTAL_STEPS, "Enrich - Fetching star counts");
        let enricher = Enricher::new(
            Arc::clone(&self.metrics),
            EnrichPolicy::from(&self.config.metrics),
        );
        let enrichment = enricher.enrich(grouped.into_raw_groups()).await;
        report.fetch_failures = enrichment.stats.failed;
        report.groups = enrichment.groups.len();

        step(5, TOTAL_STEPS, "Merge - Writing groups to the catalog");
        let merger = self.merger();
        for group in &enrichment.groups {
            let stats = merger.merge_group(group).await;
            report.records_upserted += stats.upserted;
            report.records_inserted += stats.inserted;
            report.upsert_failures += stats.upsert_failures;
            report.duplicates_removed += stats.dedup.removed;
            if stats.dedup_failed {
                report.dedup_failures += 1;
            }
        }

        log::info!("Added {} new entries", report.new_entries());
    }

    fn merger(&self) -> CatalogMerger {
        CatalogMerger::new(Arc::clone(&self.store), &self.config.store.catalog_db)
    }

    async fn close_store(&self) {
        if let Err(e) = self.store.close().await {
            log::warn!("Unable to close the catalog store: {}", e);
        }
    }
}
