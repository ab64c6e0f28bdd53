// src/services/enricher.rs

//! Enrichment of grouped raw entries with popularity metrics.
//!
//! Groups are processed one at a time. Inside a group every entry gets its
//! own task; a semaphore bounds the requests in flight and an optional delay
//! paces dispatches. Finished records flow through a channel into a single
//! collector, which returns once every task of the group has reported.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};

use crate::error::Result;
use crate::models::{CatalogGroup, MetricsConfig, RawGroup, Record};
use crate::services::extractor::{EntryFields, extract_entry};
use crate::services::metrics::MetricSource;

/// Concurrency and pacing applied inside one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichPolicy {
    /// Upper bound on metric requests in flight
    pub max_in_flight: usize,
    /// Pause between two successive dispatches
    pub dispatch_delay: Duration,
}

impl Default for EnrichPolicy {
    fn default() -> Self {
        Self::from(&MetricsConfig::default())
    }
}

impl From<&MetricsConfig> for EnrichPolicy {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight.max(1),
            dispatch_delay: Duration::from_millis(config.request_delay_ms),
        }
    }
}

/// Counters for one enrichment pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichStats {
    /// Entries a metric lookup was dispatched for
    pub attempted: usize,
    /// Lookups that returned a count
    pub fetched: usize,
    /// Lookups that failed; their records carry a zero metric
    pub failed: usize,
    /// Entries skipped for lacking a name or reference
    pub skipped: usize,
}

impl EnrichStats {
    fn absorb(&mut self, other: EnrichStats) {
        self.attempted += other.attempted;
        self.fetched += other.fetched;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Result of enriching a whole document.
#[derive(Debug, Default)]
pub struct Enrichment {
    /// One group per input group that produced records, in input order
    pub groups: Vec<CatalogGroup>,
    pub stats: EnrichStats,
}

impl Enrichment {
    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }
}

/// Turns raw groups into catalog groups.
pub struct Enricher {
    source: Arc<dyn MetricSource>,
    policy: EnrichPolicy,
}

impl Enricher {
    pub fn new(source: Arc<dyn MetricSource>, policy: EnrichPolicy) -> Self {
        Self { source, policy }
    }

    /// Enrich every group; groups with no usable entry are omitted.
    pub async fn enrich(&self, groups: Vec<RawGroup>) -> Enrichment {
        let mut enrichment = Enrichment::default();

        for group in groups {
            let (catalog_group, stats) = self.enrich_group(group).await;
            enrichment.stats.absorb(stats);
            if catalog_group.records.is_empty() {
                log::debug!("Group '{}' produced no records", catalog_group.title);
                continue;
            }
            enrichment.groups.push(catalog_group);
        }

        log::info!(
            "Enriched {} groups: {} lookups, {} failed, {} skipped",
            enrichment.groups.len(),
            enrichment.stats.attempted,
            enrichment.stats.failed,
            enrichment.stats.skipped
        );
        enrichment
    }

    /// Enrich a single group.
    ///
    /// Record order follows completion order, not input order.
    pub async fn enrich_group(&self, group: RawGroup) -> (CatalogGroup, EnrichStats) {
        let mut stats = EnrichStats::default();
        let candidates: Vec<EntryFields> = group
            .entries
            .iter()
            .map(|line| extract_entry(line))
            .filter(|fields| {
                let usable = !fields.name.is_empty() && !fields.reference.is_empty();
                if !usable {
                    stats.skipped += 1;
                }
                usable
            })
            .collect();

        let mut catalog_group = CatalogGroup {
            title: group.title,
            records: Vec::with_capacity(candidates.len()),
        };
        if candidates.is_empty() {
            return (catalog_group, stats);
        }

        let total = candidates.len();
        let semaphore = Arc::new(Semaphore::new(self.policy.max_in_flight.clamp(1, total)));
        let (tx, mut rx) = mpsc::unbounded_channel::<(EntryFields, Result<u64>)>();

        for (i, fields) in candidates.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let source = Arc::clone(&self.source);
            let tx = tx.clone();
            stats.attempted += 1;

            tokio::spawn(async move {
                let outcome = source.fetch(&fields.reference).await;
                drop(permit);
                let _ = tx.send((fields, outcome));
            });

            if i + 1 < total && !self.policy.dispatch_delay.is_zero() {
                tokio::time::sleep(self.policy.dispatch_delay).await;
            }
        }
        // The collector ends once every task has dropped its sender.
        drop(tx);

        while let Some((fields, outcome)) = rx.recv().await {
            let metric = match outcome {
                Ok(count) => {
                    stats.fetched += 1;
                    count
                }
                Err(e) => {
                    stats.failed += 1;
                    log::warn!("Unable to get star count for {}: {}", fields.reference, e);
                    0
                }
            };
            catalog_group.records.push(Record {
                name: fields.name,
                reference: fields.reference,
                description: fields.description,
                metric,
            });
        }

        let lost = stats.attempted - catalog_group.records.len();
        if lost > 0 {
            log::error!(
                "Group '{}': {} lookups ended without a result",
                catalog_group.title,
                lost
            );
        }

        (catalog_group, stats)
    }
}
