//! Merge of enriched groups into the persistent catalog.
//!
//! Every group maps to the partition named after its title. Records are
//! upserted by reference, then the partition is swept so that exactly one
//! document per reference survives. Store failures are logged and counted,
//! never propagated: one bad record or partition must not stop the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::error::Result;
use crate::models::{CatalogGroup, Record};
use crate::storage::{CatalogStore, UpsertOutcome};

/// Default number of partitions swept concurrently by [`CatalogMerger::dedup_all`].
const DEFAULT_DEDUP_CONCURRENCY: usize = 4;

/// Counters for one partition sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    /// Documents read from the partition
    pub scanned: usize,
    /// Duplicate documents deleted
    pub removed: usize,
    /// Duplicates whose delete failed
    pub delete_failures: usize,
    /// Distinct references sharing a name with an earlier record
    pub name_collisions: usize,
}

/// Counters for merging one group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Records upserted successfully (inserted or updated)
    pub upserted: usize,
    /// Subset of `upserted` that created a new document
    pub inserted: usize,
    pub upsert_failures: usize,
    /// Records dropped for lacking a name or reference
    pub discarded: usize,
    pub dedup: DedupStats,
    /// Whether the partition could not be read back for the sweep
    pub dedup_failed: bool,
}

/// Result of sweeping every partition of the catalog.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CatalogDedup {
    pub partitions: usize,
    pub removed: usize,
    /// Partitions whose sweep failed
    pub failed: Vec<String>,
}

/// Writes catalog groups to the store.
pub struct CatalogMerger {
    store: Arc<dyn CatalogStore>,
    catalog_db: String,
    dedup_concurrency: usize,
}

impl CatalogMerger {
    pub fn new(store: Arc<dyn CatalogStore>, catalog_db: impl Into<String>) -> Self {
        Self {
            store,
            catalog_db: catalog_db.into(),
            dedup_concurrency: DEFAULT_DEDUP_CONCURRENCY,
        }
    }

    /// Bound the number of partitions swept at once.
    pub fn with_dedup_concurrency(mut self, concurrency: usize) -> Self {
        self.dedup_concurrency = concurrency.max(1);
        self
    }

    /// Upsert every record of a group, then sweep its partition.
    ///
    /// The records go to the store as one batch, so file backed stores
    /// write the database once for the upserts and at most once more for
    /// the sweep.
    pub async fn merge_group(&self, group: &CatalogGroup) -> MergeStats {
        let mut stats = MergeStats::default();
        let partition = group.title.as_str();

        let (records, discarded): (Vec<Record>, Vec<Record>) = group
            .records
            .iter()
            .cloned()
            .partition(Record::is_persistable);
        stats.discarded = discarded.len();

        match self
            .store
            .upsert_records(&self.catalog_db, partition, &records)
            .await
        {
            Ok(outcomes) => {
                for (record, outcome) in records.iter().zip(outcomes) {
                    match outcome {
                        Ok(outcome) => {
                            stats.upserted += 1;
                            if outcome == UpsertOutcome::Inserted {
                                stats.inserted += 1;
                            }
                        }
                        Err(e) => {
                            stats.upsert_failures += 1;
                            log::error!(
                                "Unable to upsert {} into '{}': {}",
                                record.reference,
                                partition,
                                e
                            );
                        }
                    }
                }
            }
            Err(e) => {
                stats.upsert_failures += records.len();
                log::error!(
                    "Unable to upsert {} records into '{}': {}",
                    records.len(),
                    partition,
                    e
                );
            }
        }

        match self.dedup_partition(partition).await {
            Ok(dedup) => stats.dedup = dedup,
            Err(e) => {
                stats.dedup_failed = true;
                log::error!("Unable to read '{}' for dedup: {}", partition, e);
            }
        }

        log::debug!(
            "Merged '{}': {} upserted ({} new), {} failed, {} duplicates removed",
            partition,
            stats.upserted,
            stats.inserted,
            stats.upsert_failures,
            stats.dedup.removed
        );
        stats
    }

    /// Keep the first document of each reference in storage order and
    /// delete the later copies by id.
    ///
    /// Running it twice in a row removes nothing the second time.
    pub async fn dedup_partition(&self, partition: &str) -> Result<DedupStats> {
        let documents = self.store.find_all(&self.catalog_db, partition).await?;
        let mut stats = DedupStats {
            scanned: documents.len(),
            ..DedupStats::default()
        };

        let mut seen_references: HashSet<&str> = HashSet::new();
        let mut first_by_name: HashMap<&str, &str> = HashMap::new();
        let mut duplicates = Vec::new();

        for doc in &documents {
            let reference = doc.record.reference.as_str();
            if !seen_references.insert(reference) {
                duplicates.push(doc);
                continue;
            }
            let name = doc.record.name.as_str();
            match first_by_name.get(name) {
                Some(other) => {
                    stats.name_collisions += 1;
                    log::warn!(
                        "'{}' lists '{}' for both {} and {}",
                        partition,
                        name,
                        other,
                        reference
                    );
                }
                None => {
                    first_by_name.insert(name, reference);
                }
            }
        }

        if duplicates.is_empty() {
            return Ok(stats);
        }

        let ids: Vec<u64> = duplicates.iter().map(|doc| doc.id).collect();
        let outcomes = match self
            .store
            .delete_records(&self.catalog_db, partition, &ids)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                stats.delete_failures = duplicates.len();
                log::error!(
                    "Unable to delete {} duplicates from '{}': {}",
                    duplicates.len(),
                    partition,
                    e
                );
                return Ok(stats);
            }
        };

        for (doc, outcome) in duplicates.into_iter().zip(outcomes) {
            match outcome {
                Ok(true) => {
                    stats.removed += 1;
                    log::info!(
                        "Removed duplicate {} (document {}) from '{}'",
                        doc.record.reference,
                        doc.id,
                        partition
                    );
                }
                Ok(false) => {
                    log::debug!("Duplicate document {} already gone from '{}'", doc.id, partition);
                }
                Err(e) => {
                    stats.delete_failures += 1;
                    log::error!(
                        "Unable to delete duplicate {} from '{}': {}",
                        doc.record.reference,
                        partition,
                        e
                    );
                }
            }
        }

        Ok(stats)
    }

    /// Sweep every partition of the catalog database.
    ///
    /// Only a failure to list the partitions is returned as an error.
    pub async fn dedup_all(&self) -> Result<CatalogDedup> {
        let partitions = self.store.list_partitions(&self.catalog_db).await?;
        let mut result = CatalogDedup {
            partitions: partitions.len(),
            ..CatalogDedup::default()
        };

        let mut sweeps = stream::iter(partitions)
            .map(|partition| async move {
                let outcome = self.dedup_partition(&partition).await;
                (partition, outcome)
            })
            .buffer_unordered(self.dedup_concurrency);

        while let Some((partition, outcome)) = sweeps.next().await {
            match outcome {
                Ok(stats) => result.removed += stats.removed,
                Err(e) => {
                    log::error!("Unable to dedup '{}': {}", partition, e);
                    result.failed.push(partition);
                }
            }
        }

        result.failed.sort();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentDb, LocalStore, MemoryStore};
    use tempfile::TempDir;

    const DB: &str = "packagedb";

    fn record(name: &str, reference: &str, metric: u64) -> Record {
        Record {
            name: name.to_string(),
            reference: reference.to_string(),
            description: format!("About {name}."),
            metric,
        }
    }

    async fn connected(store: MemoryStore) -> Arc<MemoryStore> {
        store.connect().await.unwrap();
        Arc::new(store)
    }

    fn references(store: &MemoryStore, partition: &str) -> Vec<String> {
        store
            .snapshot(DB, partition)
            .into_iter()
            .map(|d| d.record.reference)
            .collect()
    }

    #[tokio::test]
    async fn test_merge_inserts_then_updates() {
        let store = connected(MemoryStore::new()).await;
        let merger = CatalogMerger::new(store.clone(), DB);
        let group = CatalogGroup {
            title: "Web".to_string(),
            records: vec![
                record("gin", "https://github.com/gin-gonic/gin", 50),
                record("echo", "https://github.com/labstack/echo", 30),
            ],
        };

        let first = merger.merge_group(&group).await;
        assert_eq!(first.inserted, 2);

        let mut lower = group.clone();
        lower.records[0].metric = 10;
        lower.records[0].description = "Fresh text.".to_string();
        let second = merger.merge_group(&lower).await;
        assert_eq!(second.upserted, 2);
        assert_eq!(second.inserted, 0);

        let docs = store.snapshot(DB, "Web");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].record.metric, 50);
        assert_eq!(docs[0].record.description, "Fresh text.");
    }

    #[tokio::test]
    async fn test_unpersistable_records_are_discarded() {
        let store = connected(MemoryStore::new()).await;
        let merger = CatalogMerger::new(store.clone(), DB);
        let group = CatalogGroup {
            title: "Web".to_string(),
            records: vec![
                record("", "https://github.com/a/b", 1),
                record("named", "", 1),
                record("ok", "https://github.com/c/d", 1),
            ],
        };

        let stats = merger.merge_group(&group).await;

        assert_eq!(stats.discarded, 2);
        assert_eq!(references(&store, "Web"), vec!["https://github.com/c/d"]);
    }

    #[tokio::test]
    async fn test_dedup_keeps_first_by_reference_and_is_idempotent() {
        let store = connected(MemoryStore::new()).await;
        store.seed(
            DB,
            "Web",
            vec![
                record("gin", "https://github.com/gin-gonic/gin", 1),
                record("echo", "https://github.com/labstack/echo", 2),
                record("gin-again", "https://github.com/gin-gonic/gin", 3),
                record("echo", "https://github.com/labstack/echo", 4),
            ],
        );
        let merger = CatalogMerger::new(store.clone(), DB);

        let first = merger.dedup_partition("Web").await.unwrap();
        assert_eq!(first.scanned, 4);
        assert_eq!(first.removed, 2);

        let docs = store.snapshot(DB, "Web");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].record.name, "gin");
        assert_eq!(docs[1].record.metric, 2);

        let second = merger.dedup_partition("Web").await.unwrap();
        assert_eq!(second.removed, 0);
        assert_eq!(store.snapshot(DB, "Web"), docs);
    }

    #[tokio::test]
    async fn test_name_collision_is_not_deleted() {
        let store = connected(MemoryStore::new()).await;
        store.seed(
            DB,
            "Logging",
            vec![
                record("log", "https://github.com/one/log", 1),
                record("log", "https://github.com/two/log", 1),
            ],
        );
        let merger = CatalogMerger::new(store.clone(), DB);

        let stats = merger.dedup_partition("Logging").await.unwrap();

        assert_eq!(stats.removed, 0);
        assert_eq!(stats.name_collisions, 1);
        assert_eq!(store.snapshot(DB, "Logging").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_upsert_is_skipped() {
        let store = connected(
            MemoryStore::new().with_failing_upsert("https://github.com/bad/repo"),
        )
        .await;
        let merger = CatalogMerger::new(store.clone(), DB);
        let group = CatalogGroup {
            title: "Web".to_string(),
            records: vec![
                record("bad", "https://github.com/bad/repo", 1),
                record("good", "https://github.com/good/repo", 1),
            ],
        };

        let stats = merger.merge_group(&group).await;

        assert_eq!(stats.upsert_failures, 1);
        assert_eq!(stats.upserted, 1);
        assert_eq!(references(&store, "Web"), vec!["https://github.com/good/repo"]);
    }

    #[tokio::test]
    async fn test_read_failure_only_skips_that_partition() {
        let store = connected(MemoryStore::new().with_failing_read("Broken")).await;
        store.seed(
            DB,
            "Broken",
            vec![
                record("a", "https://github.com/x/a", 1),
                record("a", "https://github.com/x/a", 1),
            ],
        );
        store.seed(
            DB,
            "Fine",
            vec![
                record("b", "https://github.com/x/b", 1),
                record("b", "https://github.com/x/b", 1),
            ],
        );
        let merger = CatalogMerger::new(store.clone(), DB).with_dedup_concurrency(2);

        let result = merger.dedup_all().await.unwrap();

        assert_eq!(result.partitions, 2);
        assert_eq!(result.removed, 1);
        assert_eq!(result.failed, vec!["Broken"]);
        assert_eq!(store.snapshot(DB, "Fine").len(), 1);
        assert_eq!(store.snapshot(DB, "Broken").len(), 2);
    }

    #[tokio::test]
    async fn test_file_store_writes_once_per_step() {
        let tmp = TempDir::new().unwrap();
        let mut seeded = DocumentDb::default();
        let web = seeded.partition_mut("Web");
        web.insert(record("gin", "https://github.com/gin-gonic/gin", 1));
        web.insert(record("gin", "https://github.com/gin-gonic/gin", 1));
        std::fs::write(
            tmp.path().join("packagedb.json"),
            serde_json::to_vec(&seeded).unwrap(),
        )
        .unwrap();

        let store = Arc::new(LocalStore::new(tmp.path()));
        let merger = CatalogMerger::new(store.clone(), DB);
        let web = CatalogGroup {
            title: "Web".to_string(),
            records: vec![
                record("gin", "https://github.com/gin-gonic/gin", 50),
                record("echo", "https://github.com/labstack/echo", 30),
                record("chi", "https://github.com/go-chi/chi", 20),
            ],
        };

        let stats = merger.merge_group(&web).await;
        assert_eq!(stats.upserted, 3);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.dedup.removed, 1);
        assert_eq!(store.save_count(), 2);

        let tools = CatalogGroup {
            title: "Tools".to_string(),
            records: vec![
                record("mage", "https://github.com/magefile/mage", 5),
                record("task", "https://github.com/go-task/task", 4),
            ],
        };
        let stats = merger.merge_group(&tools).await;
        assert_eq!(stats.inserted, 2);
        assert_eq!(store.save_count(), 3);

        assert_eq!(store.find_all(DB, "Web").await.unwrap().len(), 3);
        assert_eq!(store.find_all(DB, "Tools").await.unwrap().len(), 2);
    }
}
