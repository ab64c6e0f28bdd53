//! In-process storage backend.
//!
//! Used for dry runs and as the injected store in tests. Operations on a
//! store that is not connected fail, so lifecycle mistakes surface early.
//! Individual references or partitions can be marked as failing to
//! exercise the per-record and per-partition error paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Record, StoredRecord, SyncState};
use crate::storage::{CatalogStore, DocumentDb, UpsertOutcome};

/// Storage backend held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    databases: Mutex<HashMap<String, DocumentDb>>,
    connected: AtomicBool,
    refuse_connect: bool,
    close_count: AtomicUsize,
    failing_upserts: HashSet<String>,
    failing_reads: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `connect` always fails.
    pub fn unreachable() -> Self {
        Self {
            refuse_connect: true,
            ..Self::default()
        }
    }

    /// Fail every upsert of the given reference.
    pub fn with_failing_upsert(mut self, reference: impl Into<String>) -> Self {
        self.failing_upserts.insert(reference.into());
        self
    }

    /// Fail every read of the given partition.
    pub fn with_failing_read(mut self, partition: impl Into<String>) -> Self {
        self.failing_reads.insert(partition.into());
        self
    }

    /// Append records as-is, duplicates included.
    pub fn seed(&self, db: &str, partition: &str, records: impl IntoIterator<Item = Record>) {
        let mut databases = self.lock();
        let target = databases.entry(db.to_string()).or_default().partition_mut(partition);
        for record in records {
            target.insert(record);
        }
    }

    /// Copy of the records of a partition, regardless of connection state.
    pub fn snapshot(&self, db: &str, partition: &str) -> Vec<StoredRecord> {
        self.lock()
            .get(db)
            .map(|d| d.find_all(partition))
            .unwrap_or_default()
    }

    /// Sync state singleton, regardless of connection state.
    pub fn sync_state(&self, db: &str, collection: &str) -> Option<SyncState> {
        self.lock()
            .get(db)
            .and_then(|d| d.singleton(collection).cloned())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DocumentDb>> {
        // A poisoned map is still structurally valid.
        self.databases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AppError::store("memory store is not connected"))
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn connect(&self) -> Result<()> {
        if self.refuse_connect {
            return Err(AppError::connection("memory store refused the connection"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_record(
        &self,
        db: &str,
        partition: &str,
        record: &Record,
    ) -> Result<UpsertOutcome> {
        self.ensure_connected()?;
        if self.failing_upserts.contains(&record.reference) {
            return Err(AppError::store(format!(
                "upsert rejected for {}",
                record.reference
            )));
        }
        let mut databases = self.lock();
        Ok(databases
            .entry(db.to_string())
            .or_default()
            .partition_mut(partition)
            .upsert(record))
    }

    async fn find_all(&self, db: &str, partition: &str) -> Result<Vec<StoredRecord>> {
        self.ensure_connected()?;
        if self.failing_reads.contains(partition) {
            return Err(AppError::store(format!("read rejected for {partition}")));
        }
        Ok(self.snapshot(db, partition))
    }

    async fn delete_record(&self, db: &str, partition: &str, id: u64) -> Result<bool> {
        self.ensure_connected()?;
        Ok(self
            .lock()
            .get_mut(db)
            .is_some_and(|d| d.delete(partition, id)))
    }

    async fn list_partitions(&self, db: &str) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok(self
            .lock()
            .get(db)
            .map(|d| d.partition_names())
            .unwrap_or_default())
    }

    async fn read_sync_state(&self, db: &str, collection: &str) -> Result<Option<SyncState>> {
        self.ensure_connected()?;
        Ok(self.sync_state(db, collection))
    }

    async fn replace_sync_state(
        &self,
        db: &str,
        collection: &str,
        state: &SyncState,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.lock()
            .entry(db.to_string())
            .or_default()
            .replace_singleton(collection, state.clone());
        Ok(())
    }
}
