//! Local filesystem storage implementation.
//!
//! Every database lives in one JSON document. Writes go to a temporary
//! file first and are renamed over the old document, so a crash never
//! leaves a half-written catalog behind.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── packagedb.json        # Catalog: one partition per group title
//! └── usersdb.json          # Sync state singleton
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Record, StoredRecord, SyncState};
use crate::storage::{CatalogStore, DocumentDb, UpsertOutcome};

/// Local filesystem storage backend.
pub struct LocalStore {
    root_dir: PathBuf,
    /// Serializes read-modify-write cycles across concurrent callers.
    write_lock: Mutex<()>,
    saves: AtomicUsize,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Number of database documents written by this instance.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    /// Get the full path for a database document.
    fn path(&self, db: &str) -> PathBuf {
        self.root_dir.join(format!("{db}.json"))
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load a database, empty if the document doesn't exist yet.
    async fn load(&self, db: &str) -> Result<DocumentDb> {
        let path = self.path(db);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AppError::store(format!("corrupt database {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DocumentDb::default()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn save(&self, db: &str, document: &DocumentDb) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        self.write_bytes(&self.path(db), &bytes).await?;
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Apply a mutation to a database and persist it.
    async fn modify<T>(&self, db: &str, apply: impl FnOnce(&mut DocumentDb) -> T) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load(db).await?;
        let result = apply(&mut document);
        self.save(db, &document).await?;
        Ok(result)
    }
}

#[async_trait]
impl CatalogStore for LocalStore {
    async fn connect(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root_dir).await.map_err(|e| {
            AppError::connection(format!(
                "cannot open storage directory {}: {}",
                self.root_dir.display(),
                e
            ))
        })?;
        log::debug!("Local store ready at {}", self.root_dir.display());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_record(
        &self,
        db: &str,
        partition: &str,
        record: &Record,
    ) -> Result<UpsertOutcome> {
        self.modify(db, |d| d.partition_mut(partition).upsert(record))
            .await
    }

    async fn upsert_records(
        &self,
        db: &str,
        partition: &str,
        records: &[Record],
    ) -> Result<Vec<Result<UpsertOutcome>>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        self.modify(db, |d| {
            let partition = d.partition_mut(partition);
            records.iter().map(|r| Ok(partition.upsert(r))).collect()
        })
        .await
    }

    async fn find_all(&self, db: &str, partition: &str) -> Result<Vec<StoredRecord>> {
        Ok(self.load(db).await?.find_all(partition))
    }

    async fn delete_record(&self, db: &str, partition: &str, id: u64) -> Result<bool> {
        self.modify(db, |d| d.delete(partition, id)).await
    }

    async fn delete_records(
        &self,
        db: &str,
        partition: &str,
        ids: &[u64],
    ) -> Result<Vec<Result<bool>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.modify(db, |d| ids.iter().map(|&id| Ok(d.delete(partition, id))).collect())
            .await
    }

    async fn list_partitions(&self, db: &str) -> Result<Vec<String>> {
        Ok(self.load(db).await?.partition_names())
    }

    async fn read_sync_state(&self, db: &str, collection: &str) -> Result<Option<SyncState>> {
        Ok(self.load(db).await?.singleton(collection).cloned())
    }

    async fn replace_sync_state(
        &self,
        db: &str,
        collection: &str,
        state: &SyncState,
    ) -> Result<()> {
        self.modify(db, |d| d.replace_singleton(collection, state.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, reference: &str, metric: u64) -> Record {
        Record {
            name: name.to_string(),
            reference: reference.to_string(),
            description: format!("{name} package"),
            metric,
        }
    }

    #[tokio::test]
    async fn test_read_missing_database() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        assert!(store.find_all("packagedb", "Web").await.unwrap().is_empty());
        assert!(store.read_sync_state("usersdb", "pkgcount").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.connect().await.unwrap();

        store
            .upsert_record("packagedb", "Web", &record("gin", "https://github.com/gin-gonic/gin", 7))
            .await
            .unwrap();
        store
            .upsert_record("packagedb", "Web", &record("gin", "https://github.com/gin-gonic/gin", 2))
            .await
            .unwrap();

        let reopened = LocalStore::new(tmp.path());
        let docs = reopened.find_all("packagedb", "Web").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].record.metric, 7);
        assert!(tmp.path().join("packagedb.json").exists());
        assert!(!tmp.path().join("packagedb.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_sync_state_replace() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        store
            .replace_sync_state("usersdb", "pkgcount", &SyncState::new(10))
            .await
            .unwrap();
        store
            .replace_sync_state("usersdb", "pkgcount", &SyncState::new(14))
            .await
            .unwrap();

        let state = store.read_sync_state("usersdb", "pkgcount").await.unwrap();
        assert_eq!(state.unwrap().last_raw_entry_count, 14);
    }

    #[tokio::test]
    async fn test_corrupt_database_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("packagedb.json"), "{not json").unwrap();
        let store = LocalStore::new(tmp.path());

        assert!(matches!(
            store.list_partitions("packagedb").await,
            Err(AppError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_writes_save_once() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let records = vec![
            record("gin", "https://github.com/gin-gonic/gin", 7),
            record("echo", "https://github.com/labstack/echo", 3),
            record("gin", "https://github.com/gin-gonic/gin", 9),
        ];

        let outcomes = store.upsert_records("packagedb", "Web", &records).await.unwrap();
        let outcomes: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(
            outcomes,
            vec![
                UpsertOutcome::Inserted,
                UpsertOutcome::Inserted,
                UpsertOutcome::Updated
            ]
        );
        assert_eq!(store.save_count(), 1);

        let docs = store.find_all("packagedb", "Web").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].record.metric, 9);

        let ids = [docs[1].id, 999];
        let deleted = store.delete_records("packagedb", "Web", &ids).await.unwrap();
        let deleted: Vec<_> = deleted.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(deleted, vec![true, false]);
        assert_eq!(store.save_count(), 2);

        store.upsert_records("packagedb", "Web", &[]).await.unwrap();
        store.delete_records("packagedb", "Web", &[]).await.unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.find_all("packagedb", "Web").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(tmp.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let reference = format!("https://github.com/owner/repo{i}");
                store
                    .upsert_record("packagedb", "Web", &record("pkg", &reference, i))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.find_all("packagedb", "Web").await.unwrap().len(), 8);
    }
}
