//! AWS S3 storage implementation.
//!
//! Same document layout as the local backend, one object per database:
//! `{bucket}/{prefix}/{database}.json`. A run is the only writer, so
//! read-modify-write cycles are serialized in process only.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Record, StoredRecord, SyncState};
use crate::storage::{CatalogStore, DocumentDb, UpsertOutcome};

/// S3-based catalog storage.
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
    write_lock: Mutex<()>,
}

impl S3Store {
    /// Create a new S3 store instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create an S3 store with credentials from the environment.
    pub async fn from_env(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket, prefix)
    }

    fn key(&self, db: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{db}.json")
        } else {
            format!("{prefix}/{db}.json")
        }
    }

    /// Read a database object, empty if it doesn't exist yet.
    async fn load(&self, db: &str) -> Result<DocumentDb> {
        let key = self.key(db);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::store(format!("s3://{}/{}: {}", self.bucket, key, e)))?;
                Ok(serde_json::from_slice(&bytes.into_bytes())?)
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::info!("No existing data at s3://{}/{}", self.bucket, key);
                    Ok(DocumentDb::default())
                } else {
                    Err(AppError::store(format!(
                        "s3://{}/{}: {}",
                        self.bucket, key, service_err
                    )))
                }
            }
        }
    }

    async fn save(&self, db: &str, document: &DocumentDb) -> Result<()> {
        let key = self.key(db);
        let json = serde_json::to_vec_pretty(document)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(json))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| AppError::store(format!("s3://{}/{}: {}", self.bucket, key, e)))?;

        log::debug!("Wrote s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn modify<T>(&self, db: &str, apply: impl FnOnce(&mut DocumentDb) -> T) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load(db).await?;
        let result = apply(&mut document);
        self.save(db, &document).await?;
        Ok(result)
    }
}

#[async_trait]
impl CatalogStore for S3Store {
    async fn connect(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| AppError::connection(format!("bucket {}: {}", self.bucket, e)))?;
        log::info!("Connected to s3://{}/{}", self.bucket, self.prefix);
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
