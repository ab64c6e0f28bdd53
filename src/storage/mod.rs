//! Storage abstractions for the catalog.
//!
//! The catalog is a document collection: each group title names a partition
//! of records, and a separate database keeps the sync state singleton.
//!
//! ## Backends
//!
//! ```text
//! memory://                 in-process, lost at exit
//! file://<dir>              <dir>/<database>.json, atomic replace
//! s3://<bucket>/<prefix>    <prefix>/<database>.json (feature `s3`)
//! ```

pub mod document;
pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Record, StoredRecord, StoreConfig, SyncState};

// Re-export for convenience
pub use document::{DocumentDb, Partition};
pub use local::LocalStore;
pub use memory::MemoryStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Trait for catalog storage backends.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Establish the connection. Failure here is fatal to a run.
    async fn connect(&self) -> Result<()>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;

    /// Update the record with the same reference, or insert it.
    ///
    /// Updates refresh text fields and keep the larger metric.
    async fn upsert_record(&self, db: &str, partition: &str, record: &Record)
    -> Result<UpsertOutcome>;

    /// Upsert several records into one partition.
    ///
    /// The outer error means nothing was written; inner results report each
    /// record in input order. Backends that persist whole documents override
    /// this to load and save the database once per call.
    async fn upsert_records(
        &self,
        db: &str,
        partition: &str,
        records: &[Record],
    ) -> Result<Vec<Result<UpsertOutcome>>> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.upsert_record(db, partition, record).await);
        }
        Ok(outcomes)
    }

    /// All records of a partition in storage order.
    async fn find_all(&self, db: &str, partition: &str) -> Result<Vec<StoredRecord>>;

    /// Delete one document by id. Returns whether it existed.
    async fn delete_record(&self, db: &str, partition: &str, id: u64) -> Result<bool>;

    /// Delete several documents from one partition, reporting each id in
    /// input order.
    async fn delete_records(
        &self,
        db: &str,
        partition: &str,
        ids: &[u64],
    ) -> Result<Vec<Result<bool>>> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for &id in ids {
            outcomes.push(self.delete_record(db, partition, id).await);
        }
        Ok(outcomes)
    }

    /// Names of all partitions in a database.
    async fn list_partitions(&self, db: &str) -> Result<Vec<String>>;

    /// Read the sync state singleton, if any.
    async fn read_sync_state(&self, db: &str, collection: &str) -> Result<Option<SyncState>>;

    /// Replace the sync state singleton.
    async fn replace_sync_state(&self, db: &str, collection: &str, state: &SyncState)
    -> Result<()>;
}

/// Open the backend named by the connection string.
///
/// The store is returned unconnected; callers own the connect/close pair.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn CatalogStore>> {
    let uri = config.uri.trim();
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| AppError::config(format!("store.uri has no scheme: {uri}")))?;

    match scheme {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "file" => {
            if rest.is_empty() {
                return Err(AppError::config("file:// store needs a directory"));
            }
            Ok(Arc::new(LocalStore::new(rest)))
        }
        #[cfg(feature = "s3")]
        "s3" => {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(AppError::config("s3:// store needs a bucket"));
            }
            Ok(Arc::new(S3Store::from_env(bucket, prefix).await))
        }
        other => Err(AppError::config(format!(
            "unsupported store scheme '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_config(uri: &str) -> StoreConfig {
        StoreConfig {
            uri: uri.to_string(),
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_store_schemes() {
        assert!(open_store(&store_config("memory://")).await.is_ok());
        assert!(open_store(&store_config("file://storage")).await.is_ok());
        assert!(open_store(&store_config("file://")).await.is_err());
        assert!(open_store(&store_config("mongodb://localhost")).await.is_err());
        assert!(open_store(&store_config("storage")).await.is_err());
    }
}
