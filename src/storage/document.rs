//! In-memory document database shared by the store backends.
//!
//! A database holds named partitions of records plus named singleton
//! documents. Backends differ only in where a database is kept between
//! operations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::{Record, StoredRecord, SyncState};
use crate::storage::UpsertOutcome;

/// Records of one partition in storage order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    /// Next document id to hand out
    next_id: u64,
    documents: Vec<StoredRecord>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Append a document without any identity check.
    pub fn insert(&mut self, record: Record) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.documents.push(StoredRecord { id, record });
        id
    }

    /// Update the first document with the same reference, or insert.
    pub fn upsert(&mut self, record: &Record) -> UpsertOutcome {
        match self
            .documents
            .iter_mut()
            .find(|doc| doc.record.reference == record.reference)
        {
            Some(doc) => {
                doc.record.merge_from(record);
                UpsertOutcome::Updated
            }
            None => {
                self.insert(record.clone());
                UpsertOutcome::Inserted
            }
        }
    }

    /// Remove the document with the given id.
    pub fn delete(&mut self, id: u64) -> bool {
        let before = self.documents.len();
        self.documents.retain(|doc| doc.id != id);
        self.documents.len() != before
    }

    pub fn documents(&self) -> &[StoredRecord] {
        &self.documents
    }
}

/// One database: partitions and singleton documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentDb {
    #[serde(default)]
    partitions: IndexMap<String, Partition>,
    #[serde(default)]
    singletons: IndexMap<String, SyncState>,
}

impl DocumentDb {
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.get(name)
    }

    /// Partition by name, created empty on first use.
    pub fn partition_mut(&mut self, name: &str) -> &mut Partition {
        self.partitions.entry(name.to_string()).or_default()
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    pub fn find_all(&self, name: &str) -> Vec<StoredRecord> {
        self.partition(name)
            .map(|p| p.documents().to_vec())
            .unwrap_or_default()
    }

    pub fn delete(&mut self, name: &str, id: u64) -> bool {
        self.partitions
            .get_mut(name)
            .is_some_and(|p| p.delete(id))
    }

    pub fn singleton(&self, name: &str) -> Option<&SyncState> {
        self.singletons.get(name)
    }

    pub fn replace_singleton(&mut self, name: &str, state: SyncState) {
        self.singletons.insert(name.to_string(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, reference: &str, metric: u64) -> Record {
        Record {
            name: name.to_string(),
            reference: reference.to_string(),
            description: String::new(),
            metric,
        }
    }

    #[test]
    fn test_upsert_inserts_then_updates_max() {
        let mut partition = Partition::default();

        assert_eq!(
            partition.upsert(&record("gin", "https://github.com/gin-gonic/gin", 10)),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            partition.upsert(&record("gin", "https://github.com/gin-gonic/gin", 4)),
            UpsertOutcome::Updated
        );

        assert_eq!(partition.len(), 1);
        assert_eq!(partition.documents()[0].record.metric, 10);
    }

    #[test]
    fn test_ids_are_not_reused_after_delete() {
        let mut partition = Partition::default();
        let first = partition.insert(record("a", "https://x/a/a", 0));
        assert!(partition.delete(first));
        let second = partition.insert(record("b", "https://x/b/b", 0));

        assert_ne!(first, second);
        assert!(!partition.delete(first));
    }

    #[test]
    fn test_db_roundtrip_preserves_partition_order() {
        let mut db = DocumentDb::default();
        db.partition_mut("Zeta").insert(record("z", "https://x/z/z", 1));
        db.partition_mut("Alpha").insert(record("a", "https://x/a/a", 2));
        db.replace_singleton("pkgcount", SyncState::new(12));

        let json = serde_json::to_string(&db).unwrap();
        let loaded: DocumentDb = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.partition_names(), vec!["Zeta", "Alpha"]);
        assert_eq!(loaded.singleton("pkgcount").unwrap().last_raw_entry_count, 12);
        assert_eq!(loaded, db);
    }
}
