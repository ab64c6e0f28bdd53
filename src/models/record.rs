//! Catalog data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw entry lines collected under one heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGroup {
    pub title: String,
    pub entries: Vec<String>,
}

/// A single catalog entry enriched with its popularity metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Record {
    /// Display name (the bracketed label)
    pub name: String,

    /// Canonical URL, the identity key
    #[serde(rename = "url")]
    pub reference: String,

    /// Free text after the link
    #[serde(rename = "info", default)]
    pub description: String,

    /// Popularity count (0 when unknown)
    #[serde(rename = "stars", default)]
    pub metric: u64,
}

impl Record {
    /// Whether the record carries the fields required for persistence.
    pub fn is_persistable(&self) -> bool {
        !self.name.trim().is_empty() && !self.reference.trim().is_empty()
    }

    /// Fold an incoming copy of the same reference into this one.
    ///
    /// Text fields follow the incoming copy, the metric never regresses.
    pub fn merge_from(&mut self, incoming: &Record) {
        self.name = incoming.name.clone();
        self.description = incoming.description.clone();
        self.metric = self.metric.max(incoming.metric);
    }
}

/// Enriched records for one heading; persisted as one partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogGroup {
    pub title: String,
    pub records: Vec<Record>,
}

/// A record as held by a store, tagged with its document id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRecord {
    /// Store-assigned identity, unique within a partition
    pub id: u64,

    #[serde(flatten)]
    pub record: Record,
}

/// Singleton used by the change gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    /// Raw entry total recorded by the last accepted sync
    #[serde(rename = "old")]
    pub last_raw_entry_count: u64,

    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(last_raw_entry_count: u64) -> Self {
        Self {
            last_raw_entry_count,
            updated_at: Utc::now(),
        }
    }
}
