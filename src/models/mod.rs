// src/models/mod.rs

//! Domain models for the catalog sync.

mod config;
mod record;

// Re-export all public types
pub use config::{Config, MetricsConfig, SourceConfig, StoreConfig, SyncConfig, env};
pub use record::{CatalogGroup, RawGroup, Record, StoredRecord, SyncState};
