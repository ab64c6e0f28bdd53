//! Pipeline stages after grouping and enrichment.
//!
//! - `ChangeGate`: decide whether the document grew since the last run
//! - `CatalogMerger`: upsert groups and sweep duplicates
//! - `SyncOrchestrator`: one end-to-end run

pub mod gate;
pub mod merge;
pub mod sync;

pub use gate::{ChangeGate, GateDecision, GateReason};
pub use merge::{CatalogDedup, CatalogMerger, DedupStats, MergeStats};
pub use sync::{SyncOrchestrator, SyncReport};
