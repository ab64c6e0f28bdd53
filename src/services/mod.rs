//! Service layer for the catalog sync.
//!
//! This module contains the business logic for:
//! - Line classification and grouping (`DocumentGrouper`)
//! - Entry field extraction (`extract_entry`)
//! - Metric lookups (`MetricSource`, `HttpMetricFetcher`)
//! - Concurrent enrichment (`Enricher`)
//! - Document transport (`DocumentSource`)

pub mod enricher;
pub mod extractor;
pub mod grouper;
pub mod metrics;
pub mod source;

pub use enricher::{EnrichPolicy, EnrichStats, Enricher, Enrichment};
pub use extractor::{EntryFields, extract_entry};
pub use grouper::{DocumentGrouper, GroupedDocument, LineKind, classify_line, group_document};
pub use metrics::{HttpMetricFetcher, MetricSource};
pub use source::{DocumentSource, FileDocumentSource, HttpDocumentSource, StaticDocumentSource};
