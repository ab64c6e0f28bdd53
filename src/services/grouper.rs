// src/services/grouper.rs

//! Line classification and heading-scoped grouping of a catalog document.
//!
//! The grammar is narrow: a heading is any line starting with
//! `#`, an entry is a list item whose first token is a `[label](http...)`
//! link. Everything else is noise and skipped.

use std::io::BufRead;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::Result;
use crate::models::RawGroup;

/// Groups smaller than this are treated as noise.
pub const MIN_GROUP_ENTRIES: usize = 3;

static ENTRY_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // The URL may hold one level of balanced parentheses.
    Regex::new(r"^\s*[-*+]\s+\[[^\]]+\]\(https?://(?:[^()\s]|\([^()\s]*\))+\)")
        .expect("entry line pattern is valid")
});

/// Kind of a single document line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Heading,
    Entry,
    Other,
}

/// Classify one line of the document.
pub fn classify_line(line: &str) -> LineKind {
    if line.starts_with('#') {
        LineKind::Heading
    } else if ENTRY_LINE_RE.is_match(line) {
        LineKind::Entry
    } else {
        LineKind::Other
    }
}

/// Derive a group title from a heading line.
///
/// The first whitespace-delimited token (the `#` marker) and the space after
/// it are removed; a heading without a space keeps its full text.
pub fn title_from_heading(line: &str) -> String {
    let line = line.trim_end();
    match line.split_once(' ') {
        Some((_, rest)) => rest.trim().to_string(),
        None => line.to_string(),
    }
}

/// Grouped raw entries plus the retained entry total.
#[derive(Debug, Clone, Default)]
pub struct GroupedDocument {
    /// Title to raw entry lines, in order of first appearance
    pub groups: IndexMap<String, Vec<String>>,

    /// Number of raw entries across all retained groups
    pub total_entries: usize,
}

impl GroupedDocument {
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Consume into owned groups.
    pub fn into_raw_groups(self) -> Vec<RawGroup> {
        self.groups
            .into_iter()
            .map(|(title, entries)| RawGroup { title, entries })
            .collect()
    }
}

/// Streaming grouper with a configurable noise threshold.
#[derive(Debug, Clone)]
pub struct DocumentGrouper {
    min_entries: usize,
}

impl Default for DocumentGrouper {
    fn default() -> Self {
        Self::new(MIN_GROUP_ENTRIES)
    }
}

impl DocumentGrouper {
    pub fn new(min_entries: usize) -> Self {
        Self {
            min_entries: min_entries.max(1),
        }
    }

    /// Group a line-oriented stream.
    ///
    /// Entries before the first heading are dropped; groups with fewer than
    /// `min_entries` lines are skipped without advancing the total.
    pub fn group<R: BufRead>(&self, mut reader: R) -> Result<GroupedDocument> {
        let mut doc = GroupedDocument::default();
        let mut title: Option<String> = None;
        let mut entries: Vec<String> = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);

            match classify_line(line) {
                LineKind::Heading => {
                    self.flush(&mut doc, title.as_deref(), &mut entries);
                    title = Some(title_from_heading(line));
                }
                LineKind::Entry if title.is_some() => entries.push(line.to_string()),
                LineKind::Entry | LineKind::Other => {}
            }
        }
        self.flush(&mut doc, title.as_deref(), &mut entries);

        log::info!(
            "Grouped document: {} groups, {} entries",
            doc.group_count(),
            doc.total_entries
        );
        Ok(doc)
    }

    /// Group an in-memory document.
    pub fn group_text(&self, text: &str) -> GroupedDocument {
        // Reading from a byte slice cannot fail.
        self.group(text.as_bytes()).unwrap_or_default()
    }

    fn flush(&self, doc: &mut GroupedDocument, title: Option<&str>, entries: &mut Vec<String>) {
        if entries.is_empty() {
            return;
        }
        let lines = std::mem::take(entries);
        let Some(title) = title else {
            return;
        };
        if lines.len() < self.min_entries {
            log::debug!("Dropping group '{}' with {} entries", title, lines.len());
            return;
        }
        doc.total_entries += lines.len();
        doc.groups.entry(title.to_string()).or_default().extend(lines);
    }
}

/// Group a stream with the default threshold.
pub fn group_document<R: BufRead>(reader: R) -> Result<GroupedDocument> {
    DocumentGrouper::default().group(reader)
}
