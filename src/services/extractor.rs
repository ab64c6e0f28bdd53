// src/services/extractor.rs

//! Field extraction for a single catalog entry line.

use std::sync::LazyLock;

use regex::Regex;

/// `- [label](url) - description`, description optional. The URL may
/// contain one level of balanced parentheses.
static ENTRY_FIELDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*+]\s+\[([^\]]+)\]\(((?:[^()\s]|\([^()\s]*\))+)\)(?:\s*-\s+(.*))?")
        .expect("entry field pattern is valid")
});

/// Fields captured from one entry line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFields {
    pub name: String,
    pub reference: String,
    pub description: String,
}

impl EntryFields {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.reference.is_empty() && self.description.is_empty()
    }
}

/// Split a raw entry line into name, reference and description.
///
/// Lines that do not have the entry shape yield all-empty fields.
pub fn extract_entry(line: &str) -> EntryFields {
    let Some(caps) = ENTRY_FIELDS_RE.captures(line) else {
        return EntryFields::default();
    };

    let field = |i: usize| {
        caps.get(i)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    };

    EntryFields {
        name: field(1),
        reference: field(2),
        description: field(3),
    }
}
