//! Row to passage mapping.
//!
//! With passage splitting enabled, one document can own several index rows,
//! so a row index cannot double as a document index. A [`PassageMap`] records
//! for every row which document it came from and which byte span of that
//! document's text was embedded. It is built together with the matrix and
//! persisted next to it.

use crate::error::{Result, RetrieverError};
use crate::records::Document;
use crate::retrieval::fingerprint::write_atomic;
use crate::retrieval::metadata_store::MetadataStore;
use quire_context::PassageSplitter;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source of one index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageRef {
    /// Position of the document in the [`MetadataStore`]
    pub doc: usize,
    /// Byte offset where the passage starts in the document text
    pub start: usize,
    /// Byte offset one past the end of the passage
    pub end: usize,
}

/// `entries[row]` describes index row `row`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassageMap {
    entries: Vec<PassageRef>,
}

impl PassageMap {
    /// Splits every document of `store` into passages.
    pub fn build(store: &MetadataStore, splitter: &PassageSplitter) -> Self {
        let entries = store
            .iter()
            .enumerate()
            .flat_map(|(doc, document)| {
                splitter
                    .split(&document.text)
                    .into_iter()
                    .map(move |p| PassageRef {
                        doc,
                        start: p.start,
                        end: p.end,
                    })
            })
            .collect();
        Self { entries }
    }

    pub fn from_entries(entries: Vec<PassageRef>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<PassageRef> {
        self.entries.get(row).copied()
    }

    /// Keeps only the rows for which `keep` is true, preserving order.
    pub fn retain_rows(&self, keep: &[bool]) -> Self {
        let entries = self
            .entries
            .iter()
            .zip(keep)
            .filter(|(_, keep)| **keep)
            .map(|(entry, _)| *entry)
            .collect();
        Self { entries }
    }

    /// The passage text of every row, in row order.
    pub fn texts(&self, store: &MetadataStore) -> Vec<String> {
        (0..self.entries.len())
            .map(|row| {
                self.resolve(row, store)
                    .map(|(_, text)| text.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// The document and passage text behind `row`.
    ///
    /// Returns `None` if the row is out of range, the document is missing, or
    /// the span does not fall on character boundaries of the document text.
    pub fn resolve<'a>(&self, row: usize, store: &'a MetadataStore) -> Option<(&'a Document, &'a str)> {
        let entry = self.entries.get(row)?;
        let document = store.get(entry.doc)?;
        let text = document.text.get(entry.start..entry.end)?;
        Some((document, text))
    }

    /// Whether every row resolves against `store`.
    pub fn is_consistent_with(&self, store: &MetadataStore) -> bool {
        (0..self.entries.len()).all(|row| self.resolve(row, store).is_some())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_vec(&self.entries)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| RetrieverError::from_io(path, e))?;
        let entries = serde_json::from_slice(&raw).map_err(|e| RetrieverError::CorruptArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self { entries })
    }
}
