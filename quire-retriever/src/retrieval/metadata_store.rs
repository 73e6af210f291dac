//! In-memory document store with positional lookup.

use crate::error::{Result, RetrieverError};
use crate::records::{Document, RecordStream, map_record};
use std::path::Path;
use tracing::{debug, info, warn};

/// Documents loaded from a bulk record file, in file order.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    documents: Vec<Document>,
    skipped: usize,
}

impl MetadataStore {
    /// Loads every usable record from `path`.
    ///
    /// Records that fail to parse or lack a required field are skipped and
    /// counted (see [`MetadataStore::skipped`]). A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut documents = Vec::new();
        let mut skipped = 0;

        for item in RecordStream::open(path)? {
            match item {
                Ok(obj) => match map_record(&obj) {
                    Ok(doc) => documents.push(doc),
                    Err(missing) => {
                        debug!("Skipping record without {}", missing);
                        skipped += 1;
                    }
                },
                Err(RetrieverError::MalformedRecord { line, reason }) => {
                    debug!("Skipping malformed record at line {}: {}", line, reason);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if skipped > 0 {
            warn!("Skipped {} unusable records in {}", skipped, path.display());
        }
        info!("Loaded {} documents from {}", documents.len(), path.display());
        Ok(Self { documents, skipped })
    }

    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self {
            documents,
            skipped: 0,
        }
    }

    /// The document at position `idx`.
    pub fn get(&self, idx: usize) -> Option<&Document> {
        self.documents.get(idx)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    /// Number of records skipped while loading.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
