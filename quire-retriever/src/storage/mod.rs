//! Backing store for ingested papers.
//!
//! The ingestion pipeline writes into a [`PaperStore`]; the store-backed
//! retriever reads nearest neighbours back out of it. The only shipped
//! implementation is [`sqlite_store::SqlitePaperStore`].
//!
//! ```text
//! IngestionPipeline ── upsert_papers ──┐
//!                                      ├── PaperStore ── SqlitePaperStore
//! Retriever::from_store ── nearest ────┘
//! ```

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod sqlite_store;

pub use sqlite_store::SqlitePaperStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A paper ready to be written, with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperRecord {
    pub doc_id: String,
    pub title: String,
    pub abstract_text: String,
    pub embedding: Vec<f32>,
}

/// A stored paper, without its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperRow {
    pub doc_id: String,
    pub title: String,
    pub abstract_text: String,
    pub updated_at: DateTime<Utc>,
}

/// A paper with its cosine similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPaper {
    pub paper: PaperRow,
    pub score: f32,
}

/// Rows written by one [`PaperStore::upsert_papers`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    /// Keys that did not exist before the call
    pub inserted: usize,
    /// Keys that already existed and were overwritten
    pub updated: usize,
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

/// Fingerprint recorded for a named corpus after an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusState {
    pub corpus_name: String,
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
}

/// Relational store of papers and corpus fingerprints.
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Fixed embedding dimension of the `papers` table
    fn dimension(&self) -> usize;

    /// Insert or update `papers` by `doc_id` inside a single transaction.
    ///
    /// Either every row is written or none is.
    async fn upsert_papers(&self, papers: &[PaperRecord]) -> StoreResult<UpsertCounts>;

    async fn record_corpus_fingerprint(
        &self,
        corpus_name: &str,
        fingerprint: &str,
    ) -> StoreResult<()>;

    async fn corpus_fingerprints(&self) -> StoreResult<Vec<CorpusState>>;

    /// Refresh query-planner statistics
    async fn analyze(&self) -> StoreResult<()>;

    /// Re-acquire the connection pool if it has been closed or stopped responding
    async fn reconnect(&self) -> StoreResult<()>;

    /// Cheap liveness check
    async fn ping(&self) -> StoreResult<()>;

    async fn count_papers(&self) -> StoreResult<usize>;

    async fn get_paper(&self, doc_id: &str) -> StoreResult<Option<PaperRow>>;

    /// The `limit` papers most similar to `query`, best first.
    async fn nearest(&self, query: &[f32], limit: usize) -> StoreResult<Vec<ScoredPaper>>;
}
