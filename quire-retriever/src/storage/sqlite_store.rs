//! SQLite implementation of [`PaperStore`].
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE papers (
//!     doc_id TEXT PRIMARY KEY,
//!     title TEXT NOT NULL,
//!     abstract TEXT NOT NULL,
//!     embedding BLOB NOT NULL,      -- little-endian f32, fixed dimension
//!     updated_at TIMESTAMP NOT NULL
//! );
//!
//! CREATE TABLE corpus_state (
//!     corpus_name TEXT PRIMARY KEY,
//!     fingerprint TEXT NOT NULL,
//!     updated_at TIMESTAMP NOT NULL
//! );
//! ```
//!
//! SQLite has no vector operators, so [`PaperStore::nearest`] scores every
//! stored embedding in memory. That is an exact linear scan, which is all the
//! corpus sizes quire targets need.

use super::{
    CorpusState, PaperRecord, PaperRow, PaperStore, ScoredPaper, StoreResult, UpsertCounts,
};
use crate::error::StoreError;
use crate::retrieval::vector_index::top_k;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Paper store backed by a SQLite database file (or an in-memory database).
pub struct SqlitePaperStore {
    pool: RwLock<SqlitePool>,
    options: SqliteConnectOptions,
    max_connections: u32,
    dimension: usize,
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice::<f32, u8>(embedding).to_vec()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect()
}

fn paper_from_row(row: &sqlx::sqlite::SqliteRow) -> PaperRow {
    PaperRow {
        doc_id: row.get("doc_id"),
        title: row.get("title"),
        abstract_text: row.get("abstract"),
        updated_at: row.get("updated_at"),
    }
}

impl SqlitePaperStore {
    /// Opens (creating if needed) the database at `path`.
    pub async fn open(path: &Path, dimension: usize) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.into()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        Self::connect(options, 4, dimension).await
    }

    /// Opens a private in-memory database. Intended for tests.
    ///
    /// The pool holds a single connection for its whole lifetime, since every
    /// new connection to `:memory:` would see an empty database.
    pub async fn open_memory(dimension: usize) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options, 1, dimension).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
        dimension: usize,
    ) -> StoreResult<Self> {
        let pool = Self::new_pool(&options, max_connections).await?;
        Ok(Self {
            pool: RwLock::new(pool),
            options,
            max_connections,
            dimension,
        })
    }

    async fn new_pool(options: &SqliteConnectOptions, max_connections: u32) -> StoreResult<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options.clone())
            .await?;
        Self::create_tables(&pool).await?;
        Ok(pool)
    }

    async fn create_tables(pool: &SqlitePool) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS papers (
                doc_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                abstract TEXT NOT NULL,
                embedding BLOB NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS corpus_state (
                corpus_name TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// A handle to the current pool, or [`StoreError::ConnectionClosed`].
    async fn pool(&self) -> StoreResult<SqlitePool> {
        let pool = self.pool.read().await.clone();
        if pool.is_closed() {
            return Err(StoreError::ConnectionClosed);
        }
        Ok(pool)
    }

    /// Closes the pool. Later calls fail with [`StoreError::ConnectionClosed`]
    /// until [`PaperStore::reconnect`] is called.
    pub async fn close(&self) {
        self.pool.read().await.close().await;
    }

    pub async fn is_closed(&self) -> bool {
        self.pool.read().await.is_closed()
    }
}

#[async_trait]
impl PaperStore for SqlitePaperStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert_papers(&self, papers: &[PaperRecord]) -> StoreResult<UpsertCounts> {
        if let Some(bad) = papers.iter().find(|p| p.embedding.len() != self.dimension) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.embedding.len(),
            });
        }

        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut counts = UpsertCounts::default();
        let now = Utc::now();

        for paper in papers {
            let exists = sqlx::query("SELECT 1 FROM papers WHERE doc_id = ?1")
                .bind(&paper.doc_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();

            sqlx::query(
                r#"
                INSERT INTO papers (doc_id, title, abstract, embedding, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(doc_id) DO UPDATE SET
                    title = excluded.title,
                    abstract = excluded.abstract,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&paper.doc_id)
            .bind(&paper.title)
            .bind(&paper.abstract_text)
            .bind(encode_embedding(&paper.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if exists {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }
        }

        tx.commit().await?;
        debug!(
            "Upserted {} papers ({} inserted, {} updated)",
            papers.len(),
            counts.inserted,
            counts.updated
        );
        Ok(counts)
    }

    async fn record_corpus_fingerprint(
        &self,
        corpus_name: &str,
        fingerprint: &str,
    ) -> StoreResult<()> {
        let pool = self.pool().await?;
        sqlx::query(
            r#"
            INSERT INTO corpus_state (corpus_name, fingerprint, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(corpus_name) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(corpus_name)
        .bind(fingerprint)
        .bind(Utc::now())
        .execute(&pool)
        .await?;
        info!("Recorded fingerprint {} for corpus {}", fingerprint, corpus_name);
        Ok(())
    }

    async fn corpus_fingerprints(&self) -> StoreResult<Vec<CorpusState>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT corpus_name, fingerprint, updated_at FROM corpus_state ORDER BY corpus_name",
        )
        .fetch_all(&pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CorpusState {
                corpus_name: row.get("corpus_name"),
                fingerprint: row.get("fingerprint"),
                updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
            })
            .collect())
    }

    async fn analyze(&self) -> StoreResult<()> {
        let pool = self.pool().await?;
        sqlx::query("ANALYZE").execute(&pool).await?;
        Ok(())
    }

    async fn reconnect(&self) -> StoreResult<()> {
        let mut guard = self.pool.write().await;
        if !guard.is_closed() && sqlx::query("SELECT 1").execute(&*guard).await.is_ok() {
            debug!("Store connection is healthy; reconnect skipped");
            return Ok(());
        }

        warn!("Re-acquiring store connection pool");
        let fresh = Self::new_pool(&self.options, self.max_connections).await?;
        let stale = std::mem::replace(&mut *guard, fresh);
        stale.close().await;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    async fn count_papers(&self) -> StoreResult<usize> {
        let pool = self.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers")
            .fetch_one(&pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn get_paper(&self, doc_id: &str) -> StoreResult<Option<PaperRow>> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT doc_id, title, abstract, updated_at FROM papers WHERE doc_id = ?1",
        )
        .bind(doc_id)
        .fetch_optional(&pool)
        .await?;
        Ok(row.as_ref().map(paper_from_row))
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> StoreResult<Vec<ScoredPaper>> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let pool = self.pool().await?;
        let rows =
            sqlx::query("SELECT doc_id, title, abstract, embedding, updated_at FROM papers")
                .fetch_all(&pool)
                .await?;

        let query_norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        let scored: Vec<(usize, f32)> = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let embedding = decode_embedding(row.get::<&[u8], _>("embedding"));
                let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
                let score = if norm > 0.0 && query_norm > 0.0 && embedding.len() == query.len() {
                    let dot: f32 = query.iter().zip(&embedding).map(|(a, b)| a * b).sum();
                    dot / (norm * query_norm)
                } else {
                    -1.0
                };
                (i, score)
            })
            .collect();

        Ok(top_k(scored, limit)
            .into_iter()
            .map(|(i, score)| ScoredPaper {
                paper: paper_from_row(&rows[i]),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paper(id: &str, title: &str, embedding: Vec<f32>) -> PaperRecord {
        PaperRecord {
            doc_id: id.to_string(),
            title: title.to_string(),
            abstract_text: format!("abstract of {id}"),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_counts_inserted_and_updated() -> anyhow::Result<()> {
        let store = SqlitePaperStore::open_memory(2).await?;

        let counts = store
            .upsert_papers(&[paper("a", "First", vec![1.0, 0.0]), paper("b", "B", vec![0.0, 1.0])])
            .await?;
        assert_eq!(counts, UpsertCounts { inserted: 2, updated: 0 });

        let counts = store.upsert_papers(&[paper("a", "Second", vec![1.0, 0.0])]).await?;
        assert_eq!(counts, UpsertCounts { inserted: 0, updated: 1 });

        assert_eq!(store.count_papers().await?, 2);
        let stored = store.get_paper("a").await?.unwrap();
        assert_eq!(stored.title, "Second");
        assert!(store.get_paper("zzz").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_dimension_mismatch_writes_nothing() -> anyhow::Result<()> {
        let store = SqlitePaperStore::open_memory(2).await?;
        let result = store
            .upsert_papers(&[paper("a", "A", vec![1.0, 0.0]), paper("b", "B", vec![1.0])])
            .await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert_eq!(store.count_papers().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_nearest_orders_by_cosine() -> anyhow::Result<()> {
        let store = SqlitePaperStore::open_memory(2).await?;
        store
            .upsert_papers(&[
                paper("x", "X", vec![1.0, 0.0]),
                paper("y", "Y", vec![0.0, 1.0]),
                paper("xy", "XY", vec![3.0, 3.0]),
            ])
            .await?;

        let hits = store.nearest(&[2.0, 0.0], 2).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].paper.doc_id, "x");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].paper.doc_id, "xy");
        assert!((hits[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        Ok(())
    }

    #[tokio::test]
    async fn test_corpus_fingerprints_upsert() -> anyhow::Result<()> {
        let store = SqlitePaperStore::open_memory(2).await?;
        store.record_corpus_fingerprint("papers.jsonl", "aaa").await?;
        store.record_corpus_fingerprint("papers.jsonl", "bbb").await?;
        store.record_corpus_fingerprint("other", "ccc").await?;

        let states = store.corpus_fingerprints().await?;
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].corpus_name, "papers.jsonl");
        assert_eq!(states[1].fingerprint, "bbb");
        store.analyze().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_close_and_reconnect_keeps_data() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = SqlitePaperStore::open(&dir.path().join("quire.db"), 2).await?;
        store.upsert_papers(&[paper("a", "A", vec![1.0, 0.0])]).await?;

        store.close().await;
        assert!(store.is_closed().await);
        assert!(matches!(
            store.count_papers().await,
            Err(StoreError::ConnectionClosed)
        ));

        store.reconnect().await?;
        assert!(!store.is_closed().await);
        assert_eq!(store.count_papers().await?, 1);
        store.ping().await?;
        Ok(())
    }
}
