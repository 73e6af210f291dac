//! Bulk ingestion of record files into the paper store.
//!
//! Records stream from the file, are normalized with [`map_record`], embedded
//! and upserted in batches of `batch_size`, one transaction per batch. A
//! transient store failure restarts the whole attempt after reconnecting;
//! since upserts are idempotent, rows committed by an earlier attempt are
//! simply written again (and counted as updated).

pub mod retry;

use crate::error::{Result, RetrieverError};
use crate::records::{Document, RecordStream, map_record};
use crate::retrieval::fingerprint::content_hash;
use crate::storage::{PaperRecord, PaperStore, UpsertCounts};
use quire_embed::{
    EmbeddingProvider, embed_in_slots, ensure_dimension, hash_embedding, zero_embedding,
};
use retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use retry::{Backoff, ErrorClass, classify, classify_store_error};

/// How ingested records get their embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMode {
    /// Deterministic offline hash embedding
    #[default]
    Hash,
    /// All-zero vectors
    Zeros,
    /// The configured embedding provider, with hash fallback per record
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub batch_size: usize,
    pub embedding_mode: EmbeddingMode,
    /// Record the file's content hash in `corpus_state` after a successful run
    pub update_fingerprint: bool,
    /// Defaults to the file name
    pub corpus_name: Option<String>,
}

impl IngestRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            batch_size: 256,
            embedding_mode: EmbeddingMode::Hash,
            update_fingerprint: true,
            corpus_name: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_embedding_mode(mut self, mode: EmbeddingMode) -> Self {
        self.embedding_mode = mode;
        self
    }

    pub fn with_update_fingerprint(mut self, update: bool) -> Self {
        self.update_fingerprint = update;
        self
    }

    pub fn with_corpus_name(mut self, name: impl Into<String>) -> Self {
        self.corpus_name = Some(name.into());
        self
    }

    pub fn corpus_name(&self) -> String {
        self.corpus_name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub file: PathBuf,
    pub corpus_name: String,
    /// Content hash recorded for the corpus, if recording was requested
    pub fingerprint: Option<String>,
    /// Records accepted and written
    pub rows_processed: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    /// `malformed_records + missing_fields`
    pub rows_skipped: usize,
    pub malformed_records: usize,
    pub missing_fields: usize,
    /// Accepted records whose `doc_id` appeared earlier in the same file
    pub duplicates_found: usize,
    /// Records embedded with the hash fallback because the provider failed
    pub embedding_fallbacks: usize,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Default)]
struct AttemptStats {
    processed: usize,
    malformed: usize,
    missing: usize,
    duplicates: usize,
    fallbacks: usize,
    counts: UpsertCounts,
}

/// Streams a record file into a [`PaperStore`].
pub struct IngestionPipeline {
    store: Arc<dyn PaperStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    retry: RetryPolicy,
    embed_timeout: Duration,
    sub_batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn PaperStore>) -> Self {
        Self {
            store,
            embedder: None,
            retry: RetryPolicy::default(),
            embed_timeout: Duration::from_secs(30),
            sub_batch_size: 64,
        }
    }

    /// Provider used by [`EmbeddingMode::Provider`].
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn with_sub_batch_size(mut self, sub_batch_size: usize) -> Self {
        self.sub_batch_size = sub_batch_size.max(1);
        self
    }

    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestReport> {
        if request.batch_size == 0 {
            return Err(RetrieverError::invalid_config("batch_size must be positive"));
        }
        if self.store.dimension() == 0 {
            return Err(RetrieverError::invalid_config(
                "store embedding dimension must be positive",
            ));
        }
        if request.embedding_mode == EmbeddingMode::Provider {
            if let Some(embedder) = &self.embedder {
                ensure_dimension(embedder.as_ref(), self.store.dimension())?;
            }
        }

        let corpus_name = request.corpus_name();
        let started = Instant::now();
        info!(
            "Ingesting {} into corpus {} (batch size {}, {:?} embeddings)",
            request.path.display(),
            corpus_name,
            request.batch_size,
            request.embedding_mode
        );

        let mut attempts = 0;
        let stats = self
            .retry
            .run(|attempt| {
                attempts = attempt;
                async move {
                    if attempt > 1 {
                        self.store.reconnect().await?;
                    }
                    self.ingest_attempt(request).await
                }
            })
            .await?;

        let fingerprint = if request.update_fingerprint {
            let fingerprint = content_hash(&request.path)?;
            self.retry
                .run(|attempt| {
                    let fingerprint = fingerprint.clone();
                    let corpus_name = corpus_name.clone();
                    async move {
                        if attempt > 1 {
                            self.store.reconnect().await?;
                        }
                        self.store
                            .record_corpus_fingerprint(&corpus_name, &fingerprint)
                            .await?;
                        Ok(())
                    }
                })
                .await?;
            Some(fingerprint)
        } else {
            None
        };

        if let Err(e) = self.store.analyze().await {
            warn!("Could not refresh store statistics: {}", e);
        }

        let report = IngestReport {
            file: request.path.clone(),
            corpus_name,
            fingerprint,
            rows_processed: stats.processed,
            rows_inserted: stats.counts.inserted,
            rows_updated: stats.counts.updated,
            rows_skipped: stats.malformed + stats.missing,
            malformed_records: stats.malformed,
            missing_fields: stats.missing,
            duplicates_found: stats.duplicates,
            embedding_fallbacks: stats.fallbacks,
            attempts,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            "Ingested {} rows ({} inserted, {} updated, {} skipped) in {} ms",
            report.rows_processed,
            report.rows_inserted,
            report.rows_updated,
            report.rows_skipped,
            report.duration_ms
        );
        Ok(report)
    }

    async fn ingest_attempt(&self, request: &IngestRequest) -> Result<AttemptStats> {
        let mut stats = AttemptStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut batch: Vec<Document> = Vec::with_capacity(request.batch_size);

        for item in RecordStream::open(&request.path)? {
            let record = match item {
                Ok(record) => record,
                Err(RetrieverError::MalformedRecord { line, reason }) => {
                    warn!("Skipping malformed record {}: {}", line, reason);
                    stats.malformed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let document = match map_record(&record) {
                Ok(document) => document,
                Err(field) => {
                    debug!("Skipping record without {}", field);
                    stats.missing += 1;
                    continue;
                }
            };

            if !seen.insert(document.doc_id.clone()) {
                stats.duplicates += 1;
            }
            stats.processed += 1;
            batch.push(document);

            if batch.len() >= request.batch_size {
                self.flush(&mut batch, request.embedding_mode, &mut stats).await?;
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, request.embedding_mode, &mut stats).await?;
        }
        Ok(stats)
    }

    async fn flush(
        &self,
        batch: &mut Vec<Document>,
        mode: EmbeddingMode,
        stats: &mut AttemptStats,
    ) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        let (embeddings, fallbacks) = self.embed_batch(&texts, mode).await;
        stats.fallbacks += fallbacks;

        let papers: Vec<PaperRecord> = batch
            .drain(..)
            .zip(embeddings)
            .map(|(doc, embedding)| PaperRecord {
                doc_id: doc.doc_id,
                title: doc.title,
                abstract_text: doc.text,
                embedding,
            })
            .collect();

        stats.counts += self.store.upsert_papers(&papers).await?;
        Ok(())
    }

    /// Embeddings for `texts` plus the number that fell back to the hash embedding.
    async fn embed_batch(&self, texts: &[String], mode: EmbeddingMode) -> (Vec<Vec<f32>>, usize) {
        let dimension = self.store.dimension();
        match mode {
            EmbeddingMode::Hash => (
                texts.iter().map(|t| hash_embedding(t, dimension)).collect(),
                0,
            ),
            EmbeddingMode::Zeros => (vec![zero_embedding(dimension); texts.len()], 0),
            EmbeddingMode::Provider => {
                let Some(embedder) = &self.embedder else {
                    warn!("No embedding provider configured; using hash embeddings");
                    return (
                        texts.iter().map(|t| hash_embedding(t, dimension)).collect(),
                        texts.len(),
                    );
                };

                let slots =
                    embed_in_slots(embedder.as_ref(), texts, self.sub_batch_size, self.embed_timeout)
                        .await;
                let mut fallbacks = 0;
                let embeddings = slots
                    .slots
                    .into_iter()
                    .zip(texts)
                    .map(|(slot, text)| {
                        slot.unwrap_or_else(|| {
                            fallbacks += 1;
                            hash_embedding(text, dimension)
                        })
                    })
                    .collect();
                if fallbacks > 0 {
                    warn!(
                        "{} of {} records fell back to hash embeddings",
                        fallbacks,
                        texts.len()
                    );
                }
                (embeddings, fallbacks)
            }
        }
    }
}

/// Ingests `path` with default settings.
pub async fn ingest_file(store: Arc<dyn PaperStore>, path: &Path) -> Result<IngestReport> {
    IngestionPipeline::new(store)
        .ingest(&IngestRequest::new(path))
        .await
}
