//! Query-time retrieval: embed, search, hydrate.

use crate::error::{Result, RetrieverError};
use crate::retrieval::indexing_coordinator::CorpusHandle;
use crate::retrieval::selector::SelectorConfig;
use crate::storage::PaperStore;
use quire_embed::{EmbeddingProvider, embed_one};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A retrieved passage with its source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub doc_id: String,
    pub title: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
    pub chunk: String,
}

/// Hits in descending score order, with `contexts()[i] == hits()[i].chunk`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    hits: Vec<Hit>,
    contexts: Vec<String>,
}

impl RetrievalResult {
    pub fn from_hits(mut hits: Vec<Hit>) -> Self {
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let contexts = hits.iter().map(|h| h.chunk.clone()).collect();
        Self { hits, contexts }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn into_hits(self) -> Vec<Hit> {
        self.hits
    }
}

/// Retrieval settings, the `[retrieval]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default number of results requested per query
    pub top_k: usize,
    /// Candidates fetched per requested result, so the selector has a distribution to work with
    pub oversample: usize,
    /// Lower bound on the candidate count
    pub min_candidates: usize,
    pub selector: SelectorConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            oversample: 4,
            min_candidates: 50,
            selector: SelectorConfig::default(),
        }
    }
}

enum Source {
    Local(CorpusHandle),
    Store(Arc<dyn PaperStore>),
}

/// Embeds queries and turns nearest-neighbour rows into [`Hit`]s.
pub struct Retriever {
    source: Source,
    embedder: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
    embed_timeout: Duration,
}

impl Retriever {
    /// Retrieve from the in-memory corpus published by an indexing coordinator.
    pub fn new(
        handle: CorpusHandle,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            source: Source::Local(handle),
            embedder,
            config,
            embed_timeout: Duration::from_secs(30),
        }
    }

    /// Retrieve directly from the backing store.
    pub fn from_store(
        store: Arc<dyn PaperStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            source: Source::Store(store),
            embedder,
            config,
            embed_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Number of candidates fetched for a request of `k` results.
    pub fn candidate_count(&self, k: usize) -> usize {
        k.saturating_mul(self.config.oversample)
            .max(self.config.min_candidates)
            .max(k)
    }

    /// Embed `query` and return the nearest passages.
    ///
    /// Returns every candidate (see [`Retriever::candidate_count`]), best
    /// first; trimming is left to the selector. A query that cannot be
    /// embedded yields an empty result. A corpus that is not ready yet is
    /// [`RetrieverError::IndexNotReady`].
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        // Fail fast on an unready corpus before spending an embedding call.
        let corpus = match &self.source {
            Source::Local(handle) => Some(handle.snapshot()?),
            Source::Store(_) => None,
        };

        if query.trim().is_empty() || k == 0 {
            return Ok(RetrievalResult::empty());
        }

        let Some(vector) = embed_one(self.embedder.as_ref(), query, self.embed_timeout).await
        else {
            let soft = RetrieverError::SoftEmbeddingFailure(format!(
                "query could not be embedded by {}",
                self.embedder.provider_name()
            ));
            warn!("{}; returning no results", soft);
            return Ok(RetrievalResult::empty());
        };

        let candidates = self.candidate_count(k);
        let hits = match (&self.source, corpus) {
            (Source::Local(_), Some(corpus)) => {
                let rows = corpus.index.search(&vector, candidates)?;
                rows.into_iter()
                    .filter_map(|(row, score)| {
                        match corpus.passages.resolve(row, &corpus.documents) {
                            Some((doc, chunk)) => Some(Hit {
                                doc_id: doc.doc_id.clone(),
                                title: doc.title.clone(),
                                score,
                                chunk: chunk.to_string(),
                            }),
                            None => {
                                warn!("Dropping hit for row {} with no document", row);
                                None
                            }
                        }
                    })
                    .collect::<Vec<_>>()
            }
            (Source::Store(store), _) => store
                .nearest(&vector, candidates)
                .await?
                .into_iter()
                .map(|scored| Hit {
                    doc_id: scored.paper.doc_id,
                    title: scored.paper.title,
                    score: scored.score,
                    chunk: scored.paper.abstract_text,
                })
                .collect(),
            (Source::Local(_), None) => Vec::new(),
        };

        let result = RetrievalResult::from_hits(hits);
        if let Some(best) = result.hits().first() {
            info!(
                "Retrieved {} candidates for k={} (best score {:.3})",
                result.len(),
                k,
                best.score
            );
        } else {
            debug!("No candidates for query");
        }
        Ok(result)
    }
}
