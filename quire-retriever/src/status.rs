//! Diagnostics for `quire status`: index artifacts, fingerprint staleness, embedder and store health.

use serde::Serialize;
use std::path::PathBuf;

use crate::ingest::retry::{ErrorClass, classify_store_error};
use crate::retrieval::fingerprint::{EmbedderSignature, FingerprintTracker};
use crate::retrieval::indexing_coordinator::{CoordinatorConfig, index_artifacts_exist};
use crate::retrieval::vector_index::read_meta;
use crate::storage::{CorpusState, PaperStore};
use quire_embed::EmbeddingProvider;

/// Persisted index artifacts
#[derive(Debug, Clone, Serialize)]
pub struct IndexArtifactStatus {
    pub index_dir: PathBuf,
    /// All of matrix, metadata and passage map exist
    pub present: bool,
    pub rows: Option<usize>,
    pub dim: Option<usize>,
}

/// Whether the persisted index matches the current data and embedder
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintStatus {
    pub data_path: PathBuf,
    /// `None` when the data file cannot be read
    pub current: Option<String>,
    pub last: Option<String>,
    /// A startup would rebuild the index
    pub stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    /// The store is temporarily unreachable; retrying should succeed
    Recovering,
    Failed,
}

/// Backing store health
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    pub count_papers: Option<usize>,
    pub corpora: Vec<CorpusState>,
    pub error: Option<String>,
}

/// Embedding provider in use
#[derive(Debug, Clone, Serialize)]
pub struct EmbedderStatus {
    pub provider: String,
    pub model_id: String,
    pub dimension: usize,
}

/// Everything `quire status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub index: IndexArtifactStatus,
    pub fingerprint: FingerprintStatus,
    pub embedder: EmbedderStatus,
    pub store: Option<StoreHealth>,
}

impl StatusReport {
    pub async fn collect(
        coordinator: &CoordinatorConfig,
        embedder: &dyn EmbeddingProvider,
        store: Option<&dyn PaperStore>,
    ) -> Self {
        let index_path = coordinator.index_path();
        let meta = read_meta(&index_path);
        let present = index_artifacts_exist(&coordinator.index_dir);

        let tracker = FingerprintTracker::new(
            coordinator.fingerprint_path(),
            EmbedderSignature {
                model_id: embedder.model_id(),
                dimension: embedder.embedding_dimension(),
                max_passage_len: coordinator.max_passage_len,
            },
        );
        let current = tracker.fingerprint(&coordinator.data_path).ok();
        let last = tracker.read_last();
        let stale = !present || current.is_none() || current != last;

        let store = match store {
            Some(store) => Some(store_health(store).await),
            None => None,
        };

        Self {
            index: IndexArtifactStatus {
                index_dir: coordinator.index_dir.clone(),
                present,
                rows: meta.map(|m| m.rows),
                dim: meta.map(|m| m.dim),
            },
            fingerprint: FingerprintStatus {
                data_path: coordinator.data_path.clone(),
                current,
                last,
                stale,
            },
            embedder: EmbedderStatus {
                provider: embedder.provider_name().to_string(),
                model_id: embedder.model_id(),
                dimension: embedder.embedding_dimension(),
            },
            store,
        }
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!(
                "index: {} ({})",
                self.index.index_dir.display(),
                match (self.index.present, self.index.rows, self.index.dim) {
                    (true, Some(rows), Some(dim)) => format!("{rows} rows x {dim}"),
                    (true, _, _) => "present".to_string(),
                    (false, _, _) => "missing".to_string(),
                }
            ),
            format!(
                "data: {} ({})",
                self.fingerprint.data_path.display(),
                if self.fingerprint.stale { "stale" } else { "up to date" }
            ),
            format!(
                "embedder: {} [{}] dim {}",
                self.embedder.provider, self.embedder.model_id, self.embedder.dimension
            ),
        ];

        if let Some(store) = &self.store {
            let mut line = format!("store: {:?}", store.status).to_lowercase();
            if let Some(count) = store.count_papers {
                line.push_str(&format!(", {count} papers"));
            }
            if let Some(error) = &store.error {
                line.push_str(&format!(" ({error})"));
            }
            lines.push(line);
            for corpus in &store.corpora {
                lines.push(format!(
                    "  corpus {}: {} at {}",
                    corpus.corpus_name,
                    corpus.fingerprint,
                    corpus.updated_at.to_rfc3339()
                ));
            }
        }

        lines.join("\n")
    }
}

async fn store_health(store: &dyn PaperStore) -> StoreHealth {
    let counted = match store.count_papers().await {
        Ok(count) => store.corpus_fingerprints().await.map(|corpora| (count, corpora)),
        Err(e) => Err(e),
    };

    match counted {
        Ok((count, corpora)) => StoreHealth {
            status: HealthStatus::Ok,
            count_papers: Some(count),
            corpora,
            error: None,
        },
        Err(e) => {
            let status = match classify_store_error(&e) {
                ErrorClass::Transient => HealthStatus::Recovering,
                ErrorClass::Fatal => HealthStatus::Failed,
            };
            tracing::warn!("Store health check failed: {}", e);
            StoreHealth {
                status,
                count_papers: None,
                corpora: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}
