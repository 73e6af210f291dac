//! Startup indexing: decide between loading the persisted index and rebuilding it.
//!
//! The coordinator compares the current fingerprint of the data file (content
//! plus embedder configuration) with the one recorded by the last successful
//! build. On a match, and with every artifact present and consistent, the
//! persisted index is loaded. Otherwise the corpus is re-read, split into
//! passages, embedded and written back out.
//!
//! Results are published through a [`CorpusHandle`]. Readers take one
//! snapshot per request; a rebuild swaps a complete new [`Corpus`] in, so a
//! request never sees a half-built index.

use crate::error::{Result, RetrieverError};
use crate::retrieval::fingerprint::{EmbedderSignature, FingerprintTracker};
use crate::retrieval::metadata_store::MetadataStore;
use crate::retrieval::passages::PassageMap;
use crate::retrieval::vector_index::{VectorIndex, meta_path};
use arc_swap::{ArcSwap, ArcSwapOption};
use quire_context::PassageSplitter;
use quire_embed::{EmbeddingProvider, embed_in_slots};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const INDEX_FILE: &str = "index.bin";
const PASSAGES_FILE: &str = "index.passages.json";
const FINGERPRINT_FILE: &str = "fingerprint.json";

/// Everything a request needs to answer from the local index.
#[derive(Debug)]
pub struct Corpus {
    pub documents: MetadataStore,
    pub passages: PassageMap,
    pub index: VectorIndex,
}

/// Readiness of the local index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexStatus {
    #[default]
    Uninitialized,
    Building,
    Ready {
        rows: usize,
        documents: usize,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Default)]
struct HandleInner {
    corpus: ArcSwapOption<Corpus>,
    status: ArcSwap<IndexStatus>,
}

/// Shared, cheaply cloneable view of the currently published corpus.
#[derive(Debug, Clone, Default)]
pub struct CorpusHandle {
    inner: Arc<HandleInner>,
}

impl CorpusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> IndexStatus {
        self.inner.status.load().as_ref().clone()
    }

    /// The current corpus, or [`RetrieverError::IndexNotReady`] if none has been published.
    ///
    /// During a rebuild the previous corpus stays available.
    pub fn snapshot(&self) -> Result<Arc<Corpus>> {
        self.inner.corpus.load_full().ok_or_else(|| {
            let reason = match self.status() {
                IndexStatus::Building => "index is still building".to_string(),
                IndexStatus::Failed { message } => format!("index build failed: {message}"),
                _ => "index has not been built or loaded".to_string(),
            };
            RetrieverError::IndexNotReady(reason)
        })
    }

    pub fn publish(&self, corpus: Corpus) {
        self.inner.corpus.store(Some(Arc::new(corpus)));
    }

    pub(crate) fn set_status(&self, status: IndexStatus) {
        self.inner.status.store(Arc::new(status));
    }
}

/// Outcome of [`IndexingCoordinator::startup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub rebuilt: bool,
    /// Rows indexed on rebuild; documents loaded otherwise
    pub count: usize,
    pub documents: usize,
    /// Passages that could not be embedded and were left out
    pub skipped: usize,
    pub fingerprint: String,
}

/// Configuration for the indexing coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub data_path: PathBuf,
    pub index_dir: PathBuf,
    /// Passage budget in bytes; 0 embeds each document whole
    pub max_passage_len: usize,
    pub sub_batch_size: usize,
    pub embed_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(data_path: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            index_dir: index_dir.into(),
            max_passage_len: 0,
            sub_batch_size: 64,
            embed_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_passage_len(mut self, max_passage_len: usize) -> Self {
        self.max_passage_len = max_passage_len;
        self
    }

    pub fn with_sub_batch_size(mut self, sub_batch_size: usize) -> Self {
        self.sub_batch_size = sub_batch_size.max(1);
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_FILE)
    }

    pub fn passages_path(&self) -> PathBuf {
        self.index_dir.join(PASSAGES_FILE)
    }

    pub fn fingerprint_path(&self) -> PathBuf {
        self.index_dir.join(FINGERPRINT_FILE)
    }
}

/// Builds or loads the local index on startup.
pub struct IndexingCoordinator {
    config: CoordinatorConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    fingerprints: FingerprintTracker,
    handle: CorpusHandle,
}

impl IndexingCoordinator {
    pub fn new(config: CoordinatorConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if embedder.embedding_dimension() == 0 {
            return Err(RetrieverError::invalid_config(
                "embedding dimension must be positive",
            ));
        }

        let signature = EmbedderSignature {
            model_id: embedder.model_id(),
            dimension: embedder.embedding_dimension(),
            max_passage_len: config.max_passage_len,
        };
        let fingerprints = FingerprintTracker::new(config.fingerprint_path(), signature);

        Ok(Self {
            config,
            embedder,
            fingerprints,
            handle: CorpusHandle::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn handle(&self) -> CorpusHandle {
        self.handle.clone()
    }

    pub fn fingerprints(&self) -> &FingerprintTracker {
        &self.fingerprints
    }

    /// Load the persisted index if it is current, rebuild it otherwise.
    pub async fn startup(&self) -> Result<StartupReport> {
        self.run(false).await
    }

    /// Rebuild unconditionally.
    pub async fn rebuild(&self) -> Result<StartupReport> {
        self.run(true).await
    }

    /// Run [`IndexingCoordinator::startup`] on a background task.
    ///
    /// The handle reports [`IndexStatus::Building`] until the task finishes.
    pub fn spawn_startup(self: Arc<Self>) -> JoinHandle<Result<StartupReport>> {
        self.handle.set_status(IndexStatus::Building);
        tokio::spawn(async move { self.startup().await })
    }

    async fn run(&self, force: bool) -> Result<StartupReport> {
        self.handle.set_status(IndexStatus::Building);

        let result = self.startup_inner(force).await;
        match &result {
            Ok(report) => {
                info!(
                    "Index ready (rebuilt: {}, count: {}, documents: {})",
                    report.rebuilt, report.count, report.documents
                );
                self.handle.set_status(IndexStatus::Ready {
                    rows: if report.rebuilt {
                        report.count
                    } else {
                        self.handle.snapshot().map(|c| c.index.rows()).unwrap_or(0)
                    },
                    documents: report.documents,
                });
            }
            Err(e) => {
                error!("Indexing failed: {}", e);
                self.handle.set_status(IndexStatus::Failed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn startup_inner(&self, force: bool) -> Result<StartupReport> {
        let current = self.fingerprints.fingerprint(&self.config.data_path)?;
        let last = self.fingerprints.read_last();

        if force {
            info!("Forced rebuild requested");
        } else if last.as_deref() != Some(current.as_str()) {
            info!("Fingerprint changed (last: {:?}); rebuilding", last);
        } else if !index_artifacts_exist(&self.config.index_dir) {
            info!("Index artifacts missing; rebuilding");
        } else {
            match self.load_corpus() {
                Ok(Some(corpus)) => {
                    let documents = corpus.documents.len();
                    self.handle.publish(corpus);
                    return Ok(StartupReport {
                        rebuilt: false,
                        count: documents,
                        documents,
                        skipped: 0,
                        fingerprint: current,
                    });
                }
                Ok(None) => warn!("Persisted index does not match the corpus; rebuilding"),
                Err(e) => warn!("Could not load persisted index ({}); rebuilding", e),
            }
        }

        self.rebuild_corpus(current).await
    }

    fn load_corpus(&self) -> Result<Option<Corpus>> {
        let documents = MetadataStore::load(&self.config.data_path)?;
        let index = VectorIndex::new();
        index.load(&self.config.index_path())?;
        let passages = PassageMap::load(&self.config.passages_path())?;

        if passages.len() != index.rows() || !passages.is_consistent_with(&documents) {
            return Ok(None);
        }
        if index.rows() > 0 && index.dim() != self.embedder.embedding_dimension() {
            return Ok(None);
        }

        Ok(Some(Corpus {
            documents,
            passages,
            index,
        }))
    }

    async fn rebuild_corpus(&self, fingerprint: String) -> Result<StartupReport> {
        let documents = MetadataStore::load(&self.config.data_path)?;
        let splitter = PassageSplitter::sentences(self.config.max_passage_len);
        let passages = PassageMap::build(&documents, &splitter);
        let texts = passages.texts(&documents);
        info!(
            "Embedding {} passages from {} documents with {}",
            texts.len(),
            documents.len(),
            self.embedder.provider_name()
        );

        let embedded = embed_in_slots(
            self.embedder.as_ref(),
            &texts,
            self.config.sub_batch_size,
            self.config.embed_timeout,
        )
        .await;
        let keep: Vec<bool> = embedded.slots.iter().map(Option::is_some).collect();
        let vectors: Vec<Vec<f32>> = embedded.slots.into_iter().flatten().collect();
        let passages = passages.retain_rows(&keep);
        let skipped = texts.len() - vectors.len();

        let index = VectorIndex::new();
        index.build(&vectors)?;

        std::fs::create_dir_all(&self.config.index_dir)?;
        index.save(&self.config.index_path())?;
        passages.save(&self.config.passages_path())?;

        if skipped == 0 {
            self.fingerprints.write(&fingerprint)?;
        } else {
            // An older fingerprint may still match the data; drop it so the next startup rebuilds.
            self.fingerprints.clear()?;
            warn!(
                "{} passages could not be embedded; index is incomplete and will be rebuilt on next startup",
                skipped
            );
        }

        let report = StartupReport {
            rebuilt: true,
            count: vectors.len(),
            documents: documents.len(),
            skipped,
            fingerprint,
        };
        self.handle.publish(Corpus {
            documents,
            passages,
            index,
        });
        Ok(report)
    }
}

/// Whether the persisted artifacts in `index_dir` exist.
pub fn index_artifacts_exist(index_dir: &Path) -> bool {
    let index_path = index_dir.join(INDEX_FILE);
    index_path.exists() && meta_path(&index_path).exists() && index_dir.join(PASSAGES_FILE).exists()
}
