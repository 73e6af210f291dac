//! `quire.toml` configuration.
//!
//! Every section and field is optional; missing values take their defaults.
//!
//! ```toml
//! [paths]
//! data_path = "data/papers.jsonl"
//! index_dir = "index"
//! database_path = "quire.db"
//!
//! [embedding]
//! backend = "hash"
//! dimension = 384
//!
//! [chunking]
//! max_passage_len = 0
//!
//! [retrieval]
//! top_k = 5
//!
//! [retrieval.selector]
//! min_similarity = 0.05
//! max_ratio = 0.35
//! median_ratio = 0.5
//! cite_top_k = 5
//!
//! [generation]
//! max_sentences = 3
//!
//! [ingest]
//! batch_size = 256
//! embedding_mode = "hash"
//! max_attempts = 3
//! retry_delay_ms = 2000
//! ```

use crate::error::{Result, RetrieverError};
use crate::ingest::EmbeddingMode;
use crate::ingest::retry::{Backoff, RetryPolicy};
use crate::retrieval::indexing_coordinator::CoordinatorConfig;
use crate::retrieval::retriever::RetrievalConfig;
use quire_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Bulk record file the local index is built from
    pub data_path: PathBuf,
    /// Directory holding the persisted index artifacts
    pub index_dir: PathBuf,
    /// SQLite database used by ingestion and store-backed retrieval
    pub database_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/papers.jsonl"),
            index_dir: PathBuf::from("index"),
            database_path: PathBuf::from("quire.db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Passage budget in bytes. 0 embeds each document whole.
    pub max_passage_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_sentences: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_sentences: 3,
            timeout_secs: 20,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub embedding_mode: EmbeddingMode,
    pub update_fingerprint: bool,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Double the delay after every failed attempt, up to `max_retry_delay_ms`
    pub exponential_backoff: bool,
    pub max_retry_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            embedding_mode: EmbeddingMode::Hash,
            update_fingerprint: true,
            max_attempts: 3,
            retry_delay_ms: 2000,
            exponential_backoff: false,
            max_retry_delay_ms: 30_000,
        }
    }
}

impl IngestConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.retry_delay_ms);
        let backoff = if self.exponential_backoff {
            Backoff::Exponential {
                base: delay,
                cap: Duration::from_millis(self.max_retry_delay_ms),
            }
        } else {
            Backoff::Fixed(delay)
        };
        RetryPolicy::new(self.max_attempts, backoff)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    pub paths: PathsConfig,
    pub embedding: EmbedConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub ingest: IngestConfig,
}

impl QuireConfig {
    /// Reads `path`, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| RetrieverError::from_io(path, e))?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.embedding
            .validate()
            .map_err(|e| RetrieverError::invalid_config(e.to_string()))?;
        if self.ingest.batch_size == 0 {
            return Err(RetrieverError::invalid_config("ingest.batch_size must be positive"));
        }
        if self.ingest.max_attempts == 0 {
            return Err(RetrieverError::invalid_config(
                "ingest.max_attempts must be positive",
            ));
        }
        if self.retrieval.selector.cite_top_k == 0 {
            return Err(RetrieverError::invalid_config(
                "retrieval.selector.cite_top_k must be positive",
            ));
        }
        if self.generation.max_sentences == 0 {
            return Err(RetrieverError::invalid_config(
                "generation.max_sentences must be positive",
            ));
        }
        if self.generation.timeout_secs == 0 {
            return Err(RetrieverError::invalid_config(
                "generation.timeout_secs must be positive",
            ));
        }
        Ok(())
    }

    /// Makes relative paths relative to `base_dir`.
    pub fn resolve_paths(mut self, base_dir: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base_dir.join(&*p);
            }
        };
        resolve(&mut self.paths.data_path);
        resolve(&mut self.paths.index_dir);
        resolve(&mut self.paths.database_path);
        self
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new(&self.paths.data_path, &self.paths.index_dir)
            .with_max_passage_len(self.chunking.max_passage_len)
            .with_sub_batch_size(self.embedding.sub_batch_size)
            .with_embed_timeout(self.embedding.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_embed::EmbedBackend;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() -> anyhow::Result<()> {
        let config = QuireConfig::load(None)?;
        assert_eq!(config, QuireConfig::default());
        assert_eq!(config.retrieval.selector.cite_top_k, 5);
        assert_eq!(config.ingest.batch_size, 256);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("quire.toml");
        std::fs::write(
            &path,
            r#"
            [embedding]
            backend = "ollama"
            dimension = 768

            [retrieval.selector]
            min_similarity = 0.1

            [ingest]
            embedding_mode = "zeros"
            exponential_backoff = true
            "#,
        )?;

        let config = QuireConfig::load(Some(&path))?;
        assert_eq!(config.embedding.backend, EmbedBackend::Ollama);
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.retrieval.selector.min_similarity, 0.1);
        assert_eq!(config.retrieval.selector.max_ratio, 0.35);
        assert_eq!(config.ingest.embedding_mode, EmbeddingMode::Zeros);
        assert!(matches!(
            config.ingest.retry_policy().backoff,
            Backoff::Exponential { .. }
        ));
        assert_eq!(config.paths, PathsConfig::default());
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("quire.toml");

        for body in [
            "[embedding]\ndimension = 0",
            "[ingest]\nbatch_size = 0",
            "[ingest]\nmax_attempts = 0",
            "[retrieval.selector]\ncite_top_k = 0",
            "[generation]\nmax_sentences = 0",
            "[generation]\ntimeout_secs = 0",
        ] {
            std::fs::write(&path, body)?;
            assert!(
                matches!(
                    QuireConfig::load(Some(&path)),
                    Err(RetrieverError::InvalidConfig(_))
                ),
                "accepted: {body}"
            );
        }

        std::fs::write(&path, "[paths\n")?;
        assert!(matches!(
            QuireConfig::load(Some(&path)),
            Err(RetrieverError::Toml(_))
        ));
        Ok(())
    }

    #[test]
    fn test_resolve_paths() {
        let config = QuireConfig::default().resolve_paths(Path::new("/srv/quire"));
        assert_eq!(config.paths.index_dir, PathBuf::from("/srv/quire/index"));

        let mut absolute = QuireConfig::default();
        absolute.paths.data_path = PathBuf::from("/data/papers.jsonl");
        let resolved = absolute.resolve_paths(Path::new("/srv"));
        assert_eq!(resolved.paths.data_path, PathBuf::from("/data/papers.jsonl"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        assert!(matches!(
            QuireConfig::load(Some(Path::new("/no/quire.toml"))),
            Err(RetrieverError::NotFound { .. })
        ));
    }
}
