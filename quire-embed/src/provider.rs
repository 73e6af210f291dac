//! Embedding provider contract and the FastEmbed implementation

use crate::error::Result;
use async_trait::async_trait;

/// Result of batch embedding generation.
///
/// `embeddings[i]` belongs to the i-th input text. An empty vector marks an
/// item the provider could not embed (a soft, per-item failure).
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of the non-empty embedding vectors
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first non-empty embedding, or 0 if
    /// every entry is empty.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings
            .iter()
            .find(|e| !e.is_empty())
            .map(|e| e.len())
            .unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of entries in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no entries.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Number of entries that are empty (failed) vectors.
    pub fn failed_count(&self) -> usize {
        self.embeddings.iter().filter(|e| e.is_empty()).count()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// `embed_texts` must return exactly one entry per input. Callers never rely
/// on anything but that positional contract; see [`crate::batch`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text. An empty vector signals a soft failure.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Identifier of the model behind this provider, used in index fingerprints.
    fn model_id(&self) -> String;
}

/// Scale `vector` to unit L2 length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(feature = "fastembed")]
pub use fastembed_provider::FastEmbedProvider;

#[cfg(feature = "fastembed")]
mod fastembed_provider {
    use super::{EmbeddingProvider, EmbeddingResult, l2_normalize};
    use crate::error::{EmbedError, Result};
    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::{Arc, Mutex};

    /// FastEmbed-based embedding provider running local ONNX models
    #[derive(Clone)]
    pub struct FastEmbedProvider {
        model_name: String,
        model: Arc<Mutex<TextEmbedding>>,
        dimension: usize,
        batch_size: usize,
    }

    impl std::fmt::Debug for FastEmbedProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FastEmbedProvider")
                .field("model_name", &self.model_name)
                .field("dimension", &self.dimension)
                .field("batch_size", &self.batch_size)
                .finish()
        }
    }

    fn builtin_model(name: &str) -> Result<EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
            "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
            other => Err(EmbedError::invalid_config(format!(
                "unknown fastembed model '{other}'"
            ))),
        }
    }

    impl FastEmbedProvider {
        /// Loads a built-in fastembed model by name.
        pub async fn create(model_name: &str, batch_size: usize) -> Result<Self> {
            let model_kind = builtin_model(model_name)?;
            tracing::info!("Loading fastembed model: {}", model_name);

            let (model, dimension) =
                tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                    let init_options = InitOptions::new(model_kind).with_show_download_progress(true);
                    let mut model = TextEmbedding::try_new(init_options)
                        .map_err(|e| EmbedError::External { source: e })?;

                    // Probe the dimension with a test embedding
                    let probe = model
                        .embed(vec!["test".to_string()], None)
                        .map_err(|e| EmbedError::External { source: e })?;
                    let dimension = probe.first().map(|emb| emb.len()).unwrap_or(0);
                    Ok((model, dimension))
                })
                .await??;

            if dimension == 0 {
                return Err(EmbedError::invalid_config(
                    "model validation failed: empty embedding",
                ));
            }

            tracing::info!("Model loaded successfully. Dimension: {}", dimension);
            Ok(Self {
                model_name: model_name.to_string(),
                model: Arc::new(Mutex::new(model)),
                dimension,
                batch_size: batch_size.max(1),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedProvider {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            let result = self.embed_texts(&[text.to_string()]).await?;
            Ok(result.embeddings.into_iter().next().unwrap_or_default())
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
            if texts.is_empty() {
                return Ok(EmbeddingResult::new(vec![]));
            }

            let texts = texts.to_vec();
            let model = Arc::clone(&self.model);
            let batch_size = self.batch_size;

            let mut embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model.lock().map_err(|_| {
                    EmbedError::invalid_config("fastembed model mutex poisoned")
                })?;
                guard
                    .embed(texts, Some(batch_size))
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            for embedding in &mut embeddings {
                l2_normalize(embedding);
            }
            Ok(EmbeddingResult::new(embeddings))
        }

        fn embedding_dimension(&self) -> usize {
            self.dimension
        }

        fn provider_name(&self) -> &str {
            "fastembed"
        }

        fn model_id(&self) -> String {
            format!("fastembed:{}", self.model_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_result() {
        let result = EmbeddingResult::new(vec![vec![], vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);

        assert_eq!(result.len(), 3);
        assert_eq!(result.dimension, 3);
        assert_eq!(result.failed_count(), 1);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_empty_embedding_result() {
        let result = EmbeddingResult::new(vec![]);
        assert!(result.is_empty());
        assert_eq!(result.dimension, 0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
