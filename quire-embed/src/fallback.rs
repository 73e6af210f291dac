//! A provider that fills the gaps of a primary provider with hash embeddings.

use crate::error::{EmbedError, Result};
use crate::hash::HashEmbedProvider;
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Tries the primary provider first; any item it cannot embed gets the
/// deterministic hash embedding instead.
pub struct FallbackProvider {
    primary: Arc<dyn EmbeddingProvider>,
    fallback: HashEmbedProvider,
    model_id: String,
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let fallback = HashEmbedProvider::new(primary.embedding_dimension())?;
        let model_id = format!("hybrid:{}+{}", primary.model_id(), fallback.model_id());
        Ok(Self {
            primary,
            fallback,
            model_id,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        match self.primary.embed_text(text).await {
            Ok(vector) if !vector.is_empty() => Ok(vector),
            Ok(_) => self.fallback.embed_text(text).await,
            Err(e) => {
                warn!("Primary embed failed; falling back. {}", e);
                self.fallback.embed_text(text).await
            }
        }
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut embeddings = match self.primary.embed_texts(texts).await {
            Ok(result) if result.len() == texts.len() => result.embeddings,
            Ok(result) => {
                warn!(
                    "Primary returned {} embeddings for {} texts; falling back",
                    result.len(),
                    texts.len()
                );
                vec![Vec::new(); texts.len()]
            }
            Err(e) => {
                warn!("Primary batch embed failed; falling back. {}", e);
                vec![Vec::new(); texts.len()]
            }
        };

        for (slot, embedding) in embeddings.iter_mut().enumerate() {
            if embedding.is_empty() {
                *embedding = self.fallback.embed_text(&texts[slot]).await?;
            }
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.fallback.embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        "hybrid"
    }

    fn model_id(&self) -> String {
        self.model_id.clone()
    }
}

impl std::fmt::Debug for FallbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProvider")
            .field("primary", &self.primary.provider_name())
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// Convenience check used by callers wiring a provider to a fixed-dimension store.
pub fn ensure_dimension(provider: &dyn EmbeddingProvider, expected: usize) -> Result<()> {
    if provider.embedding_dimension() != expected {
        return Err(EmbedError::invalid_config(format!(
            "{} produces {}-dimensional vectors, expected {}",
            provider.provider_name(),
            provider.embedding_dimension(),
            expected
        )));
    }
    Ok(())
}
