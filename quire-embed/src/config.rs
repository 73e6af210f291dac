//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use crate::fallback::FallbackProvider;
use crate::hash::HashEmbedProvider;
use crate::ollama::OllamaProvider;
use crate::provider::EmbeddingProvider;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DIMENSION: usize = 384;
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";

/// Which embedding implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedBackend {
    /// Deterministic offline hash embeddings
    #[default]
    Hash,
    /// Ollama `/api/embed`
    Ollama,
    /// Ollama, with hash embeddings for any item it cannot embed
    Hybrid,
    /// Local ONNX models (requires the `fastembed` feature)
    FastEmbed,
}

impl FromStr for EmbedBackend {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "ollama" => Ok(Self::Ollama),
            "hybrid" => Ok(Self::Hybrid),
            "fastembed" => Ok(Self::FastEmbed),
            other => Err(EmbedError::invalid_config(format!(
                "unknown embedding backend '{other}'. Use: hash, ollama, hybrid, fastembed"
            ))),
        }
    }
}

/// Configuration for embedding providers
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct EmbedConfig {
    /// Provider implementation
    #[builder(default)]
    pub backend: EmbedBackend,
    /// Model name passed to the provider
    #[builder(default = "DEFAULT_OLLAMA_MODEL.to_string()")]
    pub model_name: String,
    /// Dimension of the produced vectors
    #[builder(default = "DEFAULT_DIMENSION")]
    pub dimension: usize,
    /// Base URL of the Ollama server
    #[builder(default = "DEFAULT_OLLAMA_HOST.to_string()")]
    pub ollama_host: String,
    /// Timeout for a single provider call, in seconds
    #[builder(default = "30")]
    pub timeout_secs: u64,
    /// Maximum number of texts per provider call
    #[builder(default = "64")]
    pub sub_batch_size: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::default(),
            model_name: DEFAULT_OLLAMA_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            timeout_secs: 30,
            sub_batch_size: 64,
        }
    }
}

impl EmbedConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.dimension == Some(0) {
            return Err("embedding dimension must be positive".to_string());
        }
        if self.sub_batch_size == Some(0) {
            return Err("sub_batch_size must be positive".to_string());
        }
        Ok(())
    }
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Hash embeddings of the given dimension
    pub fn hash(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Timeout applied to each provider call
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Check the configuration without constructing a provider.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config(
                "embedding dimension must be positive",
            ));
        }
        if self.sub_batch_size == 0 {
            return Err(EmbedError::invalid_config("sub_batch_size must be positive"));
        }
        Ok(())
    }

    /// Construct the configured provider.
    pub async fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.validate()?;
        tracing::info!(
            "Creating {:?} embedding provider (model {}, dimension {})",
            self.backend,
            self.model_name,
            self.dimension
        );

        match self.backend {
            EmbedBackend::Hash => Ok(Arc::new(HashEmbedProvider::new(self.dimension)?)),
            EmbedBackend::Ollama => Ok(Arc::new(self.ollama()?)),
            EmbedBackend::Hybrid => {
                let primary: Arc<dyn EmbeddingProvider> = Arc::new(self.ollama()?);
                Ok(Arc::new(FallbackProvider::new(primary)?))
            }
            EmbedBackend::FastEmbed => self.fastembed().await,
        }
    }

    fn ollama(&self) -> Result<OllamaProvider> {
        OllamaProvider::new(
            &self.ollama_host,
            &self.model_name,
            self.dimension,
            self.timeout(),
        )
    }

    #[cfg(feature = "fastembed")]
    async fn fastembed(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider =
            crate::provider::FastEmbedProvider::create(&self.model_name, self.sub_batch_size)
                .await?;
        crate::fallback::ensure_dimension(&provider, self.dimension)?;
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "fastembed"))]
    async fn fastembed(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(EmbedError::invalid_config(
            "the fastembed backend requires building with the `fastembed` feature",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() -> anyhow::Result<()> {
        let config = EmbedConfig::builder().dimension(8usize).build()?;
        assert_eq!(config.backend, EmbedBackend::Hash);
        assert_eq!(config.dimension, 8);
        assert_eq!(config.sub_batch_size, 64);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_builder_rejects_zero_dimension() {
        assert!(EmbedConfig::builder().dimension(0usize).build().is_err());
        assert!(EmbedConfig::hash(0).validate().is_err());
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Ollama".parse::<EmbedBackend>().ok(), Some(EmbedBackend::Ollama));
        assert!("word2vec".parse::<EmbedBackend>().is_err());
    }

    #[test]
    fn test_deserialize_partial() -> anyhow::Result<()> {
        let config: EmbedConfig =
            serde_json::from_str(r#"{"backend": "hybrid", "dimension": 768}"#)?;
        assert_eq!(config.backend, EmbedBackend::Hybrid);
        assert_eq!(config.dimension, 768);
        assert_eq!(config.ollama_host, DEFAULT_OLLAMA_HOST);
        Ok(())
    }

    #[tokio::test]
    async fn test_build_hash_provider() -> anyhow::Result<()> {
        let provider = EmbedConfig::hash(12).build_provider().await?;
        assert_eq!(provider.embedding_dimension(), 12);
        assert_eq!(provider.provider_name(), "hash");
        Ok(())
    }

    #[cfg(not(feature = "fastembed"))]
    #[tokio::test]
    async fn test_fastembed_requires_feature() {
        let config = EmbedConfig {
            backend: EmbedBackend::FastEmbed,
            ..EmbedConfig::default()
        };
        assert!(config.build_provider().await.is_err());
    }
}
