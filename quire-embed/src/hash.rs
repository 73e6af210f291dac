//! Deterministic offline embeddings.
//!
//! These vectors carry no semantics; they exist so that ingestion and tests
//! can run without any model or network access and still produce stable,
//! unit-length vectors of the configured dimension.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;

const DIGEST_LEN: usize = 64;
const VALUE_MODULUS: u64 = 10_000_000;

fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Computes the deterministic fallback embedding of `text`.
///
/// The text is hashed into a 64-byte digest, which is read as little-endian
/// `u64` words. When the digest runs out, it is re-hashed together with an
/// incrementing counter. Each word `x` maps to `(x % 10^7) / 10^7`. The
/// values are then mean-centred and L2-normalized; a zero norm is left as is.
pub fn hash_embedding(text: &str, dimension: usize) -> Vec<f32> {
    if dimension == 0 {
        return Vec::new();
    }

    let seed = digest(text.as_bytes());
    let mut block = seed;
    let mut counter: u32 = 0;
    let mut values: Vec<f64> = Vec::with_capacity(dimension);

    'fill: loop {
        for word in block.chunks_exact(8) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(word);
            let x = u64::from_le_bytes(bytes);
            values.push((x % VALUE_MODULUS) as f64 / VALUE_MODULUS as f64);
            if values.len() == dimension {
                break 'fill;
            }
        }
        counter += 1;
        let mut salted = Vec::with_capacity(DIGEST_LEN + 4);
        salted.extend_from_slice(&seed);
        salted.extend_from_slice(&counter.to_le_bytes());
        block = digest(&salted);
    }

    let mean = values.iter().sum::<f64>() / dimension as f64;
    let centred: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let norm = centred.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm = if norm > 0.0 { norm } else { 1.0 };
    centred.into_iter().map(|v| (v / norm) as f32).collect()
}

/// A zero vector of the given dimension.
pub fn zero_embedding(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}

/// Embedding provider backed by [`hash_embedding`].
#[derive(Debug, Clone)]
pub struct HashEmbedProvider {
    dimension: usize,
}

impl HashEmbedProvider {
    /// Creates a provider producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "embedding dimension must be positive",
            ));
        }
        Ok(Self { dimension })
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_embedding(text, self.dimension))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts
            .iter()
            .map(|t| hash_embedding(t, self.dimension))
            .collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash"
    }

    fn model_id(&self) -> String {
        "hash:blake3-v1".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_hash_embedding_is_deterministic() {
        let a = hash_embedding("graph neural networks", 64);
        let b = hash_embedding("graph neural networks", 64);
        assert_eq!(a, b);
        assert_ne!(a, hash_embedding("graph neural network", 64));
    }

    #[test]
    fn test_hash_embedding_is_unit_length_and_centred() {
        // 100 components needs several re-hashes of the 8-word digest.
        let v = hash_embedding("some abstract text", 100);
        assert_eq!(v.len(), 100);
        assert!((norm(&v) - 1.0).abs() < 1e-4);
        let mean: f32 = v.iter().sum::<f32>() / v.len() as f32;
        assert!(mean.abs() < 1e-4);
    }

    #[test]
    fn test_single_component_is_zero_not_nan() {
        let v = hash_embedding("lonely", 1);
        assert_eq!(v, vec![0.0]);
    }

    #[test]
    fn test_zero_dimension() {
        assert!(hash_embedding("text", 0).is_empty());
        assert!(HashEmbedProvider::new(0).is_err());
        assert_eq!(zero_embedding(3), vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_provider_batch_matches_single() -> anyhow::Result<()> {
        let provider = HashEmbedProvider::new(32)?;
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = provider.embed_texts(&texts).await?;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, 32);
        assert_eq!(batch.embeddings[1], provider.embed_text("beta").await?);
        assert_eq!(provider.provider_name(), "hash");
        Ok(())
    }
}
