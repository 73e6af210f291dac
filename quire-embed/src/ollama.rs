//! Embedding provider backed by an Ollama server's `/api/embed` endpoint.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, l2_normalize};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Remote embedding provider talking to Ollama.
///
/// Transport and decoding failures never surface as errors. They turn into
/// empty vectors for the affected items, which callers retry or skip.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
    dimension: usize,
}

impl OllamaProvider {
    /// Creates a provider for `model` on `host` (for example `http://127.0.0.1:11434`).
    ///
    /// A model name without a tag gets `:latest` appended.
    pub fn new(host: &str, model: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "embedding dimension must be positive",
            ));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(EmbedError::invalid_config("ollama model name is empty"));
        }
        let model = if model.contains(':') {
            model.to_string()
        } else {
            format!("{model}:latest")
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EmbedError::model_init)?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model,
            dimension,
        })
    }

    async fn request(&self, inputs: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.host);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: inputs,
            })
            .send()
            .await?
            .error_for_status()?;
        let body: EmbedResponse = response.json().await?;
        Ok(body.embeddings)
    }

    fn accept(&self, mut vector: Vec<f32>) -> Vec<f32> {
        if vector.len() != self.dimension || vector.iter().any(|x| !x.is_finite()) {
            warn!(
                "Discarding embedding of length {} from {} (expected {})",
                vector.len(),
                self.model,
                self.dimension
            );
            return Vec::new();
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        Ok(result.embeddings.into_iter().next().unwrap_or_default())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut out: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];

        // Blank inputs are never sent; their slots stay empty.
        let slots: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        if slots.is_empty() {
            return Ok(EmbeddingResult::new(out));
        }

        let inputs: Vec<&str> = slots.iter().map(|&i| texts[i].trim()).collect();
        debug!("Requesting {} embeddings from {}", inputs.len(), self.model);

        match self.request(inputs).await {
            Ok(vectors) if vectors.len() == slots.len() => {
                for (slot, vector) in slots.into_iter().zip(vectors) {
                    out[slot] = self.accept(vector);
                }
            }
            Ok(vectors) => {
                warn!(
                    "Embedding batch length mismatch: {} vs {}",
                    vectors.len(),
                    slots.len()
                );
            }
            Err(e) => {
                warn!("Ollama embed request failed: {}", e);
            }
        }

        Ok(EmbeddingResult::new(out))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> String {
        format!("ollama:{}", self.model)
    }
}
