//! Slot-tracked batch embedding.
//!
//! Large inputs are sent to the provider in sub-batches. Every result is
//! written back into the slot of the text it was requested for, so the output
//! never depends on how a provider orders or drops items. Slots that come
//! back empty (or whose sub-batch failed outright) are retried once, one text
//! at a time.

use crate::error::EmbedError;
use crate::provider::EmbeddingProvider;
use std::time::Duration;
use tracing::{debug, warn};

/// Embeddings produced by [`embed_in_slots`].
#[derive(Debug, Clone, Default)]
pub struct SlotEmbeddings {
    /// `slots[i]` is the embedding of the i-th input, or `None` if it could not be embedded.
    pub slots: Vec<Option<Vec<f32>>>,
    /// Number of slots that needed an individual retry.
    pub retried: usize,
}

impl SlotEmbeddings {
    /// Number of slots that stayed empty after the retry pass.
    pub fn failed(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }
}

/// Embeds a single text with a timeout.
///
/// Errors, timeouts, empty vectors and vectors of the wrong dimension all
/// come back as `None`.
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Option<Vec<f32>> {
    match tokio::time::timeout(timeout, provider.embed_text(text)).await {
        Ok(Ok(vector)) => valid(provider, vector),
        Ok(Err(e)) => {
            warn!("{} failed to embed text: {}", provider.provider_name(), e);
            None
        }
        Err(_) => {
            warn!(
                "{} failed to embed text: {}",
                provider.provider_name(),
                timed_out(timeout)
            );
            None
        }
    }
}

/// Embeds `texts` in sub-batches of `sub_batch_size`, mapping results back by slot.
pub async fn embed_in_slots(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    sub_batch_size: usize,
    timeout: Duration,
) -> SlotEmbeddings {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
    let indices: Vec<usize> = (0..texts.len()).collect();

    for batch in indices.chunks(sub_batch_size.max(1)) {
        let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
        debug!(
            "Embedding sub-batch of {} starting at slot {}",
            inputs.len(),
            batch[0]
        );

        match tokio::time::timeout(timeout, provider.embed_texts(&inputs)).await {
            Ok(Ok(result)) if result.len() == batch.len() => {
                for (&slot, vector) in batch.iter().zip(result.embeddings) {
                    slots[slot] = valid(provider, vector);
                }
            }
            Ok(Ok(result)) => {
                warn!(
                    "{} returned {} embeddings for {} inputs; retrying individually",
                    provider.provider_name(),
                    result.len(),
                    batch.len()
                );
            }
            Ok(Err(e)) => {
                warn!(
                    "{} sub-batch failed: {}; retrying individually",
                    provider.provider_name(),
                    e
                );
            }
            Err(_) => {
                warn!(
                    "{} sub-batch failed: {}; retrying individually",
                    provider.provider_name(),
                    timed_out(timeout)
                );
            }
        }
    }

    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_none())
        .map(|(i, _)| i)
        .collect();

    for &slot in &missing {
        slots[slot] = embed_one(provider, &texts[slot], timeout).await;
    }

    let embeddings = SlotEmbeddings {
        slots,
        retried: missing.len(),
    };
    if embeddings.failed() > 0 {
        warn!(
            "{} of {} texts could not be embedded by {}",
            embeddings.failed(),
            texts.len(),
            provider.provider_name()
        );
    }
    embeddings
}

fn timed_out(timeout: Duration) -> EmbedError {
    EmbedError::Timeout {
        seconds: timeout.as_secs_f64(),
    }
}

fn valid(provider: &dyn EmbeddingProvider, vector: Vec<f32>) -> Option<Vec<f32>> {
    if vector.is_empty() || vector.len() != provider.embedding_dimension() {
        None
    } else {
        Some(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::provider::EmbeddingResult;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Embeds text as `[len, 1.0]`, fails batch items containing "flaky" and
    /// every single-item request containing "dead".
    #[derive(Default)]
    struct ScriptedProvider {
        batch_calls: Mutex<Vec<usize>>,
        single_calls: Mutex<Vec<String>>,
        fail_batches: bool,
    }

    fn vector_for(text: &str) -> Vec<f32> {
        vec![text.len() as f32, 1.0]
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            self.single_calls
                .lock()
                .map_err(|_| EmbedError::invalid_config("poisoned"))?
                .push(text.to_string());
            if text.contains("dead") {
                Ok(Vec::new())
            } else {
                Ok(vector_for(text))
            }
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
            self.batch_calls
                .lock()
                .map_err(|_| EmbedError::invalid_config("poisoned"))?
                .push(texts.len());
            if self.fail_batches {
                return Err(EmbedError::invalid_config("batch endpoint down"));
            }
            Ok(EmbeddingResult::new(
                texts
                    .iter()
                    .map(|t| {
                        if t.contains("flaky") || t.contains("dead") {
                            Vec::new()
                        } else {
                            vector_for(t)
                        }
                    })
                    .collect(),
            ))
        }

        fn embedding_dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_id(&self) -> String {
            "scripted".to_string()
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_missing_slots_are_retried_individually() {
        let provider = ScriptedProvider::default();
        let input = texts(&["a", "flaky-bb", "ccc", "dead-dddd", "eeeee"]);

        let out = embed_in_slots(&provider, &input, 2, Duration::from_secs(5)).await;

        assert_eq!(*provider.batch_calls.lock().unwrap(), vec![2, 2, 1]);
        assert_eq!(
            *provider.single_calls.lock().unwrap(),
            vec!["flaky-bb".to_string(), "dead-dddd".to_string()]
        );
        assert_eq!(out.retried, 2);
        assert_eq!(out.failed(), 1);
        assert_eq!(out.slots[0], Some(vec![1.0, 1.0]));
        assert_eq!(out.slots[1], Some(vec![8.0, 1.0]));
        assert_eq!(out.slots[2], Some(vec![3.0, 1.0]));
        assert_eq!(out.slots[3], None);
        assert_eq!(out.slots[4], Some(vec![5.0, 1.0]));
    }

    #[tokio::test]
    async fn test_failed_sub_batch_falls_back_to_single_calls() {
        let provider = ScriptedProvider {
            fail_batches: true,
            ..Default::default()
        };
        let input = texts(&["x", "yy", "zzz"]);

        let out = embed_in_slots(&provider, &input, 8, Duration::from_secs(5)).await;

        assert_eq!(out.retried, 3);
        assert_eq!(out.failed(), 0);
        let firsts: Vec<f32> = out.slots.iter().flatten().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let provider = ScriptedProvider::default();
        let out = embed_in_slots(&provider, &[], 4, Duration::from_secs(1)).await;
        assert!(out.slots.is_empty());
        assert!(provider.batch_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embed_one_rejects_soft_failure() {
        let provider = ScriptedProvider::default();
        assert!(embed_one(&provider, "dead", Duration::from_secs(1)).await.is_none());
        assert_eq!(
            embed_one(&provider, "ok", Duration::from_secs(1)).await,
            Some(vec![2.0, 1.0])
        );
    }

    /// Answers correctly, but only after `delay`.
    struct SlowProvider {
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(self.delay).await;
            Ok(vector_for(text))
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
            tokio::time::sleep(self.delay).await;
            Ok(EmbeddingResult::new(texts.iter().map(|t| vector_for(t)).collect()))
        }

        fn embedding_dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "slow"
        }

        fn model_id(&self) -> String {
            "slow".to_string()
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_timeouts_leave_slots_empty() {
        let provider = SlowProvider {
            delay: Duration::from_millis(500),
        };
        let input = texts(&["a", "bb"]);

        let out = embed_in_slots(&provider, &input, 8, Duration::from_millis(10)).await;

        assert_eq!(out.retried, 2);
        assert_eq!(out.failed(), 2);
        assert!(embed_one(&provider, "a", Duration::from_millis(10)).await.is_none());
        assert!(logs_contain("Embedding request timed out after"));
    }
}
