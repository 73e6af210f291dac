//! Answer generation strategies.

use async_trait::async_trait;
use quire_context::split_sentences;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a generation strategy produced no answer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The strategy cannot run in this environment (no API key, no model, ...)
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generator returned blank text")]
    Blank,

    #[error("no generators configured")]
    Empty,
}

/// A strategy that turns a query and its contexts into answer text.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        query: &str,
        contexts: &[String],
        citation_schema: &str,
    ) -> Result<String, GenerationError>;
}

/// Tries generators in order until one returns non-blank text.
pub struct GeneratorChain {
    generators: Vec<Arc<dyn AnswerGenerator>>,
    timeout: Duration,
}

impl GeneratorChain {
    pub fn new(generators: Vec<Arc<dyn AnswerGenerator>>, timeout: Duration) -> Self {
        Self {
            generators,
            timeout,
        }
    }

    /// The offline default: a single [`ExtractiveGenerator`].
    pub fn extractive(max_sentences: usize, timeout: Duration) -> Self {
        Self::new(
            vec![Arc::new(ExtractiveGenerator::new(max_sentences))],
            timeout,
        )
    }

    pub fn names(&self) -> Vec<&str> {
        self.generators.iter().map(|g| g.name()).collect()
    }

    /// Returns the trimmed text of the first strategy that succeeds, with its name.
    ///
    /// If every strategy fails, the error of the last one is returned.
    pub async fn generate(
        &self,
        query: &str,
        contexts: &[String],
        citation_schema: &str,
    ) -> Result<(String, String), GenerationError> {
        let mut last = GenerationError::Empty;

        for generator in &self.generators {
            let outcome = tokio::time::timeout(
                self.timeout,
                generator.generate(query, contexts, citation_schema),
            )
            .await
            .unwrap_or(Err(GenerationError::Timeout(self.timeout)));

            match outcome {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("Answer produced by {}", generator.name());
                    return Ok((text.trim().to_string(), generator.name().to_string()));
                }
                Ok(_) => {
                    warn!("Generator {} returned blank text", generator.name());
                    last = GenerationError::Blank;
                }
                Err(e) => {
                    warn!("Generator {} failed: {}", generator.name(), e);
                    last = e;
                }
            }
        }

        Err(last)
    }
}

/// Offline generator that quotes the context sentences sharing the most words with the query.
#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    max_sentences: usize,
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self { max_sentences: 3 }
    }
}

fn word_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for word in text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        *counts.entry(word.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

/// Multiset intersection size of two word counts.
fn overlap(query: &HashMap<String, usize>, sentence: &HashMap<String, usize>) -> usize {
    query
        .iter()
        .filter_map(|(word, &q)| sentence.get(word).map(|&s| q.min(s)))
        .sum()
}

impl ExtractiveGenerator {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    /// Synchronous core of [`AnswerGenerator::generate`].
    pub fn extract(&self, query: &str, contexts: &[String]) -> String {
        let query_words = word_counts(query);

        let mut candidates: Vec<(usize, &str)> = contexts
            .iter()
            .flat_map(|context| split_sentences(context))
            .map(|sentence| (overlap(&query_words, &word_counts(sentence)), sentence))
            .collect();
        // Stable: equal scores keep context order.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        if candidates.is_empty() {
            return match contexts.first() {
                Some(first) => first.clone(),
                None => "I don't know.".to_string(),
            };
        }

        candidates
            .iter()
            .take(self.max_sentences)
            .map(|(_, sentence)| *sentence)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(
        &self,
        query: &str,
        contexts: &[String],
        _citation_schema: &str,
    ) -> Result<String, GenerationError> {
        Ok(self.extract(query, contexts))
    }
}
