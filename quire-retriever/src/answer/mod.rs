//! The answer pipeline: retrieve, select, generate, fall back.
//!
//! [`AnswerService::answer`] never returns an error. Every failure mode is
//! reported through [`AnswerStatus`] with a fixed user-facing text.

pub mod generator;

use crate::error::RetrieverError;
use crate::retrieval::retriever::{Hit, Retriever};
use crate::retrieval::selector::AdaptiveSelector;
use generator::GeneratorChain;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info, warn};

pub use generator::{AnswerGenerator, ExtractiveGenerator, GenerationError};

/// Returned when generation fails or produces nothing.
pub const FALLBACK_ANSWER: &str = "I don't know based on the provided context.";
/// Returned while the index is still being built.
pub const NOT_READY_ANSWER: &str = "The index is still building. Please try again shortly.";
/// Returned when retrieval finds nothing.
pub const NO_RESULTS_ANSWER: &str = "No relevant documents were found for this query.";
/// Returned for a blank query.
pub const EMPTY_QUERY_ANSWER: &str = "Query must not be empty.";
/// Returned when the retrieval backend itself failed.
pub const UNAVAILABLE_ANSWER: &str = "The search backend is currently unavailable.";

const CITATION_SCHEMA: &str = "doc_id + title";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    NoResults,
    NotReady,
    Fallback,
    Unavailable,
    InvalidQuery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub doc_id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    /// One entry per cited document, in hit order
    pub citations: Vec<Citation>,
    /// The passages handed to the generator
    pub contexts: Vec<String>,
    pub status: AnswerStatus,
    /// Name of the strategy that produced `text`, if any did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
}

impl Answer {
    fn without_context(text: &str, status: AnswerStatus) -> Self {
        Self {
            text: text.to_string(),
            citations: Vec::new(),
            contexts: Vec::new(),
            status,
            generator: None,
        }
    }
}

/// Citations for `hits`, keeping the first hit of each document.
pub fn dedup_citations(hits: &[Hit]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|h| seen.insert(h.doc_id.as_str()))
        .map(|h| Citation {
            doc_id: h.doc_id.clone(),
            title: h.title.clone(),
        })
        .collect()
}

pub struct AnswerService {
    retriever: Retriever,
    selector: AdaptiveSelector,
    generators: GeneratorChain,
}

impl AnswerService {
    pub fn new(retriever: Retriever, selector: AdaptiveSelector, generators: GeneratorChain) -> Self {
        Self {
            retriever,
            selector,
            generators,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn answer(&self, query: &str, k: usize) -> Answer {
        if query.trim().is_empty() {
            return Answer::without_context(EMPTY_QUERY_ANSWER, AnswerStatus::InvalidQuery);
        }

        let result = match self.retriever.retrieve(query, k).await {
            Ok(result) => result,
            Err(RetrieverError::IndexNotReady(reason)) => {
                warn!("Answer requested before the index is ready: {}", reason);
                return Answer::without_context(NOT_READY_ANSWER, AnswerStatus::NotReady);
            }
            Err(e) => {
                error!("Retrieval failed: {}", e);
                return Answer::without_context(UNAVAILABLE_ANSWER, AnswerStatus::Unavailable);
            }
        };

        if result.is_empty() {
            info!("No hits for query; skipping generation");
            return Answer::without_context(NO_RESULTS_ANSWER, AnswerStatus::NoResults);
        }

        let chosen = self.selector.select_strong(result.hits());
        let contexts: Vec<String> = chosen.iter().map(|h| h.chunk.clone()).collect();
        let citations = dedup_citations(&chosen);

        match self
            .generators
            .generate(query, &contexts, CITATION_SCHEMA)
            .await
        {
            Ok((text, name)) => Answer {
                text,
                citations,
                contexts,
                status: AnswerStatus::Answered,
                generator: Some(name),
            },
            Err(e) => {
                warn!("All generators failed ({}); using fallback answer", e);
                Answer {
                    text: FALLBACK_ANSWER.to_string(),
                    citations,
                    contexts,
                    status: AnswerStatus::Fallback,
                    generator: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Document;
    use crate::retrieval::indexing_coordinator::{Corpus, CorpusHandle};
    use crate::retrieval::metadata_store::MetadataStore;
    use crate::retrieval::passages::{PassageMap, PassageRef};
    use crate::retrieval::retriever::RetrievalConfig;
    use crate::retrieval::vector_index::VectorIndex;
    use async_trait::async_trait;
    use quire_embed::{EmbeddingProvider, HashEmbedProvider};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn hit(id: &str, score: f32) -> Hit {
        Hit {
            doc_id: id.into(),
            title: format!("Title {id}"),
            score,
            chunk: format!("chunk of {id}"),
        }
    }

    #[test]
    fn test_citations_are_deduplicated_in_hit_order() {
        let citations = dedup_citations(&[hit("b", 0.9), hit("a", 0.8), hit("b", 0.7)]);
        let ids: Vec<&str> = citations.iter().map(|c| c.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    /// Two passages of one document plus a second document.
    async fn ready_handle(embedder: &HashEmbedProvider) -> CorpusHandle {
        let documents = MetadataStore::from_documents(vec![
            Document {
                doc_id: "cats".into(),
                title: "On Cats".into(),
                text: "Cats purr when content. Cats sleep a lot.".into(),
            },
            Document {
                doc_id: "dogs".into(),
                title: "On Dogs".into(),
                text: "Dogs bark at strangers.".into(),
            },
        ]);
        let passages = PassageMap::from_entries(vec![
            PassageRef { doc: 0, start: 0, end: 23 },
            PassageRef { doc: 0, start: 24, end: 41 },
            PassageRef { doc: 1, start: 0, end: 23 },
        ]);
        let mut vectors = Vec::new();
        for text in passages.texts(&documents) {
            vectors.push(embedder.embed_text(&text).await.unwrap());
        }
        let index = VectorIndex::new();
        index.build(&vectors).unwrap();

        let handle = CorpusHandle::new();
        handle.publish(Corpus {
            documents,
            passages,
            index,
        });
        handle
    }

    fn service(handle: CorpusHandle, generators: GeneratorChain) -> AnswerService {
        let embedder = Arc::new(HashEmbedProvider::new(32).unwrap());
        AnswerService::new(
            Retriever::new(handle, embedder, RetrievalConfig::default()),
            AdaptiveSelector::default(),
            generators,
        )
    }

    #[tokio::test]
    async fn test_answer_cites_each_document_once() -> anyhow::Result<()> {
        let embedder = HashEmbedProvider::new(32)?;
        let handle = ready_handle(&embedder).await;
        let service = service(handle, GeneratorChain::extractive(3, Duration::from_secs(1)));

        let answer = service.answer("Cats purr when content.", 5).await;
        assert_eq!(answer.status, AnswerStatus::Answered);
        assert_eq!(answer.citations[0].doc_id, "cats");
        let cats = answer.citations.iter().filter(|c| c.doc_id == "cats").count();
        assert_eq!(cats, 1);
        assert!(answer.text.contains("Cats purr when content."));
        assert_eq!(answer.contexts[0], "Cats purr when content.");
        assert_eq!(answer.generator.as_deref(), Some("extractive"));
        Ok(())
    }

    #[tokio::test]
    async fn test_not_ready_and_blank_query() {
        let service = service(
            CorpusHandle::new(),
            GeneratorChain::extractive(3, Duration::from_secs(1)),
        );

        let answer = service.answer("anything", 5).await;
        assert_eq!(answer.status, AnswerStatus::NotReady);
        assert_eq!(answer.text, NOT_READY_ANSWER);
        assert!(answer.citations.is_empty());

        let answer = service.answer("   ", 5).await;
        assert_eq!(answer.status, AnswerStatus::InvalidQuery);
    }

    #[tokio::test]
    async fn test_empty_corpus_short_circuits() -> anyhow::Result<()> {
        let handle = CorpusHandle::new();
        let index = VectorIndex::new();
        index.build(&[])?;
        handle.publish(Corpus {
            documents: MetadataStore::from_documents(Vec::new()),
            passages: PassageMap::default(),
            index,
        });

        struct Panicking;
        #[async_trait]
        impl AnswerGenerator for Panicking {
            fn name(&self) -> &str {
                "panicking"
            }
            async fn generate(&self, _: &str, _: &[String], _: &str) -> Result<String, GenerationError> {
                panic!("generation must not run without hits");
            }
        }

        let service = service(
            handle,
            GeneratorChain::new(vec![Arc::new(Panicking)], Duration::from_secs(1)),
        );
        let answer = service.answer("query", 5).await;
        assert_eq!(answer.status, AnswerStatus::NoResults);
        Ok(())
    }

    struct Blank;

    #[async_trait]
    impl AnswerGenerator for Blank {
        fn name(&self) -> &str {
            "blank"
        }

        async fn generate(&self, _: &str, _: &[String], _: &str) -> Result<String, GenerationError> {
            Ok("  \n".into())
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_blank_generation_uses_fallback() -> anyhow::Result<()> {
        let embedder = HashEmbedProvider::new(32)?;
        let handle = ready_handle(&embedder).await;
        let service = service(
            handle,
            GeneratorChain::new(vec![Arc::new(Blank)], Duration::from_secs(1)),
        );

        let answer = service.answer("dogs", 5).await;
        assert_eq!(answer.status, AnswerStatus::Fallback);
        assert_eq!(answer.text, FALLBACK_ANSWER);
        assert!(!answer.citations.is_empty());
        assert!(logs_contain("using fallback answer"));
        Ok(())
    }
}
