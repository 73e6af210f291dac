//! quire-retriever: question answering over a document corpus
//!
//! This crate indexes a bulk file of documents into a dense embedding matrix,
//! keeps that index in sync with the data through content fingerprints, and
//! answers queries by retrieving the most similar passages and handing the
//! strongest of them to a generation strategy. A separate ingestion path
//! loads the same kind of file into a SQLite paper store.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: fingerprints, vector index, startup coordinator, retriever and selector
//! - **[`answer`]**: the answer pipeline and generation strategies
//! - **[`ingest`]**: bulk ingestion with batching and retry
//! - **[`storage`]**: the paper store trait and its SQLite implementation
//! - **[`records`]**: record file streaming and field alias mapping
//! - **[`config`]**: `quire.toml` loading
//! - **[`status`]**: index, fingerprint and store diagnostics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quire_retriever::answer::{AnswerService, generator::GeneratorChain};
//! use quire_retriever::retrieval::indexing_coordinator::{CoordinatorConfig, IndexingCoordinator};
//! use quire_retriever::retrieval::retriever::{RetrievalConfig, Retriever};
//! use quire_retriever::retrieval::selector::AdaptiveSelector;
//! use quire_embed::HashEmbedProvider;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let embedder = Arc::new(HashEmbedProvider::new(384)?);
//! let coordinator = IndexingCoordinator::new(
//!     CoordinatorConfig::new("data/papers.jsonl", "index"),
//!     embedder.clone(),
//! )?;
//! coordinator.startup().await?;
//!
//! let service = AnswerService::new(
//!     Retriever::new(coordinator.handle(), embedder, RetrievalConfig::default()),
//!     AdaptiveSelector::default(),
//!     GeneratorChain::extractive(3, Duration::from_secs(20)),
//! );
//! let answer = service.answer("What is a graph neural network?", 5).await;
//! println!("{}", answer.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! data file → MetadataStore → PassageMap → embeddings → VectorIndex ─┐
//!     ↑                                                             ↓
//! FingerprintTracker ← IndexingCoordinator         Retriever → AdaptiveSelector → generators
//!
//! data file → IngestionPipeline → PaperStore (SQLite) → Retriever::from_store
//! ```

pub mod answer;
pub mod config;
pub mod error;
pub mod ingest;
pub mod records;
pub mod retrieval;
pub mod status;
pub mod storage;

pub use error::{Result, RetrieverError, StoreError};
