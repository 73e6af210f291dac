//! # quire-embed
//!
//! Text embedding providers for the quire retrieval stack.
//!
//! ## Features
//!
//! - **Offline by default**: [`HashEmbedProvider`] produces deterministic, unit-length
//!   vectors without any model download or network access
//! - **Remote models**: [`OllamaProvider`] talks to an Ollama server; failures degrade
//!   to per-item empty vectors instead of errors
//! - **Hybrid**: [`FallbackProvider`] fills whatever the primary provider could not embed
//! - **Local ONNX models**: `FastEmbedProvider`, behind the `fastembed` cargo feature
//! - **Slot-tracked batching**: [`embed_in_slots`] maps every result back to its input
//!   position and retries only the missing slots
//!
//! ## Quick Start
//!
//! ```no_run
//! use quire_embed::{EmbedConfig, embed_in_slots};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EmbedConfig::hash(384);
//! let provider = config.build_provider().await?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let out = embed_in_slots(provider.as_ref(), &texts, 16, config.timeout()).await;
//! assert_eq!(out.failed(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Construction and configuration return [`Result<T>`] with [`EmbedError`].
//! Embedding calls signal per-item failure with an empty vector; see
//! [`EmbeddingProvider`].

pub mod batch;
pub mod config;
pub mod error;
pub mod fallback;
pub mod hash;
pub mod ollama;
pub mod provider;

// Re-export main types for easy access
pub use batch::{SlotEmbeddings, embed_in_slots, embed_one};
pub use config::{EmbedBackend, EmbedConfig, EmbedConfigBuilder};
pub use error::{EmbedError, Result};
pub use fallback::{FallbackProvider, ensure_dimension};
pub use hash::{HashEmbedProvider, hash_embedding, zero_embedding};
pub use ollama::OllamaProvider;
#[cfg(feature = "fastembed")]
pub use provider::FastEmbedProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, l2_normalize};
