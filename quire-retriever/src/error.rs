//! Error types for quire-retriever

use quire_embed::EmbedError;
use std::path::PathBuf;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, RetrieverError>;

/// Errors raised by the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Any error reported by the SQL driver
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The pool was closed before the operation could check out a connection
    #[error("store connection is closed")]
    ConnectionClosed,

    /// An embedding did not match the store's fixed vector dimension
    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Error taxonomy for indexing, retrieval and ingestion.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// A data file or index artifact does not exist
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The configuration cannot be used (for example a zero embedding dimension)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The embedding provider returned nothing usable for an item
    #[error("embedding failed: {0}")]
    SoftEmbeddingFailure(String),

    /// A search was attempted before the index was built or loaded
    #[error("index is not ready: {0}")]
    IndexNotReady(String),

    /// Vectors of different dimensions were mixed
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A persisted index artifact is inconsistent with its metadata
    #[error("corrupt index artifact {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    /// A store error that is expected to clear up on retry
    #[error("transient store error: {0}")]
    TransientStore(#[source] StoreError),

    /// A store error that retrying will not fix
    #[error("store error: {0}")]
    FatalStore(#[source] StoreError),

    /// An ingestion record that could not be parsed or mapped
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// Every retry attempt failed with a transient error
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RetrieverError>,
    },

    /// Unclassified store error
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RetrieverError {
    /// Map an I/O error on `path` to [`RetrieverError::NotFound`] when the file is missing.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path: path.into() }
        } else {
            Self::Io(err)
        }
    }

    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig(message.into())
    }
}
