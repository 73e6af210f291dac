//! Content + configuration fingerprints for cache invalidation.
//!
//! A fingerprint is a blake3 hash over the data file's content hash and the
//! embedder configuration. If either changes, the fingerprint changes and the
//! persisted index is considered stale. The last fingerprint an index was
//! built for lives in a small JSON sidecar: `{"fingerprint": "<hex>"}`.

use crate::error::{Result, RetrieverError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Embedding settings that affect the contents of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderSignature {
    /// Provider-qualified model identifier, e.g. `ollama:nomic-embed-text:latest`
    pub model_id: String,
    pub dimension: usize,
    /// Passage budget in bytes (0 = no splitting)
    pub max_passage_len: usize,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    content: &'a str,
    embedder: &'a EmbedderSignature,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    fingerprint: String,
}

/// Streams `path` through blake3 and returns the hex digest.
pub fn content_hash(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| RetrieverError::from_io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 1 << 16];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Computes and persists index fingerprints.
#[derive(Debug, Clone)]
pub struct FingerprintTracker {
    sidecar_path: PathBuf,
    signature: EmbedderSignature,
}

impl FingerprintTracker {
    pub fn new(sidecar_path: impl Into<PathBuf>, signature: EmbedderSignature) -> Self {
        Self {
            sidecar_path: sidecar_path.into(),
            signature,
        }
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar_path
    }

    pub fn signature(&self) -> &EmbedderSignature {
        &self.signature
    }

    /// Fingerprint of `data_path` under this tracker's embedder configuration.
    pub fn fingerprint(&self, data_path: &Path) -> Result<String> {
        let content = content_hash(data_path)?;
        let input = serde_json::to_vec(&FingerprintInput {
            content: &content,
            embedder: &self.signature,
        })?;
        Ok(hex::encode(blake3::hash(&input).as_bytes()))
    }

    /// The fingerprint recorded by the last successful build, if any.
    ///
    /// A missing, unreadable or corrupt sidecar reads as `None`.
    pub fn read_last(&self) -> Option<String> {
        let raw = match std::fs::read(&self.sidecar_path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(
                    "No fingerprint sidecar at {}: {}",
                    self.sidecar_path.display(),
                    e
                );
                return None;
            }
        };
        match serde_json::from_slice::<Sidecar>(&raw) {
            Ok(sidecar) if !sidecar.fingerprint.trim().is_empty() => Some(sidecar.fingerprint),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "Ignoring corrupt fingerprint sidecar {}: {}",
                    self.sidecar_path.display(),
                    e
                );
                None
            }
        }
    }

    /// Atomically replaces the sidecar with `fingerprint`.
    pub fn write(&self, fingerprint: &str) -> Result<()> {
        let body = serde_json::to_vec(&Sidecar {
            fingerprint: fingerprint.to_string(),
        })?;
        write_atomic(&self.sidecar_path, &body)
    }

    /// Removes the sidecar so that no fingerprint matches until the next [`write`](Self::write).
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.sidecar_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RetrieverError::from_io(&self.sidecar_path, e)),
        }
    }
}

/// Writes `bytes` to a temporary file next to `path`, then renames it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RetrieverError::Io(e.error))?;
    Ok(())
}
