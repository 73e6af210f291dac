//! Exact cosine-similarity search over a dense, normalized matrix.
//!
//! Rows are L2-normalized once at build time, so a query only needs to be
//! normalized and dotted against every row. Top-k selection is partial
//! (`select_nth_unstable_by`) and only the selected k rows are sorted.
//!
//! The matrix sits behind an [`ArcSwapOption`]: `build` and `load` construct a
//! complete new matrix and swap it in, so concurrent searches always see
//! either the old matrix or the new one.
//!
//! On disk an index is two files: the raw little-endian `f32` matrix in
//! row-major order at `path`, and `{rows, dim}` at `<path>.meta.json`.

use crate::error::{Result, RetrieverError};
use crate::retrieval::fingerprint::write_atomic;
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Shape of a persisted matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixMeta {
    pub rows: usize,
    pub dim: usize,
}

#[derive(Debug)]
struct Matrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl Matrix {
    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// Path of the metadata sidecar for a matrix stored at `path`.
pub fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vec![0.0; vector.len()]
    }
}

/// Descending score, then ascending row index. `0.0` and `-0.0` tie.
fn rank(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    if a.1 == b.1 {
        a.0.cmp(&b.0)
    } else {
        b.1.total_cmp(&a.1)
    }
}

/// Selects the `k` best `(row, score)` pairs, sorted by [`rank`].
pub(crate) fn top_k(mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    if k == 0 || scored.is_empty() {
        return Vec::new();
    }
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, rank);
        scored.truncate(k);
    }
    scored.sort_by(rank);
    scored
}

/// Dense cosine-similarity index.
#[derive(Debug, Default)]
pub struct VectorIndex {
    matrix: ArcSwapOption<Matrix>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `build` or `load` has completed.
    pub fn is_ready(&self) -> bool {
        self.matrix.load().is_some()
    }

    /// Number of rows, or 0 before the index is ready.
    pub fn rows(&self) -> usize {
        self.matrix.load().as_ref().map(|m| m.rows).unwrap_or(0)
    }

    /// Vector dimension, or 0 before the index is ready or when it is empty.
    pub fn dim(&self) -> usize {
        self.matrix.load().as_ref().map(|m| m.dim).unwrap_or(0)
    }

    /// Normalizes `vectors` and replaces the current matrix.
    ///
    /// All vectors must share one dimension. Zero vectors stay zero.
    pub fn build(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(vectors.len() * dim);
        for vector in vectors {
            if vector.len() != dim {
                return Err(RetrieverError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            data.extend(normalized(vector));
        }

        self.matrix.store(Some(Arc::new(Matrix {
            rows: vectors.len(),
            dim,
            data,
        })));
        debug!("Built index with {} rows of dimension {}", vectors.len(), dim);
        Ok(())
    }

    /// The `k` rows most similar to `query`, as `(row, cosine)` sorted by descending score.
    ///
    /// Equal scores are ordered by ascending row index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        let guard = self.matrix.load();
        let matrix = guard.as_ref().ok_or_else(|| {
            RetrieverError::IndexNotReady("search called before build or load".to_string())
        })?;

        if matrix.rows == 0 {
            return Ok(Vec::new());
        }
        if query.len() != matrix.dim {
            return Err(RetrieverError::DimensionMismatch {
                expected: matrix.dim,
                actual: query.len(),
            });
        }

        let query = normalized(query);
        let scored: Vec<(usize, f32)> = (0..matrix.rows)
            .map(|i| {
                let score = matrix
                    .row(i)
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                (i, score)
            })
            .collect();

        Ok(top_k(scored, k))
    }

    /// Writes the matrix and its metadata sidecar.
    pub fn save(&self, path: &Path) -> Result<()> {
        let guard = self.matrix.load();
        let matrix = guard.as_ref().ok_or_else(|| {
            RetrieverError::IndexNotReady("nothing to save before build or load".to_string())
        })?;

        write_atomic(path, bytemuck::cast_slice(&matrix.data))?;
        let meta = MatrixMeta {
            rows: matrix.rows,
            dim: matrix.dim,
        };
        write_atomic(&meta_path(path), &serde_json::to_vec(&meta)?)?;
        info!(
            "Saved index ({} x {}) to {}",
            matrix.rows,
            matrix.dim,
            path.display()
        );
        Ok(())
    }

    /// Restores a matrix written by [`VectorIndex::save`], without renormalizing.
    pub fn load(&self, path: &Path) -> Result<()> {
        let meta_file = meta_path(path);
        let meta_raw = std::fs::read(&meta_file).map_err(|e| RetrieverError::from_io(&meta_file, e))?;
        let meta: MatrixMeta =
            serde_json::from_slice(&meta_raw).map_err(|e| RetrieverError::CorruptArtifact {
                path: meta_file.clone(),
                reason: e.to_string(),
            })?;

        let bytes = std::fs::read(path).map_err(|e| RetrieverError::from_io(path, e))?;
        let expected = meta.rows * meta.dim * std::mem::size_of::<f32>();
        if bytes.len() != expected {
            return Err(RetrieverError::CorruptArtifact {
                path: path.to_path_buf(),
                reason: format!(
                    "expected {} bytes for {} x {}, found {}",
                    expected,
                    meta.rows,
                    meta.dim,
                    bytes.len()
                ),
            });
        }

        let data: Vec<f32> = bytes
            .chunks_exact(std::mem::size_of::<f32>())
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        self.matrix.store(Some(Arc::new(Matrix {
            rows: meta.rows,
            dim: meta.dim,
            data,
        })));
        info!(
            "Loaded index ({} x {}) from {}",
            meta.rows,
            meta.dim,
            path.display()
        );
        Ok(())
    }
}

/// Reads only the metadata sidecar of a persisted matrix.
pub fn read_meta(path: &Path) -> Option<MatrixMeta> {
    let raw = std::fs::read(meta_path(path)).ok()?;
    serde_json::from_slice(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-5, "{a} != {b}");
    }

    fn sample() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![1.0, 1.0, 0.0],
            vec![0.0, 0.0, -3.0],
            vec![3.0, 0.1, 0.0],
        ]
    }

    #[test]
    fn test_search_before_build_is_not_ready() {
        let index = VectorIndex::new();
        assert!(!index.is_ready());
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(RetrieverError::IndexNotReady(_))
        ));
        assert!(index.save(Path::new("unused.bin")).is_err());
    }

    #[test]
    fn test_search_returns_k_sorted() -> anyhow::Result<()> {
        let index = VectorIndex::new();
        index.build(&sample())?;

        for k in 1..=5 {
            let hits = index.search(&[1.0, 0.5, 0.0], k)?;
            assert_eq!(hits.len(), k);
            assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
        }
        assert_eq!(index.search(&[1.0, 0.5, 0.0], 50)?.len(), 5);
        assert!(index.search(&[1.0, 0.5, 0.0], 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_identical_query_scores_one() -> anyhow::Result<()> {
        let index = VectorIndex::new();
        index.build(&sample())?;

        let hits = index.search(&[0.0, 2.0, 0.0], 2)?;
        assert_eq!(hits[0].0, 1);
        assert_close(hits[0].1, 1.0);

        let hits = index.search(&[0.0, 0.0, -0.5], 1)?;
        assert_eq!(hits[0].0, 3);
        assert_close(hits[0].1, 1.0);
        Ok(())
    }

    #[test]
    fn test_ties_break_on_row_index() -> anyhow::Result<()> {
        let index = VectorIndex::new();
        index.build(&[
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
        ])?;

        let rows: Vec<usize> = index.search(&[1.0, 0.0], 2)?.iter().map(|h| h.0).collect();
        assert_eq!(rows, vec![1, 3]);
        let rows: Vec<usize> = index.search(&[1.0, 0.0], 5)?.iter().map(|h| h.0).collect();
        assert_eq!(rows, vec![1, 3, 4, 0, 2]);
        Ok(())
    }

    #[test]
    fn test_zero_vectors_stay_zero() -> anyhow::Result<()> {
        let index = VectorIndex::new();
        index.build(&[vec![0.0, 0.0], vec![0.0, 5.0]])?;

        let hits = index.search(&[0.0, 1.0], 2)?;
        assert_eq!(hits[0].0, 1);
        assert_close(hits[1].1, 0.0);
        assert!(hits.iter().all(|h| h.1.is_finite()));

        let zero_query = index.search(&[0.0, 0.0], 2)?;
        assert!(zero_query.iter().all(|h| h.1 == 0.0));
        Ok(())
    }

    #[test]
    fn test_dimension_checks() -> anyhow::Result<()> {
        let index = VectorIndex::new();
        assert!(matches!(
            index.build(&[vec![1.0, 0.0], vec![1.0]]),
            Err(RetrieverError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(!index.is_ready());

        index.build(&[vec![1.0, 0.0]])?;
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_err());
        Ok(())
    }

    #[test]
    fn test_empty_build_is_ready() -> anyhow::Result<()> {
        let index = VectorIndex::new();
        index.build(&[])?;
        assert!(index.is_ready());
        assert!(index.search(&[1.0, 2.0], 3)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_and_load_preserve_matrix() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.bin");

        let built = VectorIndex::new();
        built.build(&sample())?;
        built.save(&path)?;
        assert_eq!(read_meta(&path), Some(MatrixMeta { rows: 5, dim: 3 }));

        let loaded = VectorIndex::new();
        loaded.load(&path)?;
        assert_eq!(loaded.rows(), 5);
        assert_eq!(loaded.dim(), 3);
        assert_eq!(
            built.search(&[0.3, 0.2, 0.1], 5)?,
            loaded.search(&[0.3, 0.2, 0.1], 5)?
        );
        Ok(())
    }

    #[test]
    fn test_load_rejects_truncated_matrix() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("index.bin");
        let index = VectorIndex::new();
        index.build(&sample())?;
        index.save(&path)?;

        let bytes = std::fs::read(&path)?;
        std::fs::write(&path, &bytes[..bytes.len() - 4])?;
        assert!(matches!(
            VectorIndex::new().load(&path),
            Err(RetrieverError::CorruptArtifact { .. })
        ));
        assert!(matches!(
            VectorIndex::new().load(&dir.path().join("missing.bin")),
            Err(RetrieverError::NotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_rebuild_swaps_matrix() -> anyhow::Result<()> {
        let index = VectorIndex::new();
        index.build(&[vec![1.0, 0.0]])?;
        index.build(&[vec![0.0, 1.0], vec![1.0, 0.0]])?;
        assert_eq!(index.rows(), 2);
        assert_eq!(index.search(&[1.0, 0.0], 1)?[0].0, 1);
        Ok(())
    }
}
