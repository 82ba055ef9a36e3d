//! Batch similarity kernel: many-query/many-document cosine scoring with
//! CPU/accelerator backend selection.
//!
//! There is no GPU backend wired up in this crate (no accelerator crate is a
//! dependency), but the backend-selection policy from spec.md §4.2 is
//! implemented as pure data so a caller embedding this engine in a larger
//! system can act on the recommendation; [`select_backend`] always resolves
//! to [`Backend::Cpu`] when [`BackendAvailability::accelerator_available`]
//! is false.

use crate::vector::cosine;

/// Approximate row count above which the accelerator is preferred, absent
/// other constraints (spec.md §4.2).
pub const GPU_PREFERRED_THRESHOLD: usize = 20_000;

/// Which backend a batch similarity computation should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cpu,
    Accelerator,
}

/// Inputs to the backend auto-selection policy.
#[derive(Debug, Clone, Copy)]
pub struct BackendAvailability {
    pub accelerator_available: bool,
    /// Total corpus size before any caller-supplied filter narrows it.
    pub unfiltered_count: usize,
    /// Count remaining after an explicit metadata filter is applied, if any.
    pub filtered_count: Option<usize>,
    pub dimensions: usize,
}

/// Selects a backend per spec.md §4.2's decision table:
///
/// - unavailable accelerator -> CPU
/// - an explicit filter that reduces the candidate set -> CPU, unless the
///   remaining count is still at least 2x the GPU-preferred threshold
/// - unfiltered count < 5,000 -> CPU
/// - 5,000..10,000 -> CPU unless dimensions >= 1024
/// - >= 10,000 -> accelerator
pub fn select_backend(avail: BackendAvailability) -> Backend {
    if !avail.accelerator_available {
        return Backend::Cpu;
    }
    if let Some(filtered) = avail.filtered_count {
        if filtered < avail.unfiltered_count {
            return if filtered >= 2 * GPU_PREFERRED_THRESHOLD {
                Backend::Accelerator
            } else {
                Backend::Cpu
            };
        }
    }
    let n = avail.unfiltered_count;
    if n < 5_000 {
        Backend::Cpu
    } else if n < 10_000 {
        if avail.dimensions >= 1024 {
            Backend::Accelerator
        } else {
            Backend::Cpu
        }
    } else {
        Backend::Accelerator
    }
}

/// Estimated resident memory in bytes for `count` vectors of `dimensions`
/// `f32` components each (spec.md §4.2: `N * dims * 4`).
pub fn estimate_memory_bytes(count: usize, dimensions: usize) -> usize {
    count.saturating_mul(dimensions).saturating_mul(4)
}

/// Bytes above which a caller may want to batch the computation rather than
/// load everything at once, even though the accelerator is still preferred.
pub const MEMORY_BATCH_THRESHOLD_BYTES: usize = 500 * 1024 * 1024;

/// Cosine similarity of `query` against every row of `stored`, each row
/// having `dims` components. Rows with the wrong length score 0.0 rather
/// than panicking (consistent with [`crate::vector::cosine`]'s mismatch
/// handling).
pub fn batch_cosine(query: &[f32], stored: &[Vec<f32>], _dims: usize) -> Vec<f32> {
    stored.iter().map(|row| cosine(query, row)).collect()
}

/// Pairwise cosine similarity matrix between rows of `a` (M vectors) and
/// rows of `b` (N vectors), returned as M row-major vectors of length N.
pub fn pairwise_cosine(a: &[Vec<f32>], b: &[Vec<f32>], _dims: usize) -> Vec<Vec<f32>> {
    a.iter()
        .map(|row_a| b.iter().map(|row_b| cosine(row_a, row_b)).collect())
        .collect()
}

/// Maximum value in each row of a `rows x cols` matrix. Returns `f32::NEG_INFINITY`
/// for an empty row.
pub fn row_max(matrix: &[Vec<f32>], _rows: usize, _cols: usize) -> Vec<f32> {
    matrix
        .iter()
        .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
        .collect()
}

/// MMR scores: `lambda * relevance - (1 - lambda) * max_sim` per candidate.
pub fn mmr_scores(relevance: &[f32], max_sim: &[f32], lambda: f32) -> Vec<f32> {
    relevance
        .iter()
        .zip(max_sim.iter())
        .map(|(r, s)| lambda * r - (1.0 - lambda) * s)
        .collect()
}

/// Cosine similarity between each consecutive pair of vectors, producing
/// `N - 1` scores for `N` input vectors (0 for `N <= 1`).
pub fn adjacent_cosine(vectors: &[Vec<f32>], _dims: usize) -> Vec<f32> {
    if vectors.len() < 2 {
        return Vec::new();
    }
    vectors.windows(2).map(|w| cosine(&w[0], &w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_backend_unavailable_is_cpu() {
        let backend = select_backend(BackendAvailability {
            accelerator_available: false,
            unfiltered_count: 1_000_000,
            filtered_count: None,
            dimensions: 4096,
        });
        assert_eq!(backend, Backend::Cpu);
    }

    #[test]
    fn select_backend_small_corpus_is_cpu() {
        let backend = select_backend(BackendAvailability {
            accelerator_available: true,
            unfiltered_count: 4_000,
            filtered_count: None,
            dimensions: 128,
        });
        assert_eq!(backend, Backend::Cpu);
    }

    #[test]
    fn select_backend_mid_range_needs_high_dims() {
        let low_dim = select_backend(BackendAvailability {
            accelerator_available: true,
            unfiltered_count: 7_000,
            filtered_count: None,
            dimensions: 256,
        });
        assert_eq!(low_dim, Backend::Cpu);

        let high_dim = select_backend(BackendAvailability {
            accelerator_available: true,
            unfiltered_count: 7_000,
            filtered_count: None,
            dimensions: 1536,
        });
        assert_eq!(high_dim, Backend::Accelerator);
    }

    #[test]
    fn select_backend_large_corpus_is_accelerator() {
        let backend = select_backend(BackendAvailability {
            accelerator_available: true,
            unfiltered_count: 50_000,
            filtered_count: None,
            dimensions: 128,
        });
        assert_eq!(backend, Backend::Accelerator);
    }

    #[test]
    fn select_backend_filter_reduces_below_threshold_is_cpu() {
        let backend = select_backend(BackendAvailability {
            accelerator_available: true,
            unfiltered_count: 100_000,
            filtered_count: Some(1_000),
            dimensions: 128,
        });
        assert_eq!(backend, Backend::Cpu);
    }

    #[test]
    fn select_backend_filter_still_large_is_accelerator() {
        let backend = select_backend(BackendAvailability {
            accelerator_available: true,
            unfiltered_count: 200_000,
            filtered_count: Some(45_000),
            dimensions: 128,
        });
        assert_eq!(backend, Backend::Accelerator);
    }

    #[test]
    fn mmr_scores_lambda_one_is_pure_relevance() {
        let relevance = vec![0.9, 0.5];
        let max_sim = vec![0.8, 0.1];
        let scores = mmr_scores(&relevance, &max_sim, 1.0);
        assert!((scores[0] - 0.9).abs() < 1e-6);
        assert!((scores[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn adjacent_cosine_length() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let scores = adjacent_cosine(&vectors, 2);
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn adjacent_cosine_single_vector_is_empty() {
        let vectors = vec![vec![1.0, 0.0]];
        assert!(adjacent_cosine(&vectors, 2).is_empty());
    }
}
