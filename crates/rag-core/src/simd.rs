//! Vector operations with SIMD acceleration.
//!
//! Provides `dot` and `cosine` with automatic SIMD dispatch over dense,
//! contiguous `f32` vectors:
//! - AVX-512 on `x86_64` (runtime detection, Zen 5+ / Ice Lake+)
//! - AVX2+FMA on `x86_64` (runtime detection, fallback)
//! - NEON on `aarch64`
//! - Portable fallback otherwise
//!
//! # Performance Notes
//!
//! - Vectors shorter than 16 dimensions use portable code (SIMD overhead not worthwhile)
//! - Subnormal/denormalized floats (~< 1e-38) can cause 100x+ slowdowns in SIMD
//! - Unit-normalized embeddings avoid subnormal issues in practice

// Minimum vector dimension for SIMD to be worthwhile.
// Below this, function call overhead outweighs SIMD benefits.
const MIN_DIM_SIMD: usize = 16;

/// Threshold for treating a norm as "effectively zero" in cosine similarity.
///
/// Chosen to be larger than `f32::EPSILON` (~1.19e-7) to provide numerical
/// headroom while remaining small enough to only catch degenerate cases.
const NORM_EPSILON: f32 = 1e-9;

/// Dot product of two vectors.
///
/// Returns 0.0 for empty vectors.
///
/// # Performance
///
/// Automatically uses the fastest available SIMD instruction set:
/// - AVX-512: 16 floats per operation (Zen 5+, Ice Lake+)
/// - AVX2+FMA: 8 floats per operation (Haswell+, Zen 1+)
/// - NEON: 4 floats per operation (aarch64)
/// - Portable: scalar fallback
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());

    #[cfg(target_arch = "x86_64")]
    {
        // Try AVX-512 first (Zen 5+, Ice Lake+): 16 floats per operation
        if n >= MIN_DIM_SIMD && is_x86_feature_detected!("avx512f") {
            // SAFETY: AVX-512 verified via runtime detection.
            return unsafe { dot_avx512(a, b) };
        }
        // Fallback to AVX2+FMA: 8 floats per operation
        if n >= MIN_DIM_SIMD && is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
        {
            // SAFETY: We've verified AVX2 and FMA are available via runtime detection.
            return unsafe { dot_avx2(a, b) };
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        if n >= MIN_DIM_SIMD {
            // SAFETY: NEON is always available on aarch64.
            return unsafe { dot_neon(a, b) };
        }
    }
    #[allow(unreachable_code)]
    dot_portable(a, b)
}

/// L2 norm of a vector.
#[inline]
#[must_use]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine similarity between two vectors.
///
/// # Zero Vector Handling
///
/// Returns `0.0` if either vector has effectively-zero norm (< 1e-9).
/// This avoids division by zero and provides a sensible default for padding tokens,
/// OOV embeddings, or failed inference.
///
/// # Result Range
///
/// Result is in `[-1, 1]` for valid input, but floating-point error can push
/// slightly outside this range; clamp if strict bounds are required.
///
/// # Performance
///
/// For L2-normalized vectors (common in embeddings), cosine similarity equals
/// dot product, so prefer `dot()` directly when vectors are known to be normalized.
#[inline]
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let d = dot(a, b);
    let na = norm(a);
    let nb = norm(b);
    if na > NORM_EPSILON && nb > NORM_EPSILON {
        d / (na * nb)
    } else {
        0.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Portable fallback
// ─────────────────────────────────────────────────────────────────────────────

/// Portable dot product implementation (reference for SIMD versions).
///
/// This is the scalar fallback used when SIMD is not available or not beneficial.
/// Exposed for benchmarking purposes.
#[inline]
#[must_use]
pub fn dot_portable(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ─────────────────────────────────────────────────────────────────────────────
// AVX-512 (x86_64) - Zen 5+, Ice Lake+
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn dot_avx512(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::{
        __m256, __m512, _mm256_add_ps, _mm512_castps512_ps256, _mm512_extractf32x8_ps,
        _mm512_fmadd_ps, _mm512_loadu_ps, _mm512_setzero_ps,
    };

    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let chunks = n / 16;
    let remainder = n % 16;

    let mut sum: __m512 = _mm512_setzero_ps();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    // SAFETY: We use `_mm512_loadu_ps` (unaligned load) so no alignment required.
    // Pointer arithmetic: offset = i*16 < chunks*16 <= n, so a_ptr.add(offset)
    // stays within [a.as_ptr(), a.as_ptr() + n), same for b.
    for i in 0..chunks {
        let offset = i * 16;
        let va = _mm512_loadu_ps(a_ptr.add(offset));
        let vb = _mm512_loadu_ps(b_ptr.add(offset));
        sum = _mm512_fmadd_ps(va, vb, sum);
    }

    // Horizontal sum: reduce 16 f32s to 1
    // Extract upper and lower 256-bit halves, add them, then reduce the 256-bit result
    let sum256_lo: __m256 = _mm512_castps512_ps256(sum);
    let sum256_hi: __m256 = _mm512_extractf32x8_ps::<1>(sum);
    let sum256: __m256 = _mm256_add_ps(sum256_lo, sum256_hi);

    // Reduce 256-bit (8 floats) to scalar using same method as AVX2
    use std::arch::x86_64::{
        _mm256_castps256_ps128, _mm256_extractf128_ps, _mm_add_ps, _mm_add_ss, _mm_cvtss_f32,
        _mm_movehl_ps, _mm_shuffle_ps,
    };
    let hi = _mm256_extractf128_ps(sum256, 1);
    let lo = _mm256_castps256_ps128(sum256);
    let sum128 = _mm_add_ps(lo, hi);
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));
    let mut result = _mm_cvtss_f32(sum32);

    // Handle remainder with scalar ops
    let tail_start = chunks * 16;
    for i in 0..remainder {
        // SAFETY: tail_start + i < n, so within bounds
        result += *a.get_unchecked(tail_start + i) * *b.get_unchecked(tail_start + i);
    }

    result
}

// ─────────────────────────────────────────────────────────────────────────────
// AVX2 + FMA (x86_64)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::{
        __m256, _mm256_castps256_ps128, _mm256_extractf128_ps, _mm256_fmadd_ps, _mm256_loadu_ps,
        _mm256_setzero_ps, _mm_add_ps, _mm_add_ss, _mm_cvtss_f32, _mm_movehl_ps, _mm_shuffle_ps,
    };

    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let chunks = n / 8;
    let remainder = n % 8;

    let mut sum: __m256 = _mm256_setzero_ps();

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    // SAFETY: We use `_mm256_loadu_ps` (unaligned load) so no alignment required.
    // Pointer arithmetic: offset = i*8 < chunks*8 <= n, so a_ptr.add(offset)
    // stays within [a.as_ptr(), a.as_ptr() + n), same for b.
    for i in 0..chunks {
        let offset = i * 8;
        let va = _mm256_loadu_ps(a_ptr.add(offset));
        let vb = _mm256_loadu_ps(b_ptr.add(offset));
        sum = _mm256_fmadd_ps(va, vb, sum);
    }

    // Horizontal sum: reduce 8 f32s to 1
    let hi = _mm256_extractf128_ps(sum, 1);
    let lo = _mm256_castps256_ps128(sum);
    let sum128 = _mm_add_ps(lo, hi);
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 1));
    let mut result = _mm_cvtss_f32(sum32);

    // Handle remainder with scalar ops
    let tail_start = chunks * 8;
    for i in 0..remainder {
        // SAFETY: tail_start + i < n, so within bounds
        result += *a.get_unchecked(tail_start + i) * *b.get_unchecked(tail_start + i);
    }

    result
}

// ─────────────────────────────────────────────────────────────────────────────
// NEON (aarch64)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::aarch64::{float32x4_t, vaddvq_f32, vdupq_n_f32, vfmaq_f32, vld1q_f32};

    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let chunks = n / 4;
    let remainder = n % 4;

    let mut sum: float32x4_t = vdupq_n_f32(0.0);

    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    // SAFETY: `vld1q_f32` is an unaligned load, no alignment required.
    // Pointer arithmetic: offset = i*4 < chunks*4 <= n, so within bounds.
    for i in 0..chunks {
        let offset = i * 4;
        let va = vld1q_f32(a_ptr.add(offset));
        let vb = vld1q_f32(b_ptr.add(offset));
        sum = vfmaq_f32(sum, va, vb);
    }

    // Horizontal sum: reduce 4 f32s to 1
    let mut result = vaddvq_f32(sum);

    // Handle remainder with scalar ops
    let tail_start = chunks * 4;
    for i in 0..remainder {
        // SAFETY: tail_start + i < n, so within bounds
        result += *a.get_unchecked(tail_start + i) * *b.get_unchecked(tail_start + i);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_basic() {
        assert!((dot(&[1.0, 2.0], &[3.0, 4.0]) - 11.0).abs() < 1e-5);
    }

    #[test]
    fn test_dot_empty() {
        assert_eq!(dot(&[], &[]), 0.0);
    }

    #[test]
    fn test_dot_simd_vs_portable() {
        // Test various lengths around SIMD boundaries
        for len in [0, 1, 3, 4, 5, 7, 8, 9, 15, 16, 17, 31, 32, 33, 64, 128, 256, 512, 1024] {
            let a: Vec<f32> = (0..len).map(|i| (i as f32) * 0.1).collect();
            let b: Vec<f32> = (0..len).map(|i| (i as f32) * 0.2 + 1.0).collect();

            let portable = dot_portable(&a, &b);
            let simd = dot(&a, &b);

            // Use relative tolerance for larger values
            let tolerance = (portable.abs() * 1e-5).max(1e-5);
            assert!(
                (portable - simd).abs() < tolerance,
                "Mismatch at len={}: portable={}, simd={}, diff={}",
                len,
                portable,
                simd,
                (portable - simd).abs()
            );
        }
    }

    #[test]
    fn test_cosine_basic() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-5);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_zero_norm() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_norm_basic() {
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-5);
        assert!((norm(&[1.0, 0.0]) - 1.0).abs() < 1e-5);
        assert_eq!(norm(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_normalized_equals_dot() {
        // For normalized vectors, cosine = dot product
        let a = [0.707, 0.707];
        let b = [1.0, 0.0];
        let cosine_score = cosine(&a, &b);
        let dot_score = dot(&a, &b);
        assert!((cosine_score - dot_score).abs() < 1e-3);
    }
}
