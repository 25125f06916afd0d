//! SIMD-256 (AVX2 + FMA) dot-product kernels.
//!
//! Grounded on `avx2_dot_f32`/`avx2_dot_f64` in the original `dot.c`: lane
//! counts of 8 (fp32) and 4 (fp64), a cache-line prefetch per iteration for
//! both operands, fused multiply-add into an accumulator, horizontal sum,
//! and a scalar sweep for the remainder.
//!
//! Every entry point requires AVX2+FMA to already be confirmed available
//! (`is_x86_feature_detected!`) by the caller; these functions do not probe
//! themselves.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::scalar;

const LANES_F32: usize = 8;
const LANES_F64: usize = 4;

/// Trial entry point used by the tier probe: a single 16-element dot.
///
/// # Safety
/// Caller must have confirmed AVX2 + FMA support via `is_x86_feature_detected!`.
#[cfg(target_arch = "x86_64")]
pub unsafe fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    dot_f32_n(a, b, n) as f32
}

/// # Safety
/// Caller must have confirmed AVX2 + FMA support, both slices unit-stride
/// and at least `n` elements long.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn dot_f32_n(v0: &[f32], v1: &[f32], n: usize) -> f64 {
    let lanes = n - (n % LANES_F32);
    let mut acc = _mm256_setzero_ps();
    let mut i = 0;
    while i < lanes {
        if i + LANES_F32 < lanes {
            _mm_prefetch(v0.as_ptr().add(i + LANES_F32) as *const i8, _MM_HINT_T0);
            _mm_prefetch(v1.as_ptr().add(i + LANES_F32) as *const i8, _MM_HINT_T0);
        }
        let a = _mm256_loadu_ps(v0.as_ptr().add(i));
        let b = _mm256_loadu_ps(v1.as_ptr().add(i));
        acc = _mm256_fmadd_ps(a, b, acc);
        i += LANES_F32;
    }
    let mut lane_sums = [0f32; LANES_F32];
    _mm256_storeu_ps(lane_sums.as_mut_ptr(), acc);
    let mut sum: f32 = lane_sums.iter().sum();
    sum += scalar::dot_f32(&v0[lanes..n], 1, &v1[lanes..n], 1, n - lanes) as f32;
    sum as f64
}

/// # Safety
/// See [`dot_f32_n`].
#[cfg(target_arch = "x86_64")]
pub unsafe fn dot_f64(a: &[f64], b: &[f64]) -> f32 {
    let n = a.len().min(b.len());
    dot_f64_n(a, b, n) as f32
}

/// # Safety
/// See [`dot_f32_n`].
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn dot_f64_n(v0: &[f64], v1: &[f64], n: usize) -> f64 {
    let lanes = n - (n % LANES_F64);
    let mut acc = _mm256_setzero_pd();
    let mut i = 0;
    while i < lanes {
        if i + LANES_F64 < lanes {
            _mm_prefetch(v0.as_ptr().add(i + LANES_F64) as *const i8, _MM_HINT_T0);
            _mm_prefetch(v1.as_ptr().add(i + LANES_F64) as *const i8, _MM_HINT_T0);
        }
        let a = _mm256_loadu_pd(v0.as_ptr().add(i));
        let b = _mm256_loadu_pd(v1.as_ptr().add(i));
        acc = _mm256_fmadd_pd(a, b, acc);
        i += LANES_F64;
    }
    let mut lane_sums = [0f64; LANES_F64];
    _mm256_storeu_pd(lane_sums.as_mut_ptr(), acc);
    let mut sum: f64 = lane_sums.iter().sum();
    sum += scalar::dot_f64(&v0[lanes..n], 1, &v1[lanes..n], 1, n - lanes);
    sum
}
