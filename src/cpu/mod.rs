//! CPU fallback dot product: scalar, SIMD-256, and SIMD-512 kernels chosen
//! by a safe, idempotent runtime probe.
//!
//! Grounded on `dot16`/`dot32`/`dot64` and `avx2_init`/`avx512_init` in the
//! original `dot.c`: lazily probe each SIMD tier exactly once, then dispatch
//! by stride and element count.

#[cfg(target_arch = "x86_64")]
mod avx2;
#[cfg(target_arch = "x86_64")]
mod avx512;
mod scalar;

use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::half::HalfFloat;
use crate::Precision;

/// One typed CPU-resident vector, tagged by the precision it holds.
#[derive(Clone, Copy)]
pub enum CpuVector<'a> {
    F16(&'a [HalfFloat]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl CpuVector<'_> {
    fn precision(&self) -> Precision {
        match self {
            CpuVector::F16(_) => Precision::Fp16,
            CpuVector::F32(_) => Precision::Fp32,
            CpuVector::F64(_) => Precision::Fp64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TierAvailability {
    avx2: bool,
    avx512: bool,
}

static TIERS: OnceLock<TierAvailability> = OnceLock::new();

fn tiers() -> TierAvailability {
    *TIERS.get_or_init(probe_tiers)
}

/// Run the 16-element trial dot product for each tier under a fault guard.
///
/// `is_x86_feature_detected!` already prevents the unsafe intrinsic path
/// from running at all on hardware that doesn't report the feature bit, so
/// in the overwhelming majority of cases this never touches the unsafe code.
/// The `catch_unwind` guard exists for the documented edge case in spec §9:
/// some environments report a feature bit they cannot actually execute.
#[cfg(target_arch = "x86_64")]
fn probe_tiers() -> TierAvailability {
    let trial: Vec<f32> = (0..16).map(|i| i as f32 + 1.0).collect();

    let avx2_reported = std::is_x86_feature_detected!("avx2") && std::is_x86_feature_detected!("fma");
    let avx2 = probe_one("avx2+fma", avx2_reported, || unsafe { avx2::dot_f32(&trial, &trial) });

    let avx512_reported = std::is_x86_feature_detected!("avx512f");
    let avx512 = probe_one("avx512f", avx512_reported, || unsafe { avx512::dot_f32(&trial, &trial) });

    TierAvailability { avx2, avx512 }
}

#[cfg(not(target_arch = "x86_64"))]
fn probe_tiers() -> TierAvailability {
    TierAvailability::default()
}

fn probe_one(name: &str, reported: bool, trial: impl FnOnce() -> f32) -> bool {
    if !reported {
        log::debug!("cpu dot: {name} not reported by CPUID, skipping tier");
        return false;
    }
    match std::panic::catch_unwind(AssertUnwindSafe(trial)) {
        Ok(_) => true,
        Err(_) => {
            let err = Error::probe_fault(format!("{name} trial dot faulted"));
            log::warn!("{err}");
            false
        }
    }
}

/// Dispatch a dot product across CPU tiers.
///
/// `precision` must match the variant carried by `v0`/`v1`, and both
/// vectors must be long enough for `offset + (n-1)*stride` to stay in
/// bounds; either mismatch is a [`Error::ContractViolation`].
pub fn dot(
    precision: Precision,
    v0: CpuVector<'_>,
    stride0: usize,
    v1: CpuVector<'_>,
    stride1: usize,
    n: usize,
) -> Result<f64> {
    if v0.precision() != precision || v1.precision() != precision {
        return Err(Error::contract_violation("cpu dot: precision index does not match operand type"));
    }

    let unit_stride = stride0 == 1 && stride1 == 1;
    let t = tiers();

    match (v0, v1) {
        (CpuVector::F16(a), CpuVector::F16(b)) => Ok(scalar::dot_f16(a, stride0, b, stride1, n)),
        (CpuVector::F32(a), CpuVector::F32(b)) => {
            #[cfg(target_arch = "x86_64")]
            {
                if unit_stride && t.avx512 && n >= 16 {
                    return Ok(unsafe { avx512::dot_f32_n(a, b, n) });
                } else if unit_stride && t.avx2 && n >= 8 {
                    return Ok(unsafe { avx2::dot_f32_n(a, b, n) });
                }
            }
            Ok(scalar::dot_f32(a, stride0, b, stride1, n))
        }
        (CpuVector::F64(a), CpuVector::F64(b)) => {
            #[cfg(target_arch = "x86_64")]
            {
                if unit_stride && t.avx512 && n >= 8 {
                    return Ok(unsafe { avx512::dot_f64_n(a, b, n) });
                } else if unit_stride && t.avx2 && n >= 4 {
                    return Ok(unsafe { avx2::dot_f64_n(a, b, n) });
                }
            }
            Ok(scalar::dot_f64(a, stride0, b, stride1, n))
        }
        _ => Err(Error::contract_violation("cpu dot: v0/v1 precision mismatch")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_tiny_compact_dot() {
        let v0 = [1.0f32, 2.0, 3.0, 4.0, 5.0];
        let v1 = [5.0f32, 4.0, 3.0, 2.0, 1.0];
        let result = dot(Precision::Fp32, CpuVector::F32(&v0), 1, CpuVector::F32(&v1), 1, 5).unwrap();
        assert_eq!(result, 35.0);
    }

    #[test]
    fn strided_offset_dot() {
        let backing0 = [0.0f32, 0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0];
        let backing1 = [0.0f32, 4.0, 0.0, 0.0, 3.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        let v0 = &backing0[2..];
        let v1 = &backing1[1..];
        let result = dot(Precision::Fp32, CpuVector::F32(v0), 2, CpuVector::F32(v1), 3, 4).unwrap();
        assert_eq!(result, 20.0);
    }

    #[test]
    fn half_precision_integer_dot() {
        let v0: Vec<HalfFloat> = (1..=8).map(HalfFloat::from_u32).collect();
        let v1: Vec<HalfFloat> = (1..=8).rev().map(HalfFloat::from_u32).collect();
        let result = dot(Precision::Fp16, CpuVector::F16(&v0), 1, CpuVector::F16(&v1), 1, 8).unwrap();
        assert!((result - 120.0).abs() < 1e-3, "expected ~120, got {result}");
    }

    #[test]
    fn precision_mismatch_is_contract_violation() {
        let v0 = [1.0f32];
        let v1 = [1.0f64];
        let err = dot(Precision::Fp32, CpuVector::F32(&v0), 1, CpuVector::F64(&v1), 1, 1).unwrap_err();
        assert!(matches!(err, Error::ContractViolation { .. }));
    }

    #[test]
    fn tiers_agree_within_epsilon_when_both_available() {
        let t = tiers();
        if !t.avx2 && !t.avx512 {
            return;
        }
        let n = 1024usize;
        let v0: Vec<f32> = (0..n).map(|i| (i as f32).sin()).collect();
        let v1: Vec<f32> = (0..n).map(|i| (i as f32).cos()).collect();
        let scalar_result = scalar::dot_f32(&v0, 1, &v1, 1, n);
        let dispatched = dot(Precision::Fp32, CpuVector::F32(&v0), 1, CpuVector::F32(&v1), 1, n).unwrap();
        let eps = f32::EPSILON as f64 * n as f64;
        assert!((scalar_result - dispatched).abs() <= eps.max(1e-3));
    }
}
