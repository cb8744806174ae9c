//! Divider-free reciprocal of the softmax denominator.
//!
//! The seed is built directly from the bit fields: the exponent is reflected
//! around the bias and the complemented mantissa `mi` shapes a quadratic
//! `mi · (mi >> 1)` mantissa term. Two Newton-Raphson steps
//! `r ← r · (2 − r · d)` then bring the estimate below one bfloat16 ulp.

use half::bf16;
use tracing::debug;

use crate::codec::{self, FloatFields, EXPONENT_BIAS, MANTISSA_MASK};
use crate::error::{SoftexError, SoftexResult};

/// Newton-Raphson refinement steps applied to the seed.
pub const NEWTON_STEPS: usize = 2;

const F32_MANTISSA_MASK: u32 = 0x007F_FFFF;

/// Bit-level initial estimate of `1 / denominator` as a single-precision
/// pattern.
pub fn seed(denominator: f32) -> u32 {
    let bits = denominator.to_bits();
    let FloatFields { mantissa, exponent, .. } = codec::decompose(bits);
    let reflected = 2 * EXPONENT_BIAS as i32 - exponent as i32;

    if mantissa == 0 {
        return (reflected.max(0) as u32) << 23;
    }

    let inverted = !mantissa & MANTISSA_MASK;
    let exponent_term = ((reflected - 1).max(0) as u32) << 23;
    exponent_term + ((inverted * (inverted >> 1)) << 10)
}

/// Approximate `1 / denominator`, rounded to bfloat16.
///
/// Exact powers of two are reflected without refinement. The Newton steps
/// run in the 32-bit intermediate representation.
pub fn reciprocal(denominator: f32) -> SoftexResult<bf16> {
    if !denominator.is_finite() || denominator <= 0.0 {
        return Err(SoftexError::DegenerateDenominator(denominator));
    }

    let seed_bits = seed(denominator);
    if denominator.to_bits() & F32_MANTISSA_MASK == 0 {
        return Ok(bf16::from_f32(f32::from_bits(seed_bits)));
    }

    let mut estimate = f32::from_bits(seed_bits);
    debug!(denominator, seed = estimate, "reciprocal seed");
    // Refined in f32; only the final estimate is rounded to bfloat16.
    for _ in 0..NEWTON_STEPS {
        estimate *= 2.0 - estimate * denominator;
    }
    Ok(bf16::from_f32(estimate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powers_of_two_are_exact() {
        for k in -20..=20 {
            let d = (k as f32).exp2();
            assert_eq!(reciprocal(d).unwrap().to_f32(), 1.0 / d, "1/2^{k}");
        }
    }

    #[test]
    fn seed_for_one_and_a_half() {
        // mi = 63, mantissa term 63 * 31 << 10, exponent 126.
        assert_eq!(seed(1.5), (126 << 23) + (1953 << 10));
    }

    #[test]
    fn rejects_degenerate_denominators() {
        for d in [0.0, -0.0, -3.0, f32::INFINITY, f32::NAN] {
            assert!(matches!(reciprocal(d), Err(SoftexError::DegenerateDenominator(_))));
        }
    }

    #[test]
    fn one_and_a_half() {
        assert_eq!(reciprocal(1.5).unwrap(), bf16::from_f32(0.667_968_75));
    }
}
