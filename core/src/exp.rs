//! Integer-only exponential approximation on the bfloat16 encoding.
//!
//! `exp(x)` is evaluated as `2^(x · log2 e)`:
//!
//! ```text
//! x ──decompose──► (s, m, e)
//!      (128 + m) · a  >> / << |e − 127|     a = round(log2(e) · 2^scale_fraction)
//!      round on the first dropped bit, negate if s
//!      ──► integer part → exponent, 7 fractional bits → mantissa
//!      ──► mantissa correction (two linear segments of 2^m − 1)
//! ```
//!
//! Results whose exponent field leaves `1..=254` clamp to `+0`.

use half::bf16;

use crate::codec::{self, FloatBits, FloatFields, EXPONENT_BIAS, EXPONENT_MAX, MANTISSA_BITS, MANTISSA_MASK};
use crate::coefficients::ApproxExpCoefficients;
use crate::error::SoftexResult;

/// Shifts at or beyond this width always saturate the exponent field.
const SATURATING_SHIFT: u32 = 32;

/// Corrected 7-bit mantissa of `2^(m / 128)` for a mantissa field `m`.
///
/// Shared by the approximator and the offline calibration search. The
/// result is not masked: out-of-range coefficient sets may carry into the
/// exponent, as the hardware adder does.
pub fn correct_mantissa(mantissa: u32, coeffs: &ApproxExpCoefficients) -> i64 {
    let sum_fraction = coeffs.sum_fraction();
    let gamma_shift = sum_fraction - coeffs.constant_fraction;
    let gamma1 = (coeffs.gamma1 as i64) << gamma_shift;
    let gamma2 = (coeffs.gamma2 as i64) << gamma_shift;

    let mant_add = (mantissa as i64) << (sum_fraction - MANTISSA_BITS);
    let lower_half = mant_add < 1i64 << (sum_fraction - 1);
    let res_add = mant_add + if lower_half { gamma1 } else { gamma2 };

    let mul_width = coeffs.mul_surplus_bits + coeffs.input_fraction;
    let mant_mul = (mantissa as i64) << coeffs.mul_surplus_bits;
    let res_mul = if mant_mul < 1i64 << (mul_width - 1) {
        mant_mul * coeffs.alpha as i64
    } else {
        coeffs.beta as i64 * ((1i64 << mul_width) - mant_mul - 1)
    };

    let correction = (res_mul * res_add) >> coeffs.product_shift();
    let reflected = if lower_half {
        correction
    } else {
        (1i64 << (MANTISSA_BITS + coeffs.not_surplus_bits)) - correction - 1
    };
    reflected >> coeffs.not_surplus_bits
}

/// Piecewise-linear exponential unit.
#[derive(Debug, Clone)]
pub struct ExpApprox {
    coeffs: ApproxExpCoefficients,
    /// `log2(e)` in `scale_fraction` fractional bits.
    log2e: i64,
    /// `1.0` in `scale_fraction` fractional bits.
    unit: i64,
}

impl ExpApprox {
    pub fn new(coeffs: ApproxExpCoefficients) -> SoftexResult<Self> {
        coeffs.validate()?;
        let scale = (1u64 << coeffs.scale_fraction) as f64;
        Ok(Self {
            coeffs,
            log2e: (std::f64::consts::LOG2_E * scale).round_ties_even() as i64,
            unit: 1i64 << coeffs.scale_fraction,
        })
    }

    #[inline]
    pub fn coefficients(&self) -> &ApproxExpCoefficients {
        &self.coeffs
    }

    /// Approximate `e^x`.
    #[inline]
    pub fn exp(&self, x: bf16) -> bf16 {
        codec::from_float_bits(self.pow2_scaled(codec::to_float_bits(x), self.log2e))
    }

    /// Approximate `2^x`.
    #[inline]
    pub fn exp2(&self, x: bf16) -> bf16 {
        codec::from_float_bits(self.pow2_scaled(codec::to_float_bits(x), self.unit))
    }

    /// First-pass power of two before the mantissa correction.
    ///
    /// Returns `None` when the exponent field saturates. `scale` is a
    /// positive fixed-point multiplier with `scale_fraction` fractional bits.
    pub fn uncorrected(&self, bits: FloatBits, scale: i64) -> Option<FloatBits> {
        let FloatFields { sign, mantissa, exponent } = codec::decompose(bits);
        if exponent == EXPONENT_MAX {
            return None;
        }

        let product = ((1i64 << MANTISSA_BITS) + mantissa as i64).checked_mul(scale)?;
        let shifted = if exponent >= EXPONENT_BIAS {
            let shift = exponent - EXPONENT_BIAS;
            // Anything reaching 2^62 is far outside the exponent range.
            if shift >= SATURATING_SHIFT || shift + 2 > product.unsigned_abs().leading_zeros() {
                return None;
            }
            product << shift
        } else {
            let shift = EXPONENT_BIAS - exponent;
            if shift >= 63 { 0 } else { product >> shift }
        };

        let fraction = self.coeffs.scale_fraction;
        let mut fixed = (shifted >> fraction) + ((shifted >> (fraction - 1)) & 1);
        if sign == 1 {
            fixed = -fixed;
        }

        let new_mantissa = fixed & MANTISSA_MASK as i64;
        let new_exponent = (fixed >> MANTISSA_BITS) + EXPONENT_BIAS as i64;
        // Zero exponent is a subnormal, flushed like every other result.
        if new_exponent <= 0 || new_exponent >= EXPONENT_MAX as i64 {
            return None;
        }

        Some(codec::compose(FloatFields {
            sign: 0,
            mantissa: new_mantissa as u32,
            exponent: new_exponent as u32,
        }))
    }

    /// Replace the mantissa of a first-pass result by its corrected value.
    pub fn correct(&self, bits: FloatBits) -> FloatBits {
        let mantissa = codec::decompose(bits).mantissa;
        let corrected = correct_mantissa(mantissa, &self.coeffs);
        ((bits & 0xFF80_0000) as i64).wrapping_add(corrected << 16) as u32
    }

    fn pow2_scaled(&self, bits: FloatBits, scale: i64) -> FloatBits {
        match self.uncorrected(bits, scale) {
            Some(first_pass) => self.correct(first_pass),
            None => 0,
        }
    }
}
