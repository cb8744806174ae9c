//! Calibrated constants of the exponential approximation.
//!
//! The accelerator evaluates `2^m − 1` on the mantissa interval with two
//! linear segments (`alpha`/`gamma1` below the midpoint, `beta`/`gamma2`
//! above it) followed by one multiplicative pass. All constants are
//! fixed-point integers; the `*_fraction` fields give their binary point.

use serde::{Deserialize, Serialize};

use crate::codec::MANTISSA_BITS;
use crate::error::{SoftexError, SoftexResult};

/// Bound on the correction product; its upper-half reflection must fit i64 too.
const PRODUCT_LIMIT: i128 = 1 << 62;

/// Fixed-point coefficient set consumed by the exponential approximator.
///
/// Produced offline (see [`crate::calibrate`]) and never mutated by the
/// streaming engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproxExpCoefficients {
    /// Lower-segment slope, `coefficient_fraction` fractional bits.
    pub alpha: u32,
    /// Upper-segment slope, `coefficient_fraction` fractional bits.
    pub beta: u32,
    /// Lower-segment offset, `constant_fraction` fractional bits.
    pub gamma1: i32,
    /// Upper-segment offset, `constant_fraction` fractional bits.
    pub gamma2: i32,
    pub input_fraction: u32,
    pub coefficient_fraction: u32,
    pub constant_fraction: u32,
    /// Fractional bits of the `log2(e)` input scale.
    pub scale_fraction: u32,
    /// Extra bits kept on the multiplier operand.
    pub mul_surplus_bits: u32,
    /// Bits dropped late, after the upper-half reflection.
    pub not_surplus_bits: u32,
}

impl Default for ApproxExpCoefficients {
    /// The set shipped with the accelerator RTL.
    fn default() -> Self {
        Self::from_real(0.218_75, 0.410_156_25, 2.835_937_5, 2.167_968_75, 4, 7)
    }
}

impl ApproxExpCoefficients {
    /// Quantize real-valued coefficients, rounding half to even.
    ///
    /// `coefficient_fraction` applies to alpha/beta, `constant_fraction`
    /// to the gammas. The remaining widths take the accelerator defaults.
    pub fn from_real(
        alpha: f64,
        beta: f64,
        gamma1: f64,
        gamma2: f64,
        coefficient_fraction: u32,
        constant_fraction: u32,
    ) -> Self {
        let coeff_scale = 2f64.powi(coefficient_fraction as i32);
        let const_scale = 2f64.powi(constant_fraction as i32);
        Self {
            alpha: (alpha * coeff_scale).round_ties_even() as u32,
            beta: (beta * coeff_scale).round_ties_even() as u32,
            gamma1: (gamma1 * const_scale).round_ties_even() as i32,
            gamma2: (gamma2 * const_scale).round_ties_even() as i32,
            input_fraction: MANTISSA_BITS,
            coefficient_fraction,
            constant_fraction,
            scale_fraction: 14,
            mul_surplus_bits: 1,
            not_surplus_bits: 0,
        }
    }

    /// Common binary point of the additive path.
    #[inline]
    pub fn sum_fraction(&self) -> u32 {
        self.input_fraction.max(self.constant_fraction)
    }

    /// Right shift applied to the product of the two correction terms.
    #[inline]
    pub fn product_shift(&self) -> u32 {
        self.sum_fraction() + self.coefficient_fraction + self.mul_surplus_bits
            - self.not_surplus_bits
    }

    /// Largest magnitude the correction product can reach before its shift.
    fn worst_case_product(&self) -> i128 {
        let gamma_shift = self.sum_fraction() - self.constant_fraction;
        let gamma = self.gamma1.unsigned_abs().max(self.gamma2.unsigned_abs()) as i128;
        let addend = (1i128 << self.sum_fraction()) + (gamma << gamma_shift);
        // A narrow input fraction lets the 7-bit mantissa overrun the multiplier width.
        let operand = 1i128 << (self.mul_surplus_bits + self.input_fraction.max(MANTISSA_BITS));
        self.alpha.max(self.beta) as i128 * operand * addend
    }

    /// Check that every shift the approximator performs is in range and
    /// that the correction product fits its 64-bit datapath.
    pub fn validate(&self) -> SoftexResult<()> {
        if self.input_fraction == 0 {
            return Err(SoftexError::InvalidCoefficients("input_fraction must be non-zero"));
        }
        if self.sum_fraction() < MANTISSA_BITS {
            return Err(SoftexError::InvalidCoefficients(
                "additive path must keep at least the 7 mantissa bits",
            ));
        }
        if self.sum_fraction() > 24 || self.coefficient_fraction > 24 {
            return Err(SoftexError::InvalidCoefficients("fractional widths above 24 bits"));
        }
        if self.mul_surplus_bits + self.input_fraction > 24 {
            return Err(SoftexError::InvalidCoefficients("multiplier operand wider than 24 bits"));
        }
        if self.not_surplus_bits > MANTISSA_BITS
            || self.not_surplus_bits > self.sum_fraction() + self.coefficient_fraction + self.mul_surplus_bits
        {
            return Err(SoftexError::InvalidCoefficients("not_surplus_bits too large"));
        }
        if self.product_shift() >= 64 {
            return Err(SoftexError::InvalidCoefficients("product shift must stay below 64 bits"));
        }
        if self.worst_case_product() > PRODUCT_LIMIT {
            return Err(SoftexError::InvalidCoefficients("correction product overflows 64 bits"));
        }
        if self.scale_fraction == 0 || self.scale_fraction > 24 {
            return Err(SoftexError::InvalidCoefficients("scale_fraction must be in 1..=24"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_accelerator_constants() {
        let c = ApproxExpCoefficients::default();
        // 3.5 and 277.5 round to even.
        assert_eq!((c.alpha, c.beta, c.gamma1, c.gamma2), (4, 7, 363, 278));
        assert_eq!(c.sum_fraction(), 7);
        assert_eq!(c.product_shift(), 12);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_narrow_sum_fraction() {
        let c = ApproxExpCoefficients { input_fraction: 4, constant_fraction: 5, ..Default::default() };
        assert!(matches!(c.validate(), Err(SoftexError::InvalidCoefficients(_))));
    }

    #[test]
    fn rejects_product_shift_beyond_datapath() {
        let c = ApproxExpCoefficients {
            input_fraction: 1,
            mul_surplus_bits: 23,
            constant_fraction: 24,
            coefficient_fraction: 24,
            ..Default::default()
        };
        assert_eq!(c.product_shift(), 71);
        assert_eq!(
            c.validate(),
            Err(SoftexError::InvalidCoefficients("product shift must stay below 64 bits"))
        );
    }

    #[test]
    fn rejects_overflowing_correction_product() {
        let c = ApproxExpCoefficients { alpha: u32::MAX, gamma1: i32::MAX, ..Default::default() };
        assert_eq!(
            c.validate(),
            Err(SoftexError::InvalidCoefficients("correction product overflows 64 bits"))
        );
        let negative = ApproxExpCoefficients { gamma2: i32::MIN, beta: 1 << 24, ..Default::default() };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn accepts_wider_constant_path() {
        let c = ApproxExpCoefficients {
            alpha: 8,
            beta: 14,
            gamma1: 1452,
            gamma2: 1110,
            coefficient_fraction: 5,
            constant_fraction: 9,
            mul_surplus_bits: 2,
            not_surplus_bits: 2,
            ..Default::default()
        };
        assert_eq!(c.sum_fraction(), 9);
        assert_eq!(c.product_shift(), 14);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let c: ApproxExpCoefficients = serde_json::from_str(r#"{ "alpha": 5 }"#).unwrap();
        assert_eq!(c.alpha, 5);
        assert_eq!(c.gamma2, 278);
    }
}
