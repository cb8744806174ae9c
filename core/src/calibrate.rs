//! Offline search for the mantissa-correction coefficients.
//!
//! Each half of the mantissa domain is fitted independently against the
//! bfloat16 mantissa of `2^(1 + m/128)`: every `(slope, offset)` pair of the
//! grid is scored by the number of mismatching mantissas. Among the best
//! candidates of both halves, the pair whose signed errors cancel best wins.
//!
//! This runs once, outside the streaming path, and its output is an ordinary
//! [`ApproxExpCoefficients`] value.

use half::bf16;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::{self, MANTISSA_BITS};
use crate::coefficients::ApproxExpCoefficients;
use crate::error::{SoftexError, SoftexResult};
use crate::exp::correct_mantissa;

const HALF: u32 = 1 << (MANTISSA_BITS - 1);
const FULL: u32 = 1 << MANTISSA_BITS;

/// Search ranges. Slopes and offsets are given as real intervals
/// `[min, max)` and enumerated on their fixed-point grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationGrid {
    /// Fractional bits of alpha and beta.
    pub coefficient_fraction: u32,
    /// Fractional bits of gamma1 and gamma2.
    pub constant_fraction: u32,
    pub alpha: (f64, f64),
    pub beta: (f64, f64),
    pub gamma1: (f64, f64),
    pub gamma2: (f64, f64),
}

impl Default for CalibrationGrid {
    fn default() -> Self {
        Self {
            coefficient_fraction: 5,
            constant_fraction: 6,
            alpha: (0.0, 1.0),
            beta: (0.0, 1.0),
            gamma1: (2.0, 4.0),
            gamma2: (2.0, 4.0),
        }
    }
}

impl CalibrationGrid {
    fn steps(range: (f64, f64), fraction: u32) -> std::ops::Range<i64> {
        let scale = (1u64 << fraction) as f64;
        (range.0 * scale) as i64..(range.1 * scale) as i64
    }

    /// Coefficient set with the largest slope and offset magnitudes the grid
    /// enumerates. Every candidate is bounded by it.
    fn extremes(&self) -> SoftexResult<ApproxExpCoefficients> {
        let slopes = [
            Self::steps(self.alpha, self.coefficient_fraction),
            Self::steps(self.beta, self.coefficient_fraction),
        ];
        let offsets = [
            Self::steps(self.gamma1, self.constant_fraction),
            Self::steps(self.gamma2, self.constant_fraction),
        ];

        let mut slope = 0u32;
        for range in slopes.iter().filter(|r| !r.is_empty()) {
            let top = u32::try_from(range.end - 1)
                .map_err(|_| SoftexError::InvalidCoefficients("slope grid outside 0..=u32::MAX"))?;
            if range.start < 0 {
                return Err(SoftexError::InvalidCoefficients("slope grid outside 0..=u32::MAX"));
            }
            slope = slope.max(top);
        }
        let mut offset = 0i32;
        for range in offsets.iter().filter(|r| !r.is_empty()) {
            for end in [range.start, range.end - 1] {
                let value = i32::try_from(end)
                    .map_err(|_| SoftexError::InvalidCoefficients("offset grid outside i32"))?;
                if value.unsigned_abs() > offset.unsigned_abs() {
                    offset = value;
                }
            }
        }

        Ok(ApproxExpCoefficients { alpha: slope, beta: slope, gamma1: offset, gamma2: offset, ..self.template() })
    }

    /// Coefficient template carrying this grid's binary points.
    fn template(&self) -> ApproxExpCoefficients {
        ApproxExpCoefficients {
            alpha: 0,
            beta: 0,
            gamma1: 0,
            gamma2: 0,
            input_fraction: MANTISSA_BITS,
            coefficient_fraction: self.coefficient_fraction,
            constant_fraction: self.constant_fraction,
            mul_surplus_bits: 1,
            not_surplus_bits: 0,
            ..ApproxExpCoefficients::default()
        }
    }
}

/// Reference mantissa of `2^(1 + m/128)` for every mantissa field `m`.
pub fn baseline() -> [i64; FULL as usize] {
    let mut table = [0i64; FULL as usize];
    for (m, slot) in table.iter_mut().enumerate() {
        let x = bf16::from_bits(((codec::EXPONENT_BIAS << MANTISSA_BITS) + m as u32) as u16);
        let reference = bf16::from_f32(x.to_f32().exp2());
        *slot = codec::fields_of(reference).mantissa as i64;
    }
    table
}

/// Number of mantissas in `range` where `coeffs` disagrees with the
/// baseline, and the signed sum of the differences.
fn score(coeffs: &ApproxExpCoefficients, table: &[i64], range: std::ops::Range<u32>) -> (u32, i64) {
    range.fold((0, 0), |(misses, bias), m| {
        let diff = correct_mantissa(m, coeffs) - table[m as usize];
        (misses + (diff != 0) as u32, bias + diff)
    })
}

/// Mismatching mantissas over the whole domain.
pub fn mismatch_count(coeffs: &ApproxExpCoefficients) -> u32 {
    score(coeffs, &baseline(), 0..FULL).0
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    slope: u32,
    offset: i32,
    bias: i64,
}

/// Best-scoring candidates of one half, in grid order.
fn best_half(
    slopes: std::ops::Range<i64>,
    offsets: std::ops::Range<i64>,
    lower: bool,
    template: &ApproxExpCoefficients,
    table: &[i64],
) -> Vec<Candidate> {
    let range = if lower { 0..HALF } else { HALF..FULL };
    let mut best = Vec::new();
    let mut min_misses = HALF;

    for slope in slopes {
        for offset in offsets.clone() {
            let coeffs = if lower {
                ApproxExpCoefficients { alpha: slope as u32, gamma1: offset as i32, ..*template }
            } else {
                ApproxExpCoefficients { beta: slope as u32, gamma2: offset as i32, ..*template }
            };
            let (misses, bias) = score(&coeffs, table, range.clone());
            let candidate = Candidate { slope: slope as u32, offset: offset as i32, bias };
            if misses < min_misses {
                min_misses = misses;
                best.clear();
                best.push(candidate);
            } else if misses == min_misses {
                best.push(candidate);
            }
        }
    }
    best
}

/// Grid search for the coefficient set closest to the true power of two.
pub fn calibrate(grid: &CalibrationGrid) -> SoftexResult<ApproxExpCoefficients> {
    let template = grid.template();
    template.validate()?;
    grid.extremes()?.validate()?;
    let table = baseline();

    let lower = best_half(
        CalibrationGrid::steps(grid.alpha, grid.coefficient_fraction),
        CalibrationGrid::steps(grid.gamma1, grid.constant_fraction),
        true,
        &template,
        &table,
    );
    let upper = best_half(
        CalibrationGrid::steps(grid.beta, grid.coefficient_fraction),
        CalibrationGrid::steps(grid.gamma2, grid.constant_fraction),
        false,
        &template,
        &table,
    );

    let mut best: Option<(Candidate, Candidate)> = None;
    let mut best_bias = FULL as i64;
    for lo in &lower {
        for hi in &upper {
            let bias = (lo.bias + hi.bias).abs();
            if bias < best_bias {
                best_bias = bias;
                best = Some((*lo, *hi));
            }
        }
    }

    let (lo, hi) = best.ok_or(SoftexError::CalibrationFailed)?;
    let coeffs = ApproxExpCoefficients {
        alpha: lo.slope,
        gamma1: lo.offset,
        beta: hi.slope,
        gamma2: hi.offset,
        ..template
    };
    info!(
        alpha = coeffs.alpha,
        beta = coeffs.beta,
        gamma1 = coeffs.gamma1,
        gamma2 = coeffs.gamma2,
        bias = best_bias,
        "calibrated exponential coefficients"
    );
    Ok(coeffs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_endpoints() {
        let table = baseline();
        assert_eq!(table[0], 0);
        // 2^(1 + 64/128) = 2.828 → mantissa 0.414 · 128 ≈ 53.
        assert_eq!(table[64], 53);
        assert_eq!(table[127], 127);
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let grid = CalibrationGrid { gamma1: (2.0, 1.0e9), ..CalibrationGrid::default() };
        assert!(matches!(calibrate(&grid), Err(SoftexError::InvalidCoefficients(_))));

        let grid = CalibrationGrid { alpha: (-1.0, 1.0), ..CalibrationGrid::default() };
        assert!(matches!(calibrate(&grid), Err(SoftexError::InvalidCoefficients(_))));
    }

    #[test]
    fn empty_grid_fails() {
        let grid = CalibrationGrid { alpha: (0.0, 0.0), ..CalibrationGrid::default() };
        assert_eq!(calibrate(&grid), Err(SoftexError::CalibrationFailed));
    }
}
