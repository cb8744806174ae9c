//! Element encodings at the accelerator boundary.
//!
//! The datapath always computes in bfloat16. A [`NumericFormat`] describes
//! how raw words are cast into and out of it, and is chosen once when the
//! engine is configured.

use half::bf16;
use serde::{Deserialize, Serialize};

use crate::error::{SoftexError, SoftexResult};

/// Encoding of one element on the memory interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NumericFormat {
    /// Raw bfloat16 bit patterns.
    #[default]
    #[serde(rename = "bfloat16")]
    BFloat16,
    /// Two's-complement or unsigned fixed point.
    ///
    /// The binary point sits `width − int_bits − signed` bits from the
    /// right. `int_bits` may be negative for outputs confined below one.
    Fixed {
        width: u32,
        int_bits: i32,
        signed: bool,
    },
}

impl NumericFormat {
    /// Width of one element in bits.
    pub fn width_bits(&self) -> u32 {
        match self {
            NumericFormat::BFloat16 => 16,
            NumericFormat::Fixed { width, .. } => *width,
        }
    }

    pub fn validate(&self) -> SoftexResult<()> {
        match *self {
            NumericFormat::BFloat16 => Ok(()),
            NumericFormat::Fixed { width, .. } if !matches!(width, 8 | 16 | 32) => {
                Err(SoftexError::UnsupportedWidth { width })
            }
            NumericFormat::Fixed { width, int_bits, .. } if int_bits > width as i32 || int_bits < -64 => {
                Err(SoftexError::UnsupportedWidth { width })
            }
            NumericFormat::Fixed { .. } => Ok(()),
        }
    }

    /// Fractional bits of a fixed-point format (zero for bfloat16).
    pub fn frac_bits(&self) -> i32 {
        match *self {
            NumericFormat::BFloat16 => 0,
            NumericFormat::Fixed { width, int_bits, signed } => width as i32 - int_bits - signed as i32,
        }
    }

    /// Cast a raw word into the bfloat16 datapath.
    pub fn decode(&self, word: u32) -> bf16 {
        match *self {
            NumericFormat::BFloat16 => bf16::from_bits(word as u16),
            NumericFormat::Fixed { width, signed, .. } => {
                let raw = if signed {
                    sign_extend(word, width)
                } else {
                    (word & width_mask(width)) as i64
                };
                bf16::from_f64(raw as f64 * (-self.frac_bits() as f64).exp2())
            }
        }
    }

    /// Cast a bfloat16 result onto the memory interface.
    ///
    /// Fixed-point results truncate toward zero and saturate at the range
    /// of the format.
    pub fn encode(&self, value: bf16) -> u32 {
        match *self {
            NumericFormat::BFloat16 => value.to_bits() as u32,
            NumericFormat::Fixed { width, signed, .. } => {
                let (lo, hi) = if signed {
                    (-(1i64 << (width - 1)), (1i64 << (width - 1)) - 1)
                } else {
                    (0, (1i64 << width) - 1)
                };
                let scaled = value.to_f64() * (self.frac_bits() as f64).exp2();
                let raw = if scaled.is_nan() {
                    0
                } else {
                    (scaled.trunc().clamp(lo as f64, hi as f64)) as i64
                };
                (raw as u32) & width_mask(width)
            }
        }
    }
}

#[inline]
fn width_mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1u32 << width) - 1 }
}

#[inline]
fn sign_extend(word: u32, width: u32) -> i64 {
    let shift = 64 - width;
    (((word as u64) << shift) as i64) >> shift
}
