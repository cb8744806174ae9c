//! Float codec for the bfloat16 encoding.
//!
//! Values travel through the model as 32-bit single-precision patterns
//! (`FloatBits`). The bfloat16 value occupies the top 16 bits: 1 sign bit,
//! 8 exponent bits and the top 7 of the 23 mantissa bits. The low 16 bits
//! are ignored by `decompose` and produced as zero by `compose`.

use half::bf16;

/// A single-precision bit pattern carrying a bfloat16 value in its top half.
pub type FloatBits = u32;

/// Number of explicit mantissa bits in bfloat16.
pub const MANTISSA_BITS: u32 = 7;

/// Exponent bias shared by bfloat16 and single precision.
pub const EXPONENT_BIAS: u32 = 127;

/// All-ones exponent field (infinity / NaN).
pub const EXPONENT_MAX: u32 = 0xFF;

pub const MANTISSA_MASK: u32 = (1 << MANTISSA_BITS) - 1;

/// Integer fields of a bfloat16 value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatFields {
    pub sign: u32,
    pub mantissa: u32,
    pub exponent: u32,
}

/// Split a single-precision pattern into its bfloat16 fields.
#[inline]
pub fn decompose(bits: FloatBits) -> FloatFields {
    FloatFields {
        sign: bits >> 31,
        mantissa: (bits >> 16) & MANTISSA_MASK,
        exponent: (bits >> 23) & EXPONENT_MAX,
    }
}

/// Reassemble fields into a single-precision pattern with a zero low half.
///
/// Fields wider than their slot are masked, so `compose` is total.
#[inline]
pub fn compose(fields: FloatFields) -> FloatBits {
    ((fields.sign & 1) << 31)
        | ((fields.exponent & EXPONENT_MAX) << 23)
        | ((fields.mantissa & MANTISSA_MASK) << 16)
}

/// Widen a bfloat16 value to its single-precision pattern.
#[inline]
pub fn to_float_bits(value: bf16) -> FloatBits {
    (value.to_bits() as u32) << 16
}

/// Truncate a single-precision pattern to bfloat16 (drops the low half).
#[inline]
pub fn from_float_bits(bits: FloatBits) -> bf16 {
    bf16::from_bits((bits >> 16) as u16)
}

#[inline]
pub fn fields_of(value: bf16) -> FloatFields {
    decompose(to_float_bits(value))
}

/// Replace subnormal values by a zero of the same sign.
///
/// The accelerator flushes subnormals on every arithmetic result.
#[inline]
pub fn flush_subnormal(value: bf16) -> bf16 {
    let bits = value.to_bits();
    if bits & 0x7F80 == 0 {
        bf16::from_bits(bits & 0x8000)
    } else {
        value
    }
}

/// bfloat16 subtraction: exact difference in single precision, rounded to
/// nearest even, subnormals flushed.
#[inline]
pub fn sub(a: bf16, b: bf16) -> bf16 {
    flush_subnormal(a - b)
}

/// bfloat16 multiplication, rounded to nearest even, subnormals flushed.
#[inline]
pub fn mul(a: bf16, b: bf16) -> bf16 {
    flush_subnormal(a * b)
}
