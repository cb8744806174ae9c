//! # softex-core: bit-accurate streaming softmax reference model
//!
//! Software twin of a bfloat16 softmax accelerator. Hardware results are
//! compared element by element against the output of this crate, so every
//! operation reproduces the datapath exactly: integer bit-field arithmetic
//! instead of native exponentiation, bfloat16 rounding where the hardware
//! rounds, and no true divider.
//!
//! ## Architecture
//!
//! - **Float codec** (`codec`): sign / exponent / mantissa fields of bfloat16
//! - **Exponential** (`exp`): piecewise-linear `e^x` with mantissa correction
//! - **Reciprocal** (`reciprocal`): bit-trick seed + two Newton-Raphson steps
//! - **Streaming engine** (`engine`): blocked online softmax with a rotating
//!   accumulator bank and max-tracking rescale
//! - **Calibration** (`calibrate`): offline grid search for the coefficients
//!
//! ## Usage
//!
//! ```ignore
//! use softex_core::*;
//! use half::bf16;
//!
//! let engine = StreamingSoftmax::new(StreamConfig::new(128, 2), ApproxExpCoefficients::default())?;
//! let scores: Vec<bf16> = [0.0f32, 1.0, 2.0].iter().map(|&x| bf16::from_f32(x)).collect();
//! let out = engine.run(&scores)?;
//! println!("{:?} (denominator {})", out.probabilities, out.denominator);
//! ```

pub mod accumulator;
pub mod calibrate;
pub mod codec;
pub mod coefficients;
pub mod config;
pub mod engine;
pub mod error;
pub mod exp;
pub mod format;
pub mod reciprocal;

// Re-export primary types
pub use accumulator::{AccumulatorBank, RunningMax, StreamBlock};
pub use calibrate::{calibrate, mismatch_count, CalibrationGrid};
pub use codec::{compose, decompose, FloatBits, FloatFields};
pub use coefficients::ApproxExpCoefficients;
pub use config::{SoftexConfig, StreamConfig};
pub use engine::{EncodedOutput, Normalizer, Phase, SoftmaxOutput, SoftmaxRun, StreamingSoftmax};
pub use error::{SoftexError, SoftexResult};
pub use exp::ExpApprox;
pub use format::NumericFormat;
pub use reciprocal::reciprocal;
