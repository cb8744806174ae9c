//! Error types for the softex reference model.
//!
//! Every fallible entry point returns `SoftexResult<T>`. Arithmetic on the
//! bfloat16 encoding is total, so errors only come from configuration,
//! degenerate inputs, or driving the engine phases out of order.

use thiserror::Error;

use crate::engine::Phase;

/// All error conditions raised by the softex core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SoftexError {
    #[error("bandwidth of {bandwidth} bits is not a non-zero multiple of the {element_bits}-bit element width")]
    BandwidthMisaligned {
        bandwidth: u32,
        element_bits: u32,
    },

    #[error("accumulator bank needs at least one register")]
    NoAccumulators,

    #[error("unsupported fixed-point width {width} (expected 8, 16 or 32)")]
    UnsupportedWidth {
        width: u32,
    },

    #[error("invalid exponential coefficients: {0}")]
    InvalidCoefficients(&'static str),

    #[error("input vector is empty")]
    EmptyInput,

    #[error("denominator {0} has no reciprocal")]
    DegenerateDenominator(f32),

    #[error("engine is in phase {actual:?}, expected {expected:?}")]
    PhaseOrder {
        expected: Phase,
        actual: Phase,
    },

    #[error("calibration grid produced no candidate coefficients")]
    CalibrationFailed,

    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("failed to read configuration: {0}")]
    ConfigIo(String),
}

pub type SoftexResult<T> = Result<T, SoftexError>;
