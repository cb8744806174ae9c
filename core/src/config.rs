//! Engine configuration.
//!
//! Everything the core needs arrives as plain values: the memory bandwidth,
//! the accumulator bank size, the boundary formats and the coefficient set.
//! Configurations can also be read from JSON; missing fields take the
//! accelerator defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coefficients::ApproxExpCoefficients;
use crate::error::{SoftexError, SoftexResult};
use crate::format::NumericFormat;

/// Default memory interface width in bits.
pub const DEFAULT_BANDWIDTH_BITS: u32 = 128;

/// Streaming parameters of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bits consumed per block.
    pub bandwidth_bits: u32,
    /// Number of partial-sum registers (`K`).
    pub acc_regs: usize,
    pub input: NumericFormat,
    pub output: NumericFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bandwidth_bits: DEFAULT_BANDWIDTH_BITS,
            acc_regs: 1,
            input: NumericFormat::BFloat16,
            output: NumericFormat::BFloat16,
        }
    }
}

impl StreamConfig {
    pub fn new(bandwidth_bits: u32, acc_regs: usize) -> Self {
        Self { bandwidth_bits, acc_regs, ..Self::default() }
    }

    pub fn with_formats(mut self, input: NumericFormat, output: NumericFormat) -> Self {
        self.input = input;
        self.output = output;
        self
    }

    /// Elements per block.
    #[inline]
    pub fn block_elements(&self) -> usize {
        (self.bandwidth_bits / self.input.width_bits()) as usize
    }

    /// Reject configurations the accelerator cannot be built with.
    pub fn validate(&self) -> SoftexResult<()> {
        self.input.validate()?;
        self.output.validate()?;
        if self.acc_regs == 0 {
            return Err(SoftexError::NoAccumulators);
        }
        for element_bits in [self.input.width_bits(), self.output.width_bits()] {
            if self.bandwidth_bits == 0 || self.bandwidth_bits % element_bits != 0 {
                return Err(SoftexError::BandwidthMisaligned {
                    bandwidth: self.bandwidth_bits,
                    element_bits,
                });
            }
        }
        Ok(())
    }
}

/// Full engine configuration as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftexConfig {
    pub stream: StreamConfig,
    pub coefficients: ApproxExpCoefficients,
}

impl SoftexConfig {
    pub fn from_json_str(text: &str) -> SoftexResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| SoftexError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> SoftexResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SoftexError::ConfigIo(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> SoftexResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SoftexError::ConfigParse(e.to_string()))
    }

    pub fn validate(&self) -> SoftexResult<()> {
        self.stream.validate()?;
        self.coefficients.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_eight_bfloat16_lanes() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_elements(), 8);
    }

    #[test]
    fn bandwidth_must_align_with_elements() {
        let err = StreamConfig::new(100, 1).validate().unwrap_err();
        assert_eq!(err, SoftexError::BandwidthMisaligned { bandwidth: 100, element_bits: 16 });
        assert!(StreamConfig::new(0, 1).validate().is_err());
    }

    #[test]
    fn zero_registers_rejected() {
        assert_eq!(StreamConfig::new(128, 0).validate(), Err(SoftexError::NoAccumulators));
    }

    #[test]
    fn output_width_checked_too() {
        let config = StreamConfig::new(16, 1).with_formats(
            NumericFormat::BFloat16,
            NumericFormat::Fixed { width: 32, int_bits: 1, signed: false },
        );
        assert!(matches!(config.validate(), Err(SoftexError::BandwidthMisaligned { element_bits: 32, .. })));
    }

    #[test]
    fn json_round_trip_and_defaults() {
        let config = SoftexConfig::from_json_str(r#"{ "stream": { "acc_regs": 4 } }"#).unwrap();
        assert_eq!(config.stream.acc_regs, 4);
        assert_eq!(config.stream.bandwidth_bits, DEFAULT_BANDWIDTH_BITS);
        assert_eq!(config.coefficients, ApproxExpCoefficients::default());

        let text = config.to_json_string().unwrap();
        assert_eq!(SoftexConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(SoftexConfig::from_json_str("{ nope"), Err(SoftexError::ConfigParse(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SoftexConfig::from_path("/nonexistent/softex.json").unwrap_err();
        assert!(matches!(err, SoftexError::ConfigIo(_)));
    }
}
