//! Streaming softmax engine.
//!
//! One vector moves through four phases:
//!
//! ```text
//! Scanning ──(all blocks)──► Finalizing ──(reciprocal)──► Normalizing ──(finish)──► Done
//! ```
//!
//! - **Scanning**: per block, raise the running maximum (rescaling every
//!   register by `exp(old − new)`), then add `Σ exp(x − max)` to the register
//!   under the rotation cursor.
//! - **Finalizing**: reduce the bank into the denominator and take its
//!   approximate reciprocal.
//! - **Normalizing**: revisit every score with the final maximum and multiply
//!   its exponential by the reciprocal, in as many chunks as the caller
//!   splits the vector into.
//!
//! [`SoftmaxRun`] exposes the phases one by one; [`StreamingSoftmax`] drives
//! complete vectors through them.

use half::bf16;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::accumulator::{self, AccumulatorBank, RunningMax, StreamBlock};
use crate::codec;
use crate::coefficients::ApproxExpCoefficients;
use crate::config::StreamConfig;
use crate::error::{SoftexError, SoftexResult};
use crate::exp::ExpApprox;
use crate::reciprocal;

/// Processing phase of a single vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Scanning,
    Finalizing,
    Normalizing,
    Done,
}

/// Result of one vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftmaxOutput {
    pub probabilities: Vec<bf16>,
    /// `Σ exp(x − running_max)` as held by the accumulator bank.
    pub denominator: f32,
    pub running_max: bf16,
}

/// Result of one vector on the memory interface.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedOutput {
    pub words: Vec<u32>,
    pub denominator: f32,
}

/// Denominator state once the bank has been reduced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    pub running_max: bf16,
    pub denominator: f32,
    pub reciprocal: bf16,
}

/// Phase-by-phase state of one vector.
#[derive(Debug, Clone)]
pub struct SoftmaxRun<'e> {
    exp: &'e ExpApprox,
    phase: Phase,
    running_max: RunningMax,
    bank: AccumulatorBank,
    blocks: usize,
    normalizer: Option<Normalizer>,
}

impl<'e> SoftmaxRun<'e> {
    pub fn new(exp: &'e ExpApprox, acc_regs: usize) -> SoftexResult<Self> {
        Ok(Self {
            exp,
            phase: Phase::Scanning,
            running_max: RunningMax::default(),
            bank: AccumulatorBank::new(acc_regs)?,
            blocks: 0,
            normalizer: None,
        })
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn running_max(&self) -> bf16 {
        self.running_max.get()
    }

    #[inline]
    pub fn bank(&self) -> &AccumulatorBank {
        &self.bank
    }

    /// Number of blocks scanned so far.
    #[inline]
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    fn expect_phase(&self, expected: Phase) -> SoftexResult<()> {
        if self.phase != expected {
            return Err(SoftexError::PhaseOrder { expected, actual: self.phase });
        }
        Ok(())
    }

    /// Fold one block into the bank.
    ///
    /// NaN scores never raise the maximum and contribute nothing to the sum.
    pub fn scan(&mut self, block: &StreamBlock) -> SoftexResult<()> {
        self.expect_phase(Phase::Scanning)?;
        trace!(
            block = self.blocks,
            lanes = block.lanes().len(),
            valid = block.valid(),
            padded = block.is_padded(),
            "scanning block"
        );

        if let Some(local_max) = block.local_max() {
            // Registers are all zero before the first maximum is known.
            let first = self.running_max.is_unset();
            if let Some(previous) = self.running_max.raise(local_max) {
                if !first {
                    let factor = self.exp.exp(codec::sub(previous, local_max));
                    self.bank.rescale(factor);
                    trace!(block = self.blocks, %previous, %local_max, %factor, "rescaled accumulators");
                }
            }
        }

        let max = self.running_max.get();
        let partial: f32 = block
            .scores()
            .iter()
            .map(|&x| self.exp.exp(codec::sub(x, max)).to_f32())
            .sum();
        let block_sum = bf16::from_f32(partial);
        let register = self.bank.accumulate(block_sum);
        trace!(block = self.blocks, register, %block_sum, "accumulated block");

        self.blocks += 1;
        Ok(())
    }

    /// Reduce the bank and compute the reciprocal of the denominator.
    pub fn finalize(&mut self) -> SoftexResult<Normalizer> {
        self.expect_phase(Phase::Scanning)?;
        if self.blocks == 0 {
            return Err(SoftexError::EmptyInput);
        }
        self.phase = Phase::Finalizing;

        let denominator = self.bank.total();
        let reciprocal = reciprocal::reciprocal(denominator)?;
        let normalizer = Normalizer { running_max: self.running_max.get(), denominator, reciprocal };
        debug!(blocks = self.blocks, denominator, %reciprocal, "denominator final");

        self.normalizer = Some(normalizer);
        self.phase = Phase::Normalizing;
        Ok(normalizer)
    }

    /// Second pass: normalized probability of every score in `scores`.
    ///
    /// May be called once per chunk of the vector, in any split; call
    /// [`finish`](Self::finish) after the last chunk.
    pub fn normalize(&mut self, scores: &[bf16]) -> SoftexResult<Vec<bf16>> {
        self.expect_phase(Phase::Normalizing)?;
        let Some(normalizer) = self.normalizer else {
            return Err(SoftexError::PhaseOrder { expected: Phase::Finalizing, actual: self.phase });
        };

        let exp = self.exp;
        let probabilities = scores
            .par_iter()
            .map(|&x| {
                let numerator = exp.exp(codec::sub(x, normalizer.running_max));
                codec::mul(numerator, normalizer.reciprocal)
            })
            .collect();
        Ok(probabilities)
    }

    /// Close the run after the last normalized chunk.
    pub fn finish(&mut self) -> SoftexResult<()> {
        self.expect_phase(Phase::Normalizing)?;
        self.phase = Phase::Done;
        Ok(())
    }
}

/// Configured softmax unit.
#[derive(Debug, Clone)]
pub struct StreamingSoftmax {
    config: StreamConfig,
    exp: ExpApprox,
}

impl StreamingSoftmax {
    /// Validate the configuration and coefficients before any data flows.
    pub fn new(config: StreamConfig, coeffs: ApproxExpCoefficients) -> SoftexResult<Self> {
        config.validate()?;
        let exp = ExpApprox::new(coeffs)?;
        debug!(
            bandwidth_bits = config.bandwidth_bits,
            lanes = config.block_elements(),
            acc_regs = config.acc_regs,
            "softmax engine configured"
        );
        Ok(Self { config, exp })
    }

    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    pub fn exp_unit(&self) -> &ExpApprox {
        &self.exp
    }

    /// Start a phase-by-phase run.
    pub fn start(&self) -> SoftexResult<SoftmaxRun<'_>> {
        SoftmaxRun::new(&self.exp, self.config.acc_regs)
    }

    /// Softmax of one bfloat16 vector.
    pub fn run(&self, scores: &[bf16]) -> SoftexResult<SoftmaxOutput> {
        if scores.is_empty() {
            return Err(SoftexError::EmptyInput);
        }

        let mut run = self.start()?;
        for block in accumulator::segment(scores, self.config.block_elements()) {
            run.scan(&block)?;
        }
        let normalizer = run.finalize()?;
        let probabilities = run.normalize(scores)?;
        run.finish()?;

        Ok(SoftmaxOutput {
            probabilities,
            denominator: normalizer.denominator,
            running_max: normalizer.running_max,
        })
    }

    /// Softmax of one vector of raw words in the configured input format,
    /// returned in the configured output format.
    pub fn run_encoded(&self, words: &[u32]) -> SoftexResult<EncodedOutput> {
        let input = self.config.input;
        let output = self.config.output;
        let scores: Vec<bf16> = words.iter().map(|&w| input.decode(w)).collect();
        let result = self.run(&scores)?;
        Ok(EncodedOutput {
            words: result.probabilities.iter().map(|&p| output.encode(p)).collect(),
            denominator: result.denominator,
        })
    }

    /// Encoded counterpart of [`run_batch`](Self::run_batch): every vector
    /// is decoded with the input format and encoded with the output format.
    pub fn run_batch_encoded<V>(&self, vectors: &[V]) -> SoftexResult<Vec<EncodedOutput>>
    where
        V: AsRef<[u32]> + Sync,
    {
        vectors.par_iter().map(|v| self.run_encoded(v.as_ref())).collect()
    }

    /// Independent vectors processed in parallel, results in input order.
    pub fn run_batch<V>(&self, vectors: &[V]) -> SoftexResult<Vec<SoftmaxOutput>>
    where
        V: AsRef<[bf16]> + Sync,
    {
        vectors.par_iter().map(|v| self.run(v.as_ref())).collect()
    }
}
