//! Streaming state: input blocks, the running maximum and the partial-sum
//! register bank.
//!
//! The bank models `K` independent hardware accumulation lanes. Blocks are
//! dealt round-robin across the lanes, and the lanes are only combined once
//! the whole vector has been scanned.

use half::bf16;

use crate::error::{SoftexError, SoftexResult};

/// One bandwidth-wide slice of an input vector.
///
/// The tail block of a vector is zero-padded to the full lane count; only the
/// first `valid` lanes carry scores.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBlock {
    lanes: Vec<bf16>,
    valid: usize,
}

impl StreamBlock {
    /// Copy `scores` into a block of `lanes` elements, zero-padding the rest.
    pub fn padded(scores: &[bf16], lanes: usize) -> Self {
        let valid = scores.len().min(lanes);
        let mut block = vec![bf16::ZERO; lanes];
        block[..valid].copy_from_slice(&scores[..valid]);
        Self { lanes: block, valid }
    }

    /// Scores of the block, padding excluded.
    #[inline]
    pub fn scores(&self) -> &[bf16] {
        &self.lanes[..self.valid]
    }

    /// Every lane, padding included.
    #[inline]
    pub fn lanes(&self) -> &[bf16] {
        &self.lanes
    }

    #[inline]
    pub fn valid(&self) -> usize {
        self.valid
    }

    #[inline]
    pub fn is_padded(&self) -> bool {
        self.valid < self.lanes.len()
    }

    /// Largest score, padding and NaN excluded. `None` when no lane holds
    /// a comparable score.
    pub fn local_max(&self) -> Option<bf16> {
        self.scores()
            .iter()
            .copied()
            .filter(|x| !x.is_nan())
            .reduce(|a, b| if b > a { b } else { a })
    }
}

/// Split a vector into blocks of `lanes` elements.
pub fn segment(scores: &[bf16], lanes: usize) -> impl Iterator<Item = StreamBlock> + '_ {
    scores.chunks(lanes).map(move |chunk| StreamBlock::padded(chunk, lanes))
}

/// Largest score seen so far, starting at negative infinity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningMax(bf16);

impl Default for RunningMax {
    fn default() -> Self {
        Self(bf16::NEG_INFINITY)
    }
}

impl RunningMax {
    #[inline]
    pub fn get(&self) -> bf16 {
        self.0
    }

    /// True until the first block has been observed.
    #[inline]
    pub fn is_unset(&self) -> bool {
        self.0 == bf16::NEG_INFINITY
    }

    /// Raise the maximum to `candidate` if it is larger.
    ///
    /// Returns the previous maximum when it changed.
    pub fn raise(&mut self, candidate: bf16) -> Option<bf16> {
        if candidate > self.0 {
            let previous = self.0;
            self.0 = candidate;
            Some(previous)
        } else {
            None
        }
    }
}

/// Round-robin bank of single-precision partial sums.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorBank {
    registers: Vec<f32>,
    cursor: usize,
}

impl AccumulatorBank {
    pub fn new(registers: usize) -> SoftexResult<Self> {
        if registers == 0 {
            return Err(SoftexError::NoAccumulators);
        }
        Ok(Self { registers: vec![0.0; registers], cursor: 0 })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Register that receives the next block sum.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn registers(&self) -> &[f32] {
        &self.registers
    }

    /// Multiply every register by `factor`.
    pub fn rescale(&mut self, factor: bf16) {
        let factor = factor.to_f32();
        for register in self.registers.iter_mut() {
            *register *= factor;
        }
    }

    /// Add a block sum to the current register and advance the rotation.
    ///
    /// Returns the register index that was written.
    pub fn accumulate(&mut self, block_sum: bf16) -> usize {
        let index = self.cursor;
        self.registers[index] += block_sum.to_f32();
        self.cursor = (self.cursor + 1) % self.registers.len();
        index
    }

    /// Reduce all registers in index order.
    pub fn total(&self) -> f32 {
        self.registers.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(xs: &[f32]) -> Vec<bf16> {
        xs.iter().copied().map(bf16::from_f32).collect()
    }

    #[test]
    fn short_vector_is_padded_and_masked() {
        let block = StreamBlock::padded(&v(&[-3.0, -5.0]), 8);
        assert_eq!(block.lanes().len(), 8);
        assert_eq!(block.valid(), 2);
        assert!(block.is_padded());
        // Zero padding must not win over negative scores.
        assert_eq!(block.local_max(), Some(bf16::from_f32(-3.0)));
    }

    #[test]
    fn nan_never_wins_the_block_max() {
        let leading = StreamBlock::padded(&[bf16::NAN, bf16::ONE], 2);
        let trailing = StreamBlock::padded(&[bf16::ONE, bf16::NAN], 2);
        assert_eq!(leading.local_max(), Some(bf16::ONE));
        assert_eq!(trailing.local_max(), Some(bf16::ONE));
        assert_eq!(StreamBlock::padded(&[bf16::NAN], 2).local_max(), None);
    }

    #[test]
    fn segment_covers_every_score_once() {
        let scores = v(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let blocks: Vec<_> = segment(&scores, 2).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].scores(), &scores[4..]);
        assert_eq!(blocks.iter().map(StreamBlock::valid).sum::<usize>(), 5);
    }

    #[test]
    fn running_max_only_increases() {
        let mut max = RunningMax::default();
        assert!(max.is_unset());
        assert_eq!(max.raise(bf16::from_f32(2.0)), Some(bf16::NEG_INFINITY));
        assert_eq!(max.raise(bf16::from_f32(1.0)), None);
        assert_eq!(max.raise(bf16::from_f32(2.0)), None);
        assert_eq!(max.get(), bf16::from_f32(2.0));
    }

    #[test]
    fn bank_rotates_round_robin() {
        let mut bank = AccumulatorBank::new(3).unwrap();
        let written: Vec<usize> = (0..7).map(|_| bank.accumulate(bf16::ONE)).collect();
        assert_eq!(written, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(bank.registers(), &[3.0, 2.0, 2.0]);
        assert_eq!(bank.total(), 7.0);
    }

    #[test]
    fn rescale_applies_to_every_register() {
        let mut bank = AccumulatorBank::new(2).unwrap();
        bank.accumulate(bf16::from_f32(4.0));
        bank.accumulate(bf16::from_f32(8.0));
        bank.rescale(bf16::from_f32(0.25));
        assert_eq!(bank.registers(), &[1.0, 2.0]);
    }

    #[test]
    fn empty_bank_is_rejected() {
        assert_eq!(AccumulatorBank::new(0), Err(SoftexError::NoAccumulators));
    }
}
