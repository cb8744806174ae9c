//! Property-based tests for the codec, the exponential unit and the
//! streaming engine.

use half::bf16;
use proptest::prelude::*;
use softex_core::*;

/// Largest relative error of the exponential over `[-80, 80]`.
const EXP_RELATIVE_TOLERANCE: f64 = 0.01;

/// Absolute tolerance between streamed runs with different block shapes.
const BLOCK_TOLERANCE: f32 = 0.02;

const NORMALIZATION_TOLERANCE: f32 = 0.03;

/// Integer-valued shifts keep every difference exact, so the outputs agree
/// bit for bit.
const SHIFT_TOLERANCE: f32 = 0.0;

fn engine(bandwidth_bits: u32, acc_regs: usize) -> StreamingSoftmax {
    StreamingSoftmax::new(StreamConfig::new(bandwidth_bits, acc_regs), ApproxExpCoefficients::default())
        .unwrap()
}

fn bandwidths() -> impl Strategy<Value = u32> {
    prop_oneof![Just(16u32), Just(32), Just(128), Just(256)]
}

#[test]
fn test_codec_round_trip_exhaustive() {
    for half_bits in 0..=u16::MAX {
        let bits = (half_bits as u32) << 16;
        assert_eq!(compose(decompose(bits)), bits, "{bits:#010x}");
    }
}

#[test]
fn test_exp_relative_error_exhaustive() {
    let unit = ExpApprox::new(ApproxExpCoefficients::default()).unwrap();
    for bits in 0..=u16::MAX {
        let x = bf16::from_bits(bits);
        if !x.is_finite() || x.to_f32().abs() > 80.0 {
            continue;
        }
        let approx = unit.exp(x).to_f64();
        let exact = x.to_f64().exp();
        let rel = (approx / exact - 1.0).abs();
        assert!(rel < EXP_RELATIVE_TOLERANCE, "exp({x}) = {approx}, expected {exact}");
    }
}

proptest! {
    #[test]
    fn prop_decompose_compose_identity(bits in any::<u16>()) {
        let pattern = (bits as u32) << 16;
        let fields = decompose(pattern);
        prop_assert!(fields.sign <= 1);
        prop_assert!(fields.mantissa < 128);
        prop_assert!(fields.exponent < 256);
        prop_assert_eq!(compose(fields), pattern);
    }

    #[test]
    fn prop_exp_is_monotone(a in -80.0f32..80.0, b in -80.0f32..80.0) {
        let unit = ExpApprox::new(ApproxExpCoefficients::default()).unwrap();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (lo, hi) = (bf16::from_f32(lo), bf16::from_f32(hi));
        prop_assert!(unit.exp(lo) <= unit.exp(hi));
    }

    #[test]
    fn prop_shift_invariance(
        raw in prop::collection::vec(0u8..64, 1..100),
        shift in 0u8..64,
        bandwidth in bandwidths(),
        regs in 1usize..=4,
    ) {
        let base: Vec<bf16> = raw.iter().map(|&x| bf16::from_f32(x as f32)).collect();
        let moved: Vec<bf16> = raw.iter().map(|&x| bf16::from_f32((x + shift) as f32)).collect();

        let e = engine(bandwidth, regs);
        let a = e.run(&base).unwrap();
        let b = e.run(&moved).unwrap();
        for (x, y) in a.probabilities.iter().zip(&b.probabilities) {
            prop_assert!((x.to_f32() - y.to_f32()).abs() <= SHIFT_TOLERANCE, "{} vs {}", x, y);
        }
    }

    #[test]
    fn prop_probabilities_sum_to_one(
        raw in prop::collection::vec(-64.0f32..64.0, 1..200),
        bandwidth in bandwidths(),
        regs in 1usize..=4,
    ) {
        let v: Vec<bf16> = raw.iter().copied().map(bf16::from_f32).collect();
        let out = engine(bandwidth, regs).run(&v).unwrap();
        let sum: f32 = out.probabilities.iter().map(|p| p.to_f32()).sum();
        prop_assert!((sum - 1.0).abs() < NORMALIZATION_TOLERANCE, "sum {}", sum);
        prop_assert!(out.probabilities.iter().all(|p| p.to_f32() >= 0.0));
    }

    #[test]
    fn prop_block_size_independence(
        raw in prop::collection::vec(-64.0f32..64.0, 1..200),
        bandwidth in bandwidths(),
        regs in 1usize..=4,
    ) {
        let v: Vec<bf16> = raw.iter().copied().map(bf16::from_f32).collect();
        let whole = engine(16 * v.len() as u32, 1).run(&v).unwrap();
        let streamed = engine(bandwidth, regs).run(&v).unwrap();
        prop_assert_eq!(whole.running_max, streamed.running_max);
        for (a, b) in streamed.probabilities.iter().zip(&whole.probabilities) {
            prop_assert!((a.to_f32() - b.to_f32()).abs() <= BLOCK_TOLERANCE, "{} vs {}", a, b);
        }
    }

    #[test]
    fn prop_sorted_input_gives_sorted_output(
        mut raw in prop::collection::vec(-64.0f32..64.0, 1..200),
        bandwidth in bandwidths(),
        regs in 1usize..=4,
    ) {
        raw.sort_by(|a, b| a.total_cmp(b));
        let v: Vec<bf16> = raw.iter().copied().map(bf16::from_f32).collect();
        let out = engine(bandwidth, regs).run(&v).unwrap();
        prop_assert!(out.probabilities.windows(2).all(|w| w[0] <= w[1]));
    }
}
