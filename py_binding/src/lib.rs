//! Python bindings for softex-core via PyO3.
//!
//! Verification scripts hand raw bfloat16 bit patterns across the boundary,
//! the same words the accelerator reads from memory.

use half::bf16;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use softex_core::{
    calibrate as calibrate_coefficients, reciprocal as reciprocal_bf16, ApproxExpCoefficients,
    CalibrationGrid, ExpApprox, SoftexConfig, SoftexError, StreamConfig, StreamingSoftmax,
};

fn to_py_err(e: SoftexError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// A configured streaming softmax unit.
#[pyclass]
pub struct PySoftmaxEngine {
    engine: StreamingSoftmax,
}

#[pymethods]
impl PySoftmaxEngine {
    #[new]
    #[pyo3(signature = (bandwidth = 128, acc_regs = 1))]
    fn new(bandwidth: u32, acc_regs: usize) -> PyResult<Self> {
        let engine = StreamingSoftmax::new(StreamConfig::new(bandwidth, acc_regs), ApproxExpCoefficients::default())
            .map_err(to_py_err)?;
        Ok(Self { engine })
    }

    /// Build an engine from a JSON configuration document.
    #[staticmethod]
    fn from_json(text: &str) -> PyResult<Self> {
        let config = SoftexConfig::from_json_str(text).map_err(to_py_err)?;
        let engine = StreamingSoftmax::new(config.stream, config.coefficients).map_err(to_py_err)?;
        Ok(Self { engine })
    }

    /// Softmax of one vector of raw input words.
    ///
    /// Returns `(output_words, denominator)`.
    fn softmax(&self, words: Vec<u32>) -> PyResult<(Vec<u32>, f32)> {
        let out = self.engine.run_encoded(&words).map_err(to_py_err)?;
        Ok((out.words, out.denominator))
    }

    /// Softmax of several vectors of raw input words; one
    /// `(output_words, denominator)` pair each.
    fn softmax_batch(&self, vectors: Vec<Vec<u32>>) -> PyResult<Vec<(Vec<u32>, f32)>> {
        let outputs = self.engine.run_batch_encoded(&vectors).map_err(to_py_err)?;
        Ok(outputs.into_iter().map(|o| (o.words, o.denominator)).collect())
    }

    fn block_elements(&self) -> usize {
        self.engine.config().block_elements()
    }
}

/// One-shot softmax over bfloat16 bit patterns.
///
/// Returns `(probability_bits, denominator)`.
#[pyfunction]
#[pyo3(signature = (scores, bandwidth = 128, acc_regs = 1))]
fn softmax(scores: Vec<u16>, bandwidth: u32, acc_regs: usize) -> PyResult<(Vec<u16>, f32)> {
    let engine = StreamingSoftmax::new(StreamConfig::new(bandwidth, acc_regs), ApproxExpCoefficients::default())
        .map_err(to_py_err)?;
    let scores: Vec<bf16> = scores.into_iter().map(bf16::from_bits).collect();
    let out = engine.run(&scores).map_err(to_py_err)?;
    Ok((out.probabilities.iter().map(|p| p.to_bits()).collect(), out.denominator))
}

/// Approximate `e^x` for a bfloat16 bit pattern.
#[pyfunction]
fn exponentiate(bits: u16) -> PyResult<u16> {
    let unit = ExpApprox::new(ApproxExpCoefficients::default()).map_err(to_py_err)?;
    Ok(unit.exp(bf16::from_bits(bits)).to_bits())
}

/// Approximate reciprocal of a single-precision denominator, as bfloat16 bits.
#[pyfunction]
fn reciprocal(denominator: f32) -> PyResult<u16> {
    reciprocal_bf16(denominator).map(|r| r.to_bits()).map_err(to_py_err)
}

/// Run the coefficient grid search with its default ranges.
#[pyfunction]
fn calibrate(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let coeffs = calibrate_coefficients(&CalibrationGrid::default()).map_err(to_py_err)?;
    let dict = PyDict::new_bound(py);
    dict.set_item("alpha", coeffs.alpha)?;
    dict.set_item("beta", coeffs.beta)?;
    dict.set_item("gamma1", coeffs.gamma1)?;
    dict.set_item("gamma2", coeffs.gamma2)?;
    dict.set_item("coefficient_fraction", coeffs.coefficient_fraction)?;
    dict.set_item("constant_fraction", coeffs.constant_fraction)?;
    Ok(dict)
}

#[pymodule]
fn softex_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySoftmaxEngine>()?;
    m.add_function(wrap_pyfunction!(softmax, m)?)?;
    m.add_function(wrap_pyfunction!(exponentiate, m)?)?;
    m.add_function(wrap_pyfunction!(reciprocal, m)?)?;
    m.add_function(wrap_pyfunction!(calibrate, m)?)?;
    Ok(())
}
