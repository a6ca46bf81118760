use crate::core::{correct_unwrap_error, CorrectionMode, CorrectionParams};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(py_correct_unwrap_error, m)?)?;
    Ok(())
}

/// Correct unwrapping errors of a (num_ifgram, num_pixel) phase matrix.
///
/// Returns the corrected phase and the integer jumps U, both float32.
#[pyfunction]
#[pyo3(
    name = "correct_unwrap_error",
    signature = (ifgram, design, fast = false, thres = 0.1, alpha = 0.25, rcond = 1e-3)
)]
fn py_correct_unwrap_error<'py>(
    py: Python<'py>,
    ifgram: PyReadonlyArray2<'py, f32>,
    design: PyReadonlyArray2<'py, f32>,
    fast: bool,
    thres: f32,
    alpha: f64,
    rcond: f64,
) -> PyResult<(&'py PyArray2<f32>, &'py PyArray2<f32>)> {
    let params = CorrectionParams {
        threshold: thres,
        alpha,
        rcond,
        ..CorrectionParams::default()
    };
    let mode = if fast {
        CorrectionMode::Fast
    } else {
        CorrectionMode::Full
    };

    let phase = ifgram.as_array().to_owned();
    let design = design.as_array().to_owned();
    let estimate = py
        .allow_threads(|| correct_unwrap_error(phase.view(), &design, mode, &params))
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)))?;

    Ok((
        estimate.corrected.into_pyarray(py),
        estimate.jumps.into_pyarray(py),
    ))
}
