use crate::types::{ClosureError, ClosureResult, DesignMatrix};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use num_traits::{Float, FloatConst};

/// Wrap phase into (-pi, pi] by removing the nearest multiple of 2*pi
pub fn wrap<T: Float + FloatConst>(phase: T) -> T {
    let pi = T::PI();
    let two_pi = pi + pi;
    let wrapped = phase - two_pi * (phase / two_pi).round();
    if wrapped <= -pi {
        wrapped + two_pi
    } else {
        wrapped
    }
}

/// How a raw triangle closure is turned into the residual compared against the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosureMetric {
    /// |C.phase - wrap(C.phase)|: the integer 2*pi part of the closure.
    /// An unwrapping error of k cycles on one edge shows up here as 2*pi*k.
    #[default]
    Cycles,
    /// |wrap(C.phase)|: the wrapped misclosure left after removing whole cycles
    Wrapped,
}

impl ClosureMetric {
    /// Residual of a single raw closure value
    pub fn residual(&self, closure: f32) -> f32 {
        match self {
            ClosureMetric::Cycles => (closure - wrap(closure)).abs(),
            ClosureMetric::Wrapped => wrap(closure).abs(),
        }
    }
}

impl std::str::FromStr for ClosureMetric {
    type Err = ClosureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cycles" | "cycle" => Ok(ClosureMetric::Cycles),
            "wrapped" | "wrap" => Ok(ClosureMetric::Wrapped),
            _ => Err(ClosureError::InvalidInput(format!(
                "Unknown closure metric: {} (expected 'cycles' or 'wrapped')",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ClosureMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClosureMetric::Cycles => write!(f, "cycles"),
            ClosureMetric::Wrapped => write!(f, "wrapped"),
        }
    }
}

/// Phase closure estimator for triangles of interferograms (ab + bc + ca = 0).
///
/// All operations work on a (num_ifgram, num_pixel) phase matrix at once,
/// so a whole block is checked with one matrix product.
#[derive(Debug, Clone, Copy)]
pub struct ClosureEstimator {
    threshold: f32,
    metric: ClosureMetric,
}

impl ClosureEstimator {
    pub fn new(threshold: f32, metric: ClosureMetric) -> Self {
        Self { threshold, metric }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn metric(&self) -> ClosureMetric {
        self.metric
    }

    /// Raw triangle closure C.phase in size of (num_triangle, num_pixel)
    pub fn closure(design: &DesignMatrix, phase: ArrayView2<f32>) -> ClosureResult<Array2<f32>> {
        check_shapes(design, phase.nrows())?;
        Ok(design.dot(&phase))
    }

    /// Closure residual per triangle per pixel
    pub fn residuals(&self, design: &DesignMatrix, phase: ArrayView2<f32>) -> ClosureResult<Array2<f32>> {
        let metric = self.metric;
        let mut closure = Self::closure(design, phase)?;
        closure.mapv_inplace(|c| metric.residual(c));
        Ok(closure)
    }

    /// Number of triangles with non-zero closure for each pixel
    pub fn nonzero_closure_count(
        &self,
        design: &DesignMatrix,
        phase: ArrayView2<f32>,
    ) -> ClosureResult<Array1<i32>> {
        let residuals = self.residuals(design, phase)?;
        let threshold = self.threshold;
        Ok(residuals.map_axis(Axis(0), |column| {
            column.iter().filter(|&&r| r >= threshold).count() as i32
        }))
    }

    /// Pixels with at least one triangle of non-zero closure
    pub fn flag_pixels(&self, design: &DesignMatrix, phase: ArrayView2<f32>) -> ClosureResult<Array1<bool>> {
        Ok(self.nonzero_closure_count(design, phase)?.mapv(|n| n > 0))
    }

    /// Interferograms taking part in at least one triangle of non-zero closure,
    /// given the residual column of a single pixel
    pub fn suspect_ifgrams(&self, design: &DesignMatrix, residual: ArrayView1<f32>) -> Vec<bool> {
        let mut suspect = vec![false; design.ncols()];
        for (row, &r) in design.outer_iter().zip(residual.iter()) {
            if r >= self.threshold {
                for (flag, &c) in suspect.iter_mut().zip(row.iter()) {
                    if c != 0.0 {
                        *flag = true;
                    }
                }
            }
        }
        suspect
    }
}

pub(crate) fn check_shapes(design: &DesignMatrix, num_ifgram: usize) -> ClosureResult<()> {
    if design.ncols() != num_ifgram {
        return Err(ClosureError::InvalidInput(format!(
            "Design matrix has {} interferogram columns but phase has {} rows",
            design.ncols(),
            num_ifgram
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use std::f32::consts::PI;

    fn single_triangle() -> DesignMatrix {
        // edges AB, BC, AC
        array![[1.0, 1.0, -1.0]]
    }

    #[test]
    fn test_wrap_range() {
        assert_abs_diff_eq!(wrap(0.3f64), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap(2.0 * std::f64::consts::PI + 0.3), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap(-4.0 * std::f64::consts::PI - 0.3), -0.3, epsilon = 1e-12);
        // -pi maps to +pi
        assert_abs_diff_eq!(wrap(-std::f64::consts::PI), std::f64::consts::PI, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap(std::f64::consts::PI), std::f64::consts::PI, epsilon = 1e-12);
    }

    #[test]
    fn test_consistent_phase_has_zero_closure() {
        let design = single_triangle();
        // phase_ac = phase_ab + phase_bc
        let phase = array![[0.4f32, -1.2], [1.1, 3.0], [1.5, 1.8]];
        for metric in [ClosureMetric::Cycles, ClosureMetric::Wrapped] {
            let estimator = ClosureEstimator::new(0.1, metric);
            let residuals = estimator.residuals(&design, phase.view()).unwrap();
            for &r in residuals.iter() {
                assert_abs_diff_eq!(r, 0.0, epsilon = 1e-5);
            }
            let counts = estimator.nonzero_closure_count(&design, phase.view()).unwrap();
            assert_eq!(counts, array![0, 0]);
        }
    }

    #[test]
    fn test_wrapped_metric_scenario() {
        let design = single_triangle();
        let estimator = ClosureEstimator::new(0.1, ClosureMetric::Wrapped);

        let clean = Array2::from_shape_vec((3, 1), vec![0.0, 0.0, 2.0 * PI + 0.05]).unwrap();
        let closure = ClosureEstimator::closure(&design, clean.view()).unwrap();
        assert_abs_diff_eq!(wrap(closure[[0, 0]]), -0.05, epsilon = 1e-5);
        assert!(!estimator.flag_pixels(&design, clean.view()).unwrap()[0]);

        let noisy = Array2::from_shape_vec((3, 1), vec![0.0, 0.0, 2.0 * PI + 0.35]).unwrap();
        let closure = ClosureEstimator::closure(&design, noisy.view()).unwrap();
        assert_abs_diff_eq!(wrap(closure[[0, 0]]), -0.35, epsilon = 1e-5);
        assert!(estimator.flag_pixels(&design, noisy.view()).unwrap()[0]);
    }

    #[test]
    fn test_cycle_metric_detects_integer_jump() {
        let design = single_triangle();
        let phase = Array2::from_shape_vec((3, 1), vec![0.2, 0.3, 0.5 + 2.0 * PI]).unwrap();

        let cycles = ClosureEstimator::new(0.1, ClosureMetric::Cycles);
        let residuals = cycles.residuals(&design, phase.view()).unwrap();
        assert_abs_diff_eq!(residuals[[0, 0]], 2.0 * PI, epsilon = 1e-4);
        assert!(cycles.flag_pixels(&design, phase.view()).unwrap()[0]);

        // a whole cycle is invisible once wrapped
        let wrapped = ClosureEstimator::new(0.1, ClosureMetric::Wrapped);
        assert!(!wrapped.flag_pixels(&design, phase.view()).unwrap()[0]);
    }

    #[test]
    fn test_suspect_ifgrams() {
        // dates A, B, C, D; edges AB, AC, AD, BC, BD, CD
        let design: DesignMatrix = array![
            [1.0, -1.0, 0.0, 1.0, 0.0, 0.0],
            [1.0, 0.0, -1.0, 0.0, 1.0, 0.0],
            [0.0, 1.0, -1.0, 0.0, 0.0, 1.0],
            [0.0, 0.0, 0.0, 1.0, -1.0, 1.0],
        ];
        let estimator = ClosureEstimator::new(0.1, ClosureMetric::Cycles);
        let residual = array![6.28f32, 0.0, 0.0, 0.0];
        let suspect = estimator.suspect_ifgrams(&design, residual.view());
        assert_eq!(suspect, vec![true, true, false, true, false, false]);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let design = single_triangle();
        let phase = Array2::<f32>::zeros((4, 2));
        assert!(ClosureEstimator::closure(&design, phase.view()).is_err());
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("cycles".parse::<ClosureMetric>().unwrap(), ClosureMetric::Cycles);
        assert_eq!("Wrapped".parse::<ClosureMetric>().unwrap(), ClosureMetric::Wrapped);
        assert!("median".parse::<ClosureMetric>().is_err());
    }
}
