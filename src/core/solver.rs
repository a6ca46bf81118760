use crate::core::closure::{check_shapes, ClosureEstimator, ClosureMetric};
use crate::types::{ClosureResult, DesignMatrix, PhaseMatrix};
use nalgebra::{DMatrix, DVector, SVD};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};

const TWO_PI: f64 = 2.0 * PI;

/// Iteration cap for the SVD behind the pseudo-inverse
const MAX_SVD_ITERATIONS: usize = 1000;

/// Number of progress reports over one per-pixel solve
const PROGRESS_STEPS: usize = 100;

/// Pixel counter shared by solver threads, logging every percent of the work done
struct SolveProgress {
    total: usize,
    step: usize,
    done: AtomicUsize,
}

impl SolveProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            step: (total / PROGRESS_STEPS).max(1),
            done: AtomicUsize::new(0),
        }
    }

    /// Count one solved pixel and return the number of pixels done so far
    fn tick(&self) -> usize {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.is_report(done) {
            log::info!(
                "solving pixels: {:.0}% ({} out of {})",
                done as f64 / self.total as f64 * 100.0,
                done,
                self.total
            );
        }
        done
    }

    fn is_report(&self, done: usize) -> bool {
        done % self.step == 0 || done == self.total
    }
}

/// Numerical parameters of the phase closure correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionParams {
    /// Threshold of non-zero phase closure beyond which a triangle holds an unwrapping error
    pub threshold: f32,
    /// Tikhonov regularization factor
    pub alpha: f64,
    /// Relative singular value cut-off of the pseudo-inverse
    pub rcond: f64,
    /// Residual used to compare closures against the threshold
    pub closure_metric: ClosureMetric,
}

impl Default for CorrectionParams {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            alpha: 0.25,
            rcond: 1e-3,
            closure_metric: ClosureMetric::Cycles,
        }
    }
}

impl CorrectionParams {
    pub fn estimator(&self) -> ClosureEstimator {
        ClosureEstimator::new(self.threshold, self.closure_metric)
    }
}

/// Outcome of the integer jump estimation for one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Jumps estimated, possibly all zero
    Solved,
    /// Linear system could not be inverted, phase passed through uncorrected
    Skipped,
}

/// Phase jump estimate for a set of pixels
#[derive(Debug, Clone)]
pub struct JumpEstimate {
    /// Unwrapped phase after correction, (num_ifgram, num_pixel)
    pub corrected: PhaseMatrix,
    /// Integer number of 2*pi cycles added per interferogram, (num_ifgram, num_pixel)
    pub jumps: Array2<f32>,
    /// Per pixel solve outcome
    pub status: Vec<SolveStatus>,
}

impl JumpEstimate {
    fn passthrough(phase: ArrayView2<f32>) -> Self {
        Self {
            corrected: phase.to_owned(),
            jumps: Array2::zeros(phase.raw_dim()),
            status: vec![SolveStatus::Skipped; phase.ncols()],
        }
    }

    fn from_jumps(phase: ArrayView2<f32>, jumps: Array2<f32>, status: Vec<SolveStatus>) -> Self {
        let corrected = &phase + &jumps.mapv(|u| u * TWO_PI as f32);
        Self { corrected, jumps, status }
    }

    pub fn num_pixels(&self) -> usize {
        self.status.len()
    }

    /// Number of pixels whose linear system could not be solved
    pub fn num_skipped(&self) -> usize {
        self.status.iter().filter(|&&s| s == SolveStatus::Skipped).count()
    }

    /// Number of pixels with at least one non-zero jump
    pub fn num_corrected(&self) -> usize {
        self.jumps
            .axis_iter(Axis(1))
            .filter(|column| column.iter().any(|&u| u != 0.0))
            .count()
    }
}

/// Estimator of integer phase jumps from triangle closures.
///
/// Implementations differ in whether one linear system is shared by all
/// pixels (batched) or built per pixel.
pub trait JumpSolver: Send + Sync {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    /// Estimate the jumps of a (num_ifgram, num_pixel) phase matrix and correct it
    fn estimate(&self, phase: ArrayView2<f32>, design: &DesignMatrix) -> ClosureResult<JumpEstimate>;
}

/// Fast mode: one regularized system A = [C; alpha*I] shared by every pixel,
/// so all columns go through a single pseudo-inverse.
#[derive(Debug, Clone, Copy)]
pub struct BatchSolver {
    alpha: f64,
    rcond: f64,
}

impl BatchSolver {
    pub fn new(params: &CorrectionParams) -> Self {
        Self {
            alpha: params.alpha,
            rcond: params.rcond,
        }
    }
}

impl JumpSolver for BatchSolver {
    fn name(&self) -> &'static str {
        "batch"
    }

    fn estimate(&self, phase: ArrayView2<f32>, design: &DesignMatrix) -> ClosureResult<JumpEstimate> {
        check_shapes(design, phase.nrows())?;
        let (num_tri, num_ifgram) = design.dim();
        let num_pixel = phase.ncols();

        let a = system_matrix(design, self.alpha, None);
        let a_inv = match pseudo_inverse(a, self.rcond) {
            Some(a_inv) => a_inv,
            None => {
                log::warn!(
                    "Pseudo-inverse failed for batched system, {} pixels left uncorrected",
                    num_pixel
                );
                return Ok(JumpEstimate::passthrough(phase));
            }
        };

        let closure = ClosureEstimator::closure(design, phase)?;
        let l = DMatrix::from_fn(num_tri, num_pixel, |t, p| closure[[t, p]] as f64 / -TWO_PI);
        let u = a_inv.columns(0, num_tri) * l;

        let mut jumps = Array2::<f32>::zeros((num_ifgram, num_pixel));
        let mut status = vec![SolveStatus::Solved; num_pixel];
        for p in 0..num_pixel {
            let column = u.column(p);
            if column.iter().all(|v| v.is_finite()) {
                for i in 0..num_ifgram {
                    jumps[[i, p]] = column[i].round() as f32;
                }
            } else {
                status[p] = SolveStatus::Skipped;
            }
        }

        Ok(JumpEstimate::from_jumps(phase, jumps, status))
    }
}

/// Full mode: per pixel system A = [C; alpha*I; D] where D pins the jump of every
/// interferogram outside all non-zero closure triangles to zero.
#[derive(Debug, Clone, Copy)]
pub struct PerPixelSolver {
    estimator: ClosureEstimator,
    alpha: f64,
    rcond: f64,
}

impl PerPixelSolver {
    pub fn new(params: &CorrectionParams) -> Self {
        Self {
            estimator: params.estimator(),
            alpha: params.alpha,
            rcond: params.rcond,
        }
    }

    /// Jumps of a single pixel, `None` when its system cannot be inverted
    pub fn solve_pixel(&self, phase: ArrayView1<f32>, design: &DesignMatrix) -> Option<Vec<f32>> {
        let num_tri = design.nrows();
        let closure: Vec<f64> = design
            .outer_iter()
            .map(|row| row.iter().zip(phase.iter()).map(|(&c, &p)| c as f64 * p as f64).sum())
            .collect();

        let metric = self.estimator.metric();
        let residual = ndarray::Array1::from_iter(closure.iter().map(|&c| metric.residual(c as f32)));
        let suspect = self.estimator.suspect_ifgrams(design, residual.view());

        let a = system_matrix(design, self.alpha, Some(&suspect));
        let a_inv = pseudo_inverse(a, self.rcond)?;

        let l = DVector::from_iterator(num_tri, closure.iter().map(|&c| c / -TWO_PI));
        let u = a_inv.columns(0, num_tri) * l;
        if u.iter().all(|v| v.is_finite()) {
            Some(u.iter().map(|v| v.round() as f32).collect())
        } else {
            None
        }
    }
}

impl JumpSolver for PerPixelSolver {
    fn name(&self) -> &'static str {
        "per-pixel"
    }

    fn estimate(&self, phase: ArrayView2<f32>, design: &DesignMatrix) -> ClosureResult<JumpEstimate> {
        check_shapes(design, phase.nrows())?;
        let (num_ifgram, num_pixel) = phase.dim();
        let progress = SolveProgress::new(num_pixel);
        let solve = |p: usize| {
            let solution = self.solve_pixel(phase.column(p), design);
            progress.tick();
            solution
        };

        #[cfg(feature = "parallel")]
        let solutions: Vec<Option<Vec<f32>>> = {
            use rayon::prelude::*;
            (0..num_pixel).into_par_iter().map(solve).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let solutions: Vec<Option<Vec<f32>>> = (0..num_pixel).map(solve).collect();

        let mut jumps = Array2::<f32>::zeros((num_ifgram, num_pixel));
        let mut status = Vec::with_capacity(num_pixel);
        for (p, solution) in solutions.into_iter().enumerate() {
            match solution {
                Some(u) => {
                    for (i, v) in u.into_iter().enumerate() {
                        jumps[[i, p]] = v;
                    }
                    status.push(SolveStatus::Solved);
                }
                None => status.push(SolveStatus::Skipped),
            }
        }

        let skipped = status.iter().filter(|&&s| s == SolveStatus::Skipped).count();
        if skipped > 0 {
            log::warn!(
                "Pseudo-inverse failed for {} out of {} pixels, left uncorrected",
                skipped,
                num_pixel
            );
        }

        Ok(JumpEstimate::from_jumps(phase, jumps, status))
    }
}

/// Correction strategy of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrectionMode {
    /// Batched solve without the zero jump constraint
    Fast,
    /// Per pixel solve with the zero jump constraint on closure-consistent interferograms
    #[default]
    Full,
}

impl CorrectionMode {
    pub fn solver(&self, params: &CorrectionParams) -> Box<dyn JumpSolver> {
        match self {
            CorrectionMode::Fast => Box::new(BatchSolver::new(params)),
            CorrectionMode::Full => Box::new(PerPixelSolver::new(params)),
        }
    }
}

/// Estimate and correct unwrapping errors of a (num_ifgram, num_pixel) phase matrix
pub fn correct_unwrap_error(
    phase: ArrayView2<f32>,
    design: &DesignMatrix,
    mode: CorrectionMode,
    params: &CorrectionParams,
) -> ClosureResult<JumpEstimate> {
    mode.solver(params).estimate(phase, design)
}

/// Stack [C; alpha*I] and, when a suspect mask is given, the identity rows of
/// the non-suspect interferograms
fn system_matrix(design: &DesignMatrix, alpha: f64, suspect: Option<&[bool]>) -> DMatrix<f64> {
    let (num_tri, num_ifgram) = design.dim();
    let pinned: Vec<usize> = suspect
        .map(|s| (0..num_ifgram).filter(|&i| !s[i]).collect())
        .unwrap_or_default();

    let num_rows = num_tri + num_ifgram + pinned.len();
    let mut a = DMatrix::<f64>::zeros(num_rows, num_ifgram);
    for t in 0..num_tri {
        for i in 0..num_ifgram {
            a[(t, i)] = design[[t, i]] as f64;
        }
    }
    for i in 0..num_ifgram {
        a[(num_tri + i, i)] = alpha;
    }
    for (k, &i) in pinned.iter().enumerate() {
        a[(num_tri + num_ifgram + k, i)] = 1.0;
    }
    a
}

/// Pseudo-inverse with singular values below `rcond * max(singular value)` discarded
fn pseudo_inverse(a: DMatrix<f64>, rcond: f64) -> Option<DMatrix<f64>> {
    let svd = SVD::try_new(a, true, true, f64::EPSILON, MAX_SVD_ITERATIONS)?;
    let max_sv = svd.singular_values.max();
    if !max_sv.is_finite() {
        return None;
    }
    svd.pseudo_inverse(rcond * max_sv).ok()
}
