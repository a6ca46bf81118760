//! closure-corrector: phase unwrapping error correction for interferogram stacks
//!
//! Triangles of interferograms (date pairs ab, bc, ac) must close to zero phase
//! once unwrapped. A non-zero closure points to an integer 2*pi jump on one of
//! the edges; the jumps are estimated per pixel with a regularized least squares
//! solve and removed from the stack, block by block.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{BlockBox, ClosureError, ClosureResult, DesignMatrix, PhaseCube, PhaseMatrix};

pub use crate::core::{
    correct_unwrap_error, CorrectionConfig, CorrectionMode, CorrectionParams, CorrectionSummary,
    UnwrapErrorCorrector,
};
pub use io::{IfgramStack, RasterStore};
