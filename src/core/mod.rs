//! Phase closure checks, jump solvers and block orchestration

pub mod closure;
pub mod solver;
pub mod blocks;
pub mod network;
pub mod correction;

// Re-export main types
pub use closure::{wrap, ClosureEstimator, ClosureMetric};
pub use solver::{
    correct_unwrap_error, BatchSolver, CorrectionMode, CorrectionParams, JumpEstimate, JumpSolver,
    PerPixelSolver, SolveStatus,
};
pub use blocks::{split_into_blocks, DEFAULT_MEMORY_BUDGET};
pub use network::{Ifgram, IfgramNetwork, NetworkTriangles, TriangleDesignMatrix};
pub use correction::{
    BlockCorrection, BlockStats, ClosureCountMap, CorrectionConfig, CorrectionSummary,
    UnwrapErrorCorrector, CLOSURE_COUNT_DATASET, CLOSURE_COUNT_FILE_TYPE,
};
