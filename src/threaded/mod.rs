//! Multi-threaded execution.
//!
//! - `pool`: rayon-backed workers with static range partitioning
//! - `driver`: the tiled GEMM itself, shared by all four constant/runtime
//!   operand combinations

pub mod driver;
pub mod pool;

pub use driver::{GemmParams, OperandSource, run_gemm};
pub use pool::WorkerPool;
