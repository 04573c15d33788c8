//! Error types for tilegemm

use thiserror::Error;

use crate::precision::Precision;

/// Result type alias using [`GemmError`]
pub type Result<T> = std::result::Result<T, GemmError>;

/// Errors that can occur while preparing or running a GEMM
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GemmError {
    /// A tile, scratch or output buffer could not be allocated.
    ///
    /// Fatal for the call: nothing is written to the output.
    #[error("Out of memory: failed to allocate {bytes} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        bytes: usize,
    },

    /// Operand dimensions disagree
    #[error("Shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        /// Which dimension or buffer was checked
        what: &'static str,
        /// Expected extent
        expected: usize,
        /// Actual extent
        got: usize,
    },

    /// `forward` was given fewer runtime operands than the constant layout requires
    #[error("Missing runtime operand at index {index}")]
    MissingOperand {
        /// Position in the runtime operand list
        index: usize,
    },

    /// An operand is marked constant but `create_pipeline` has not packed it yet
    #[error("Constant operand {0} has not been packed; call create_pipeline first")]
    PipelineNotCreated(&'static str),

    /// Unpacked storage was released in light mode and cannot be packed again
    #[error("Operand {0} was released after packing (light mode)")]
    OperandReleased(&'static str),

    /// Lane width does not divide the row count
    #[error("Lane width {width} does not divide {rows} rows")]
    InvalidLanePack {
        /// Logical row count
        rows: usize,
        /// Requested lane width
        width: usize,
    },

    /// Bias fell back to elementwise semantics but is too small to index
    #[error("Bias with {len} elements cannot be broadcast to {m}x{n}")]
    BiasShape {
        /// Bias element count
        len: usize,
        /// Output rows
        m: usize,
        /// Output columns
        n: usize,
    },

    /// Cached panels were packed at a different precision than requested
    #[error("Packed panels hold {got:?} values, expected {expected:?}")]
    PrecisionMismatch {
        /// Precision the caller asked for
        expected: Precision,
        /// Precision the panels were packed at
        got: Precision,
    },

    /// The worker pool could not be started
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
