//! Layer parameters and per-call runtime options.

use std::sync::Arc;

use crate::matrix::alloc::{Allocator, heap};
use crate::precision::Precision;

/// Scalar parameters of a GEMM layer: `alpha * op(A) * op(B) + beta * C`.
///
/// Fixed for the lifetime of a [`Gemm`](crate::Gemm); the operand
/// dimensions are taken from the operands themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct GemmConfig {
    /// Read A transposed (stored K×M)
    pub trans_a: bool,
    /// Read B transposed (stored N×K)
    pub trans_b: bool,
    pub alpha: f32,
    pub beta: f32,
    /// Precision of the output buffer
    pub output_precision: Precision,
    /// Force an output lane width instead of choosing from M
    pub output_lane_pack: Option<usize>,
    /// Emit the output as `M` planes of `1 × N` instead of an `M × N` matrix
    pub output_n1m: bool,
}

impl Default for GemmConfig {
    fn default() -> Self {
        Self {
            trans_a: false,
            trans_b: false,
            alpha: 1.0,
            beta: 1.0,
            output_precision: Precision::Single,
            output_lane_pack: None,
            output_n1m: false,
        }
    }
}

impl GemmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transpose(mut self, trans_a: bool, trans_b: bool) -> Self {
        self.trans_a = trans_a;
        self.trans_b = trans_b;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_beta(mut self, beta: f32) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_output_precision(mut self, precision: Precision) -> Self {
        self.output_precision = precision;
        self
    }

    pub fn with_output_lane_pack(mut self, lane_pack: usize) -> Self {
        self.output_lane_pack = Some(lane_pack);
        self
    }

    pub fn with_output_n1m(mut self, n1m: bool) -> Self {
        self.output_n1m = n1m;
        self
    }
}

/// Runtime options shared by pipeline creation and forward calls.
#[derive(Debug, Clone)]
pub struct GemmOptions {
    /// Requested worker count
    pub num_threads: usize,
    /// Interleave output and cached bias rows in groups of 4 when possible
    pub use_packing_layout: bool,
    /// Release unpacked constant operands once their packed form is cached
    pub lightmode: bool,
    /// Store packed panels as half precision instead of `f32`
    pub use_fp16_storage: bool,
    /// Persistent storage: outputs and pre-packed constants
    pub blob_allocator: Arc<dyn Allocator>,
    /// Transient storage: per-call panels, scratch, converted bias
    pub workspace_allocator: Arc<dyn Allocator>,
}

impl Default for GemmOptions {
    fn default() -> Self {
        Self {
            num_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            use_packing_layout: false,
            lightmode: false,
            use_fp16_storage: true,
            blob_allocator: heap(),
            workspace_allocator: heap(),
        }
    }
}

impl GemmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_packing_layout(mut self, enabled: bool) -> Self {
        self.use_packing_layout = enabled;
        self
    }

    pub fn with_lightmode(mut self, enabled: bool) -> Self {
        self.lightmode = enabled;
        self
    }

    pub fn with_fp16_storage(mut self, enabled: bool) -> Self {
        self.use_fp16_storage = enabled;
        self
    }

    pub fn with_blob_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.blob_allocator = allocator;
        self
    }

    pub fn with_workspace_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.workspace_allocator = allocator;
        self
    }

    /// Precision packed panels are stored in
    pub fn storage_precision(&self) -> Precision {
        if self.use_fp16_storage {
            Precision::Half
        } else {
            Precision::Single
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GemmConfig::default();
        assert_eq!((cfg.alpha, cfg.beta), (1.0, 1.0));
        assert!(!cfg.trans_a && !cfg.trans_b);

        let opt = GemmOptions::default();
        assert!(opt.num_threads >= 1);
        assert_eq!(opt.storage_precision(), Precision::Half);
    }

    #[test]
    fn test_builders() {
        let opt = GemmOptions::new().with_threads(0).with_fp16_storage(false);
        assert_eq!(opt.num_threads, 1);
        assert_eq!(opt.storage_precision(), Precision::Single);

        let cfg = GemmConfig::new().with_transpose(true, false).with_alpha(2.0);
        assert!(cfg.trans_a);
        assert_eq!(cfg.alpha, 2.0);
    }
}
