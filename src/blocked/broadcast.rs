//! Bias (C operand) broadcast classification and preparation.

use std::sync::Arc;

use crate::error::{GemmError, Result};
use crate::matrix::{Allocator, Buffer, Matrix, Shape};

/// How a bias operand maps onto the `M × N` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastMode {
    /// No bias term
    None,
    /// One value for every output element
    Scalar,
    /// Rank-1, one value per output row
    PerRowM,
    /// Rank-1, one value per output column
    PerColN,
    /// Rank-2 `M × 1`
    MatrixMx1,
    /// Rank-2 `M × N`, elementwise
    MatrixMxN,
    /// Rank-2 `1 × N`
    Matrix1xN,
}

/// Classify a bias shape against the output shape.
///
/// Checks run in a fixed order and a later match replaces an earlier one,
/// so a length-`N` vector is `PerColN` even when `M == N`. A non-empty
/// shape that matches nothing falls back to `MatrixMxN`.
pub fn resolve_broadcast(shape: Option<Shape>, m: usize, n: usize) -> BroadcastMode {
    let Some(shape) = shape.filter(|s| s.total() > 0) else {
        return BroadcastMode::None;
    };

    let mut mode = None;
    match shape {
        Shape::Vector { len } => {
            if len == 1 {
                mode = Some(BroadcastMode::Scalar);
            }
            if len == m {
                mode = Some(BroadcastMode::PerRowM);
            }
            if len == n {
                mode = Some(BroadcastMode::PerColN);
            }
        }
        Shape::Matrix { rows, cols } => {
            if cols == 1 && rows == m {
                mode = Some(BroadcastMode::MatrixMx1);
            }
            if cols == n && rows == m {
                mode = Some(BroadcastMode::MatrixMxN);
            }
            if cols == n && rows == 1 {
                mode = Some(BroadcastMode::Matrix1xN);
            }
        }
        Shape::Planes { .. } => {}
    }

    mode.unwrap_or_else(|| {
        log::warn!(
            "bias shape {:?} does not broadcast to {}x{}, treating it as elementwise",
            shape,
            m,
            n
        );
        BroadcastMode::MatrixMxN
    })
}

/// A bias converted to `f32`, scaled by beta and classified.
///
/// `MatrixMxN` values may be stored with interleaved rows (`lane_pack`);
/// every other mode is a plain vector.
#[derive(Debug)]
pub struct ResolvedBias {
    mode: BroadcastMode,
    values: Buffer<f32>,
    lane_pack: usize,
    n: usize,
}

impl ResolvedBias {
    /// Prepare a bias supplied with a forward call. Returns `None` for an
    /// empty bias.
    pub fn from_runtime(
        bias: &Matrix,
        m: usize,
        n: usize,
        beta: f32,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<Option<Self>> {
        Self::prepare(bias, m, n, beta, false, allocator)
    }

    /// Prepare a constant bias once at pipeline creation, choosing a lane
    /// width from the broadcast extent when packing layout is enabled.
    pub fn from_constant(
        bias: &Matrix,
        m: usize,
        n: usize,
        beta: f32,
        use_packing_layout: bool,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<Option<Self>> {
        Self::prepare(bias, m, n, beta, use_packing_layout, allocator)
    }

    fn prepare(
        bias: &Matrix,
        m: usize,
        n: usize,
        beta: f32,
        use_packing_layout: bool,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<Option<Self>> {
        let mode = resolve_broadcast(Some(bias.shape()), m, n);
        if mode == BroadcastMode::None {
            return Ok(None);
        }
        if bias.is_released() {
            return Err(GemmError::OperandReleased("C"));
        }
        if mode == BroadcastMode::MatrixMxN && bias.total() < m * n {
            return Err(GemmError::BiasShape {
                len: bias.total(),
                m,
                n,
            });
        }

        let extent = match mode {
            BroadcastMode::PerRowM | BroadcastMode::MatrixMx1 | BroadcastMode::MatrixMxN => m,
            BroadcastMode::PerColN | BroadcastMode::Matrix1xN => n,
            BroadcastMode::Scalar | BroadcastMode::None => 1,
        };
        // A fallback MxN bias is read flat, never interleaved
        let exact_mxn = bias.rows() == m && bias.cols() == n;
        let lane_pack = if use_packing_layout
            && extent % 4 == 0
            && (mode != BroadcastMode::MatrixMxN || exact_mxn)
        {
            4
        } else {
            1
        };
        // Vectors and single rows/columns are identical under interleaving
        let interleave = mode == BroadcastMode::MatrixMxN && lane_pack > 1;

        let mut values = Buffer::<f32>::zeroed(bias.total(), allocator)?;
        let cols = bias.cols();
        for r in 0..bias.rows() {
            for c in 0..cols {
                let idx = if interleave {
                    ((r / lane_pack) * cols + c) * lane_pack + r % lane_pack
                } else {
                    r * cols + c
                };
                values[idx] = bias.get(r, c);
            }
        }

        // Pre-multiply once instead of per output element
        if beta != 1.0 {
            values.iter_mut().for_each(|v| *v *= beta);
        }

        Ok(Some(Self {
            mode,
            values,
            lane_pack,
            n,
        }))
    }

    pub fn mode(&self) -> BroadcastMode {
        self.mode
    }

    pub fn lane_pack(&self) -> usize {
        self.lane_pack
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Bias contribution for output element `(i, j)`, already scaled by beta.
    #[inline]
    pub fn value(&self, i: usize, j: usize) -> f32 {
        match self.mode {
            BroadcastMode::None => 0.0,
            BroadcastMode::Scalar => self.values[0],
            BroadcastMode::PerRowM | BroadcastMode::MatrixMx1 => self.values[i],
            BroadcastMode::PerColN | BroadcastMode::Matrix1xN => self.values[j],
            BroadcastMode::MatrixMxN => {
                let lane = self.lane_pack;
                self.values[((i / lane) * self.n + j) * lane + i % lane]
            }
        }
    }
}
