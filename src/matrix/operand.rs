//! GEMM operands: shaped, lane-packed, precision-tagged buffers.

use std::sync::Arc;

use half::f16;

use super::alloc::{Allocator, Buffer};
use crate::error::{GemmError, Result};
use crate::precision::{Element, Precision};

/// Logical shape of an operand.
///
/// Rank-3 operands are treated as `channels` rows of `height * width`
/// columns, so a `(M, 1, N)` plane stack is laid out exactly like an
/// `M × N` matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Rank-1 vector of `len` elements
    Vector { len: usize },
    /// Rank-2 matrix
    Matrix { rows: usize, cols: usize },
    /// Rank-3 stack of planes
    Planes {
        channels: usize,
        height: usize,
        width: usize,
    },
}

impl Shape {
    pub fn dims(&self) -> usize {
        match self {
            Shape::Vector { .. } => 1,
            Shape::Matrix { .. } => 2,
            Shape::Planes { .. } => 3,
        }
    }

    pub fn rows(&self) -> usize {
        match *self {
            Shape::Vector { .. } => 1,
            Shape::Matrix { rows, .. } => rows,
            Shape::Planes { channels, .. } => channels,
        }
    }

    pub fn cols(&self) -> usize {
        match *self {
            Shape::Vector { len } => len,
            Shape::Matrix { cols, .. } => cols,
            Shape::Planes { height, width, .. } => height * width,
        }
    }

    /// Logical element count
    pub fn total(&self) -> usize {
        self.rows() * self.cols()
    }
}

/// Backing storage of an operand.
#[derive(Debug, Clone)]
pub enum Storage {
    Half(Buffer<f16>),
    Single(Buffer<f32>),
}

impl Storage {
    pub fn precision(&self) -> Precision {
        match self {
            Storage::Half(_) => Precision::Half,
            Storage::Single(_) => Precision::Single,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::Half(buf) => buf.len(),
            Storage::Single(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a zero-filled buffer of the given precision
    pub fn zeroed(precision: Precision, len: usize, allocator: &Arc<dyn Allocator>) -> Result<Self> {
        Ok(match precision {
            Precision::Half => Storage::Half(Buffer::zeroed(len, allocator)?),
            Precision::Single => Storage::Single(Buffer::zeroed(len, allocator)?),
        })
    }

    #[inline]
    fn get_f32(&self, idx: usize) -> f32 {
        match self {
            Storage::Half(buf) => buf[idx].to_f32(),
            Storage::Single(buf) => buf[idx],
        }
    }
}

/// A rectangular operand.
///
/// Rows of rank-2 and rank-3 operands may be interleaved in groups of
/// `lane_pack` for vector access: logical element `(r, c)` lives at
/// `((r / lane) * cols + c) * lane + r % lane`. Rank-1 operands keep their
/// logical order regardless of lane width.
#[derive(Debug, Clone)]
pub struct Matrix {
    shape: Shape,
    lane_pack: usize,
    storage: Option<Storage>,
}

impl Matrix {
    /// Wrap row-major `f32` data as a `rows × cols` matrix.
    pub fn from_f32(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        Self::with_storage(
            Shape::Matrix { rows, cols },
            Storage::Single(Buffer::from_vec(data)),
        )
    }

    /// Wrap row-major half precision data as a `rows × cols` matrix.
    pub fn from_f16(rows: usize, cols: usize, data: Vec<f16>) -> Result<Self> {
        Self::with_storage(
            Shape::Matrix { rows, cols },
            Storage::Half(Buffer::from_vec(data)),
        )
    }

    /// Rank-1 `f32` vector.
    pub fn vector_f32(data: Vec<f32>) -> Self {
        Self {
            shape: Shape::Vector { len: data.len() },
            lane_pack: 1,
            storage: Some(Storage::Single(Buffer::from_vec(data))),
        }
    }

    /// Single-element rank-1 operand.
    pub fn scalar(value: f32) -> Self {
        Self::vector_f32(vec![value])
    }

    /// Build from an arbitrary shape and storage in logical order.
    pub fn with_storage(shape: Shape, storage: Storage) -> Result<Self> {
        if storage.len() != shape.total() {
            return Err(GemmError::ShapeMismatch {
                what: "operand data length",
                expected: shape.total(),
                got: storage.len(),
            });
        }
        Ok(Self {
            shape,
            lane_pack: 1,
            storage: Some(storage),
        })
    }

    /// Zero-filled operand with the given lane width, charged to `allocator`.
    pub fn zeros(
        shape: Shape,
        precision: Precision,
        lane_pack: usize,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<Self> {
        check_lane_pack(&shape, lane_pack)?;
        Ok(Self {
            shape,
            lane_pack,
            storage: Some(Storage::zeroed(precision, shape.total(), allocator)?),
        })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn dims(&self) -> usize {
        self.shape.dims()
    }

    pub fn rows(&self) -> usize {
        self.shape.rows()
    }

    pub fn cols(&self) -> usize {
        self.shape.cols()
    }

    pub fn lane_pack(&self) -> usize {
        self.lane_pack
    }

    /// Logical element count; physical size is the same, only the order differs.
    pub fn total(&self) -> usize {
        self.shape.total()
    }

    /// Storage precision, or `None` once released
    pub fn precision(&self) -> Option<Precision> {
        self.storage.as_ref().map(Storage::precision)
    }

    /// Bytes per stored lane group
    pub fn elem_size(&self) -> usize {
        self.precision().map_or(0, Precision::elem_size) * self.lane_pack
    }

    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    pub(crate) fn storage_mut(&mut self) -> Option<&mut Storage> {
        self.storage.as_mut()
    }

    /// Typed view of the physical data.
    pub fn data<T: Element>(&self) -> Option<&[T]> {
        self.storage.as_ref().and_then(T::view)
    }

    /// True when there is no data: zero-sized or released.
    pub fn is_empty(&self) -> bool {
        self.storage.as_ref().is_none_or(Storage::is_empty)
    }

    pub fn is_released(&self) -> bool {
        self.storage.is_none()
    }

    /// Drop the backing buffer. Shape is kept for diagnostics.
    pub fn release(&mut self) {
        self.storage = None;
    }

    /// Physical index of logical element `(r, c)`.
    #[inline]
    pub fn physical_index(&self, r: usize, c: usize) -> usize {
        match self.shape {
            Shape::Vector { .. } => c,
            _ => {
                let lane = self.lane_pack;
                ((r / lane) * self.cols() + c) * lane + r % lane
            }
        }
    }

    /// Read logical element `(r, c)` widened to `f32`.
    ///
    /// # Panics
    ///
    /// Panics if the operand was released or the index is out of bounds.
    pub fn get(&self, r: usize, c: usize) -> f32 {
        let storage = self
            .storage
            .as_ref()
            .unwrap_or_else(|| panic!("read from released operand"));
        storage.get_f32(self.physical_index(r, c))
    }

    /// Re-layout into a different lane width, keeping precision.
    pub fn to_lane_packed(&self, lane_pack: usize) -> Result<Matrix> {
        check_lane_pack(&self.shape, lane_pack)?;
        let storage = self.storage.as_ref().ok_or(GemmError::OperandReleased("source"))?;

        let n = self.total();
        let relaid = match storage {
            Storage::Half(src) => {
                let mut dst = vec![f16::ZERO; n];
                relayout(src, &mut dst, &self.shape, self.lane_pack, lane_pack);
                Storage::Half(Buffer::from_vec(dst))
            }
            Storage::Single(src) => {
                let mut dst = vec![0.0f32; n];
                relayout(src, &mut dst, &self.shape, self.lane_pack, lane_pack);
                Storage::Single(Buffer::from_vec(dst))
            }
        };

        Ok(Matrix {
            shape: self.shape,
            lane_pack,
            storage: Some(relaid),
        })
    }

    /// Logical row-major copy widened to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.total());
        for r in 0..self.rows() {
            for c in 0..self.cols() {
                out.push(self.get(r, c));
            }
        }
        out
    }
}

fn check_lane_pack(shape: &Shape, lane_pack: usize) -> Result<()> {
    let rows = match shape {
        Shape::Vector { len } => *len,
        _ => shape.rows(),
    };
    if lane_pack == 0 || rows % lane_pack != 0 {
        return Err(GemmError::InvalidLanePack {
            rows,
            width: lane_pack,
        });
    }
    Ok(())
}

fn relayout<T: Copy>(src: &[T], dst: &mut [T], shape: &Shape, from: usize, to: usize) {
    if let Shape::Vector { .. } = shape {
        dst.copy_from_slice(src);
        return;
    }
    let cols = shape.cols();
    for r in 0..shape.rows() {
        for c in 0..cols {
            let s = ((r / from) * cols + c) * from + r % from;
            let d = ((r / to) * cols + c) * to + r % to;
            dst[d] = src[s];
        }
    }
}
