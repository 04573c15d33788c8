//! Operand packing.
//!
//! A panel holds one tile of op(A) or op(B) restricted to one K block,
//! laid out K-major so the tile kernel streams it front to back:
//!
//! - A panel: `dst[p * max_ii + r] = op(A)[i + r][k + p]`
//! - B panel: `dst[p * max_jj + c] = op(B)[k + p][j + c]`
//!
//! Edge tiles are packed at their true size; nothing outside the operand
//! is read and no padding element enters the arithmetic. Precision is
//! converted on the way through [`Element::from_f32`].

use half::f16;

use crate::error::{GemmError, Result};
use crate::matrix::{Matrix, Storage};
use crate::precision::Element;

/// Pack rows `i..i + max_ii` of op(A) over K range `k..k + max_kk`.
///
/// With `trans_a` the operand is stored K×M and column `i + r` of the
/// storage becomes row `r` of the panel.
#[allow(clippy::too_many_arguments)]
pub fn pack_a_tile<P: Element>(
    a: &Matrix,
    dst: &mut [P],
    trans_a: bool,
    i: usize,
    max_ii: usize,
    k: usize,
    max_kk: usize,
) -> Result<()> {
    pack_dispatch(a, dst, trans_a, i, max_ii, k, max_kk, "A")
}

/// Pack columns `j..j + max_jj` of op(B) over K range `k..k + max_kk`.
///
/// Without `trans_b` the operand is stored K×N and read across rows; with
/// it the operand is stored N×K and each storage row is one panel column.
#[allow(clippy::too_many_arguments)]
pub fn pack_b_tile<P: Element>(
    b: &Matrix,
    dst: &mut [P],
    trans_b: bool,
    j: usize,
    max_jj: usize,
    k: usize,
    max_kk: usize,
) -> Result<()> {
    pack_dispatch(b, dst, !trans_b, j, max_jj, k, max_kk, "B")
}

/// Which operand a panel is cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn name(self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }
}

/// Pack one panel of either operand; `outer` indexes M for A and N for B.
#[allow(clippy::too_many_arguments)]
pub fn pack_tile<P: Element>(
    side: Side,
    src: &Matrix,
    dst: &mut [P],
    trans: bool,
    outer: usize,
    max_outer: usize,
    k: usize,
    max_kk: usize,
) -> Result<()> {
    match side {
        Side::A => pack_a_tile(src, dst, trans, outer, max_outer, k, max_kk),
        Side::B => pack_b_tile(src, dst, trans, outer, max_outer, k, max_kk),
    }
}

/// Read-only view over a grid of packed panels.
///
/// Panels are stored tile-major, K block minor, each in a fixed slot of
/// `panel_len` elements: panel `(tile, kb)` starts at
/// `(tile * k_blocks + kb) * panel_len`.
#[derive(Debug, Clone, Copy)]
pub struct PanelView<'a, P> {
    data: &'a [P],
    panel_len: usize,
    k_blocks: usize,
}

impl<'a, P> PanelView<'a, P> {
    pub fn new(data: &'a [P], panel_len: usize, k_blocks: usize) -> Self {
        Self {
            data,
            panel_len,
            k_blocks,
        }
    }

    #[inline]
    pub fn panel(&self, tile: usize, kb: usize) -> &'a [P] {
        let start = (tile * self.k_blocks + kb) * self.panel_len;
        &self.data[start..start + self.panel_len]
    }
}

#[allow(clippy::too_many_arguments)]
fn pack_dispatch<P: Element>(
    src: &Matrix,
    dst: &mut [P],
    swap: bool,
    outer: usize,
    max_outer: usize,
    k: usize,
    max_kk: usize,
    name: &'static str,
) -> Result<()> {
    let (outer_extent, k_extent) = if swap {
        (src.cols(), src.rows())
    } else {
        (src.rows(), src.cols())
    };
    if outer + max_outer > outer_extent {
        return Err(GemmError::ShapeMismatch {
            what: "packed tile rows",
            expected: outer_extent,
            got: outer + max_outer,
        });
    }
    if k + max_kk > k_extent {
        return Err(GemmError::ShapeMismatch {
            what: "packed tile depth",
            expected: k_extent,
            got: k + max_kk,
        });
    }

    match src.storage() {
        Some(Storage::Half(data)) => {
            pack_panel::<f16, P>(src, data, dst, swap, outer, max_outer, k, max_kk)
        }
        Some(Storage::Single(data)) => {
            pack_panel::<f32, P>(src, data, dst, swap, outer, max_outer, k, max_kk)
        }
        None => return Err(GemmError::OperandReleased(name)),
    }
    Ok(())
}

/// `dst[p * max_outer + o] = src(outer + o, k + p)`, read through the
/// transpose `swap` and the source lane layout.
#[allow(clippy::too_many_arguments)]
#[inline]
fn pack_panel<S: Element, D: Element>(
    src: &Matrix,
    data: &[S],
    dst: &mut [D],
    swap: bool,
    outer: usize,
    max_outer: usize,
    k: usize,
    max_kk: usize,
) {
    let panel = &mut dst[..max_outer * max_kk];

    for (p, row) in panel.chunks_exact_mut(max_outer).enumerate() {
        for (o, slot) in row.iter_mut().enumerate() {
            let idx = if swap {
                src.physical_index(k + p, outer + o)
            } else {
                src.physical_index(outer + o, k + p)
            };
            *slot = D::from_f32(data[idx].to_f32());
        }
    }
}
