//! The tiled, multi-threaded GEMM driver.
//!
//! One driver serves all four combinations of runtime and pre-packed
//! operands. A call runs in at most two parallel phases:
//!
//! 1. **Pack B**: only when B is supplied at runtime. Workers split the
//!    N-tile grid and pack every K block of their tiles into a shared
//!    workspace. The phase ends with a barrier.
//! 2. **Compute**: workers split the M-tile grid statically. For each row
//!    tile a worker walks N tiles outer and K blocks inner, packing its A
//!    panels on the first N tile only and reusing them for the rest.
//!
//! Output row tiles are disjoint, so the compute phase needs no locking.
//! Every buffer is allocated before either phase starts.

use std::sync::Arc;

use super::pool::WorkerPool;
use crate::blocked::pack::{PanelView, Side, pack_a_tile, pack_tile};
use crate::blocked::{ResolvedBias, TileSizes, optimal_tiles};
use crate::engine::cache::PackedOperand;
use crate::error::{GemmError, Result};
use crate::kernels::{OutputTile, TileArgs, compute_tile};
use crate::matrix::{Allocator, Buffer, Matrix};
use crate::precision::Element;

/// Where an operand comes from for this call.
#[derive(Debug, Clone, Copy)]
pub enum OperandSource<'a> {
    /// Supplied with the call; packed on the fly
    Runtime(&'a Matrix),
    /// Packed once at pipeline creation; read-only here
    Cached(&'a PackedOperand),
}

impl OperandSource<'_> {
    fn cached(&self) -> Option<&PackedOperand> {
        match self {
            OperandSource::Cached(packed) => Some(packed),
            OperandSource::Runtime(_) => None,
        }
    }
}

/// Problem dimensions and scalars for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmParams {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub trans_a: bool,
    pub trans_b: bool,
    pub alpha: f32,
}

/// Packs one A tile: `(src, dst, trans_a, i, max_ii, k, max_kk)`.
type PackA<'f, P> = dyn Fn(&Matrix, &mut [P], bool, usize, usize, usize, usize) -> Result<()> + Sync + 'f;

/// Per-worker private buffers for the compute phase.
struct WorkerState<P> {
    /// All K-block panels of the row tile in flight
    a_panels: Option<Buffer<P>>,
    /// Partial sums across K blocks; only when there is more than one
    scratch: Option<Buffer<f32>>,
}

/// Compute `out = alpha * op(A) * op(B) + bias` into `out`.
///
/// `out` holds the `m × n` result with rows interleaved in groups of
/// `out_lane`. `P` is the precision panels are packed at; a cached
/// operand must have been packed at the same precision.
#[allow(clippy::too_many_arguments)]
pub fn run_gemm<P: Element, O: Element>(
    a: OperandSource<'_>,
    b: OperandSource<'_>,
    bias: Option<&ResolvedBias>,
    out: &mut [O],
    out_lane: usize,
    params: &GemmParams,
    pool: &WorkerPool,
    workspace: &Arc<dyn Allocator>,
) -> Result<()> {
    run_gemm_with(a, b, bias, out, out_lane, params, pool, workspace, &pack_a_tile::<P>)
}

#[allow(clippy::too_many_arguments)]
fn run_gemm_with<P: Element, O: Element>(
    a: OperandSource<'_>,
    b: OperandSource<'_>,
    bias: Option<&ResolvedBias>,
    out: &mut [O],
    out_lane: usize,
    params: &GemmParams,
    pool: &WorkerPool,
    workspace: &Arc<dyn Allocator>,
    pack_a: &PackA<'_, P>,
) -> Result<()> {
    let GemmParams { m, n, k, .. } = *params;
    if out.len() != m * n {
        return Err(GemmError::ShapeMismatch {
            what: "output length",
            expected: m * n,
            got: out.len(),
        });
    }
    if m == 0 || n == 0 {
        return Ok(());
    }

    let tiles = select_tiles(a, b, params, out_lane, pool.threads())?;
    let TileSizes {
        tile_m,
        tile_n,
        tile_k,
    } = tiles;
    let nn_m = tiles.m_tiles(m);
    let nn_n = tiles.n_tiles(n);
    let nn_k = tiles.k_blocks(k);

    log::debug!(
        "gemm {}x{}x{} on {} threads: tiles {}x{}x{}, A {}, B {}",
        m,
        n,
        k,
        pool.threads(),
        tile_m,
        tile_n,
        tile_k,
        if a.cached().is_some() { "cached" } else { "runtime" },
        if b.cached().is_some() { "cached" } else { "runtime" },
    );

    // Workspace first: nothing runs unless everything fits
    let a_panel_len = tile_m * tile_k;
    let b_panel_len = tile_n * tile_k;
    let mut b_workspace = match b {
        OperandSource::Runtime(_) => Some(Buffer::<P>::zeroed(nn_n * nn_k * b_panel_len, workspace)?),
        OperandSource::Cached(_) => None,
    };
    let mut states = Vec::with_capacity(pool.threads());
    for _ in 0..pool.threads() {
        let a_panels = match a {
            OperandSource::Runtime(_) => Some(Buffer::<P>::zeroed(nn_k * a_panel_len, workspace)?),
            OperandSource::Cached(_) => None,
        };
        let scratch = if nn_k > 1 {
            Some(Buffer::<f32>::zeroed(tile_m * tile_n, workspace)?)
        } else {
            None
        };
        states.push(WorkerState { a_panels, scratch });
    }

    if let (OperandSource::Runtime(b_src), Some(dst)) = (b, b_workspace.as_mut()) {
        pack_panels(pool, Side::B, b_src, params.trans_b, n, k, &tiles, dst)?;
        log::trace!("packed {} B tiles", nn_n);
    }

    let a_view = match a {
        OperandSource::Cached(packed) => Some(packed.panels::<P>()?),
        OperandSource::Runtime(_) => None,
    };
    let b_view = match (b, b_workspace.as_ref()) {
        (OperandSource::Cached(packed), _) => packed.panels::<P>()?,
        (OperandSource::Runtime(_), Some(buf)) => PanelView::new(buf.as_slice(), b_panel_len, nn_k),
        (OperandSource::Runtime(_), None) => return Err(GemmError::PipelineNotCreated("B")),
    };

    let row_tiles: Vec<&mut [O]> = out.chunks_mut(tile_m * n).collect();
    debug_assert_eq!(row_tiles.len(), nn_m);

    pool.run_static(row_tiles, states, |state, it, out_rows| {
        let i = it * tile_m;
        let max_ii = (m - i).min(tile_m);
        let mut out_tile = OutputTile::new(out_rows, n, out_lane);
        let WorkerState { a_panels, scratch } = state;

        for jt in 0..nn_n {
            let j = jt * tile_n;
            let max_jj = (n - j).min(tile_n);

            for kb in 0..nn_k {
                let kk = kb * tile_k;
                let max_kk = k.saturating_sub(kk).min(tile_k);

                let a_panel: &[P] = match (a, a_view, a_panels.as_mut()) {
                    (_, Some(view), _) => view.panel(it, kb),
                    (OperandSource::Runtime(a_src), None, Some(panels)) => {
                        let slot = &mut panels[kb * a_panel_len..(kb + 1) * a_panel_len];
                        // A panels do not depend on the N tile
                        if jt == 0 {
                            pack_a(a_src, slot, params.trans_a, i, max_ii, kk, max_kk)?;
                        }
                        slot
                    }
                    _ => return Err(GemmError::PipelineNotCreated("A")),
                };

                let args = TileArgs {
                    bias,
                    alpha: params.alpha,
                    i,
                    max_ii,
                    j,
                    max_jj,
                    max_kk,
                    k_begin: kb == 0,
                    k_end: kb + 1 == nn_k,
                };
                compute_tile(
                    a_panel,
                    b_view.panel(jt, kb),
                    scratch.as_deref_mut(),
                    &args,
                    &mut out_tile,
                );
            }
        }
        Ok(())
    })
}

/// Pack a whole operand into fixed-size panel slots, one worker per
/// outer tile range.
///
/// `outer` is M for A and N for B. `dst` must hold
/// `outer_tiles * k_blocks * outer_tile * tile_k` elements.
#[allow(clippy::too_many_arguments)]
pub(crate) fn pack_panels<P: Element>(
    pool: &WorkerPool,
    side: Side,
    src: &Matrix,
    trans: bool,
    outer: usize,
    k: usize,
    tiles: &TileSizes,
    dst: &mut [P],
) -> Result<()> {
    let (tile_outer, nn_outer) = match side {
        Side::A => (tiles.tile_m, tiles.m_tiles(outer)),
        Side::B => (tiles.tile_n, tiles.n_tiles(outer)),
    };
    let nn_k = tiles.k_blocks(k);
    let panel_len = tile_outer * tiles.tile_k;

    if dst.len() < nn_outer * nn_k * panel_len {
        return Err(GemmError::ShapeMismatch {
            what: "packed panel buffer",
            expected: nn_outer * nn_k * panel_len,
            got: dst.len(),
        });
    }

    let tiles_out: Vec<&mut [P]> = dst.chunks_mut(nn_k * panel_len).take(nn_outer).collect();
    let states: Vec<()> = vec![(); pool.threads()];

    pool.run_static(tiles_out, states, |_, t, panels| {
        let o = t * tile_outer;
        let max_oo = (outer - o).min(tile_outer);
        for (kb, slot) in panels.chunks_mut(panel_len).enumerate() {
            let kk = kb * tiles.tile_k;
            let max_kk = k.saturating_sub(kk).min(tiles.tile_k);
            pack_tile(side, src, slot, trans, o, max_oo, kk, max_kk)?;
        }
        Ok(())
    })
}

/// Tile sizes for this call, taking the geometry of cached operands as
/// fixed.
fn select_tiles(
    a: OperandSource<'_>,
    b: OperandSource<'_>,
    params: &GemmParams,
    out_lane: usize,
    threads: usize,
) -> Result<TileSizes> {
    let GemmParams { m, n, k, .. } = *params;
    let mut tiles = optimal_tiles(m, n, k, threads);

    if let Some(packed) = a.cached() {
        check_cached(packed, m, k)?;
        tiles.tile_m = packed.tiles().tile_m;
        tiles.tile_k = packed.tiles().tile_k;
    }
    if let Some(packed) = b.cached() {
        check_cached(packed, n, k)?;
        if a.cached().is_some() && packed.tiles().tile_k != tiles.tile_k {
            return Err(GemmError::ShapeMismatch {
                what: "tile_k",
                expected: tiles.tile_k,
                got: packed.tiles().tile_k,
            });
        }
        tiles.tile_n = packed.tiles().tile_n;
        tiles.tile_k = packed.tiles().tile_k;
    }

    // Each row tile must start on a lane group of the output
    if tiles.tile_m < m && tiles.tile_m % out_lane != 0 {
        if a.cached().is_some() {
            return Err(GemmError::InvalidLanePack {
                rows: tiles.tile_m,
                width: out_lane,
            });
        }
        tiles = tiles.align_rows(m, out_lane);
    }

    Ok(tiles)
}

fn check_cached(packed: &PackedOperand, outer: usize, k: usize) -> Result<()> {
    if packed.outer() != outer {
        return Err(GemmError::ShapeMismatch {
            what: match packed.side() {
                Side::A => "cached A rows",
                Side::B => "cached B columns",
            },
            expected: outer,
            got: packed.outer(),
        });
    }
    if packed.k() != k {
        return Err(GemmError::ShapeMismatch {
            what: "K",
            expected: k,
            got: packed.k(),
        });
    }
    Ok(())
}
