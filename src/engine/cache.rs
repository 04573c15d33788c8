//! Pre-packed constant operands.
//!
//! Written once by [`Gemm::create_pipeline`](crate::Gemm::create_pipeline)
//! and only read afterwards. The borrow checker enforces the ordering:
//! packing needs `&mut Gemm`, forward calls take `&Gemm`.

use std::sync::Arc;

use half::f16;

use crate::blocked::pack::{PanelView, Side};
use crate::blocked::{ResolvedBias, TileSizes, optimal_tiles};
use crate::error::{GemmError, Result};
use crate::matrix::{Allocator, Matrix, Storage};
use crate::precision::{Element, Precision};
use crate::threaded::WorkerPool;
use crate::threaded::driver::pack_panels;

/// One operand packed into panels for every (tile, K block) pair.
///
/// Tagged with the tile sizes and thread count it was built with; a
/// forward call must reuse that geometry to read it.
#[derive(Debug)]
pub struct PackedOperand {
    side: Side,
    storage: Storage,
    tiles: TileSizes,
    threads: usize,
    outer: usize,
    k: usize,
    trans: bool,
}

impl PackedOperand {
    /// Pack all of `src` as operand `side`.
    ///
    /// Tile sizes are chosen with the other operand's extent unknown, so
    /// A fixes `tile_m`/`tile_k` and B fixes `tile_n`/`tile_k`. For A,
    /// `row_lane` is the widest output lane packing the rows must align
    /// to; B ignores it.
    pub fn pack(
        side: Side,
        src: &Matrix,
        trans: bool,
        precision: Precision,
        row_lane: usize,
        pool: &WorkerPool,
        allocator: &Arc<dyn Allocator>,
    ) -> Result<Self> {
        let (outer, k) = operand_extents(side, src, trans);
        let threads = pool.threads();
        let tiles = match side {
            Side::A => optimal_tiles(outer, 0, k, threads).align_rows(outer, row_lane),
            Side::B => optimal_tiles(0, outer, k, threads),
        };
        let (tile_outer, nn_outer) = match side {
            Side::A => (tiles.tile_m, tiles.m_tiles(outer)),
            Side::B => (tiles.tile_n, tiles.n_tiles(outer)),
        };
        let len = nn_outer * tiles.k_blocks(k) * tile_outer * tiles.tile_k;

        let mut storage = Storage::zeroed(precision, len, allocator)?;
        match &mut storage {
            Storage::Half(buf) => {
                pack_panels::<f16>(pool, side, src, trans, outer, k, &tiles, buf.as_mut_slice())?
            }
            Storage::Single(buf) => {
                pack_panels::<f32>(pool, side, src, trans, outer, k, &tiles, buf.as_mut_slice())?
            }
        }

        log::debug!(
            "packed constant {} ({}x{}, {:?}) into {} panels of {}x{}",
            side.name(),
            outer,
            k,
            precision,
            nn_outer * tiles.k_blocks(k),
            tile_outer,
            tiles.tile_k
        );

        Ok(Self {
            side,
            storage,
            tiles,
            threads,
            outer,
            k,
            trans,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn tiles(&self) -> TileSizes {
        self.tiles
    }

    /// Thread count the tile sizes were chosen for
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// M for A, N for B
    pub fn outer(&self) -> usize {
        self.outer
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Whether the source was read transposed
    pub fn trans(&self) -> bool {
        self.trans
    }

    pub fn precision(&self) -> Precision {
        self.storage.precision()
    }

    /// Packed size in bytes
    pub fn byte_size(&self) -> usize {
        self.storage.len() * self.precision().elem_size()
    }

    /// Typed view of the panels.
    ///
    /// # Errors
    ///
    /// `PrecisionMismatch` if the panels were packed at another precision.
    pub fn panels<P: Element>(&self) -> Result<PanelView<'_, P>> {
        let data = P::view(&self.storage).ok_or(GemmError::PrecisionMismatch {
            expected: P::PRECISION,
            got: self.precision(),
        })?;
        let tile_outer = match self.side {
            Side::A => self.tiles.tile_m,
            Side::B => self.tiles.tile_n,
        };
        Ok(PanelView::new(
            data,
            tile_outer * self.tiles.tile_k,
            self.tiles.k_blocks(self.k),
        ))
    }
}

/// `(outer, k)` of an operand: `(M, K)` for A, `(N, K)` for B.
pub fn operand_extents(side: Side, src: &Matrix, trans: bool) -> (usize, usize) {
    match (side, trans) {
        (Side::A, false) => (src.rows(), src.cols()),
        (Side::A, true) => (src.cols(), src.rows()),
        (Side::B, false) => (src.cols(), src.rows()),
        (Side::B, true) => (src.rows(), src.cols()),
    }
}

/// Everything built at pipeline creation.
#[derive(Debug, Default)]
pub struct PrePackedCache {
    pub(crate) a: Option<PackedOperand>,
    pub(crate) b: Option<PackedOperand>,
    /// `Some(None)` for a constant bias that turned out empty
    pub(crate) bias: Option<Option<ResolvedBias>>,
    pub(crate) threads: Option<usize>,
    pub(crate) light_mode: bool,
}

impl PrePackedCache {
    pub fn a(&self) -> Option<&PackedOperand> {
        self.a.as_ref()
    }

    pub fn b(&self) -> Option<&PackedOperand> {
        self.b.as_ref()
    }

    /// Resolved constant bias, if one was prepared and is non-empty
    pub fn bias(&self) -> Option<&ResolvedBias> {
        self.bias.as_ref().and_then(Option::as_ref)
    }

    /// Whether a constant bias has been resolved
    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Thread count pinned at pipeline creation
    pub fn threads(&self) -> Option<usize> {
        self.threads
    }

    /// Whether the unpacked constants were released after packing
    pub fn is_light_mode(&self) -> bool {
        self.light_mode
    }

    /// Total bytes held by packed panels and the cached bias
    pub fn byte_size(&self) -> usize {
        let packed: usize = [&self.a, &self.b]
            .into_iter()
            .flatten()
            .map(PackedOperand::byte_size)
            .sum();
        packed + self.bias().map_or(0, |b| std::mem::size_of_val(b.values()))
    }
}
