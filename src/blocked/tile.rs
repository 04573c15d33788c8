//! Tile size selection.
//!
//! The only contract is: every tile is at least 1×1×1, `tile_k <= K`, the
//! result is a pure function of `(M, N, K, threads)`, row tiles are a
//! multiple of [`LANE`] unless one tile covers all of M, and there are
//! enough row tiles to give every thread work when M allows it. The cached
//! packed operands rely on the determinism: a constant A packed at load
//! time must see the same `tile_m`/`tile_k` the forward call computes.

/// Row/column granularity of tiles; matches the widest lane packing.
pub const LANE: usize = 4;

/// Upper bound for K per block (keeps one A and one B panel in L1/L2)
const MAX_TILE_K: usize = 256;

/// Upper bound for rows per tile
const MAX_TILE_M: usize = 64;

/// Tile size used for a dimension not known yet (0)
const DEFAULT_TILE_N: usize = 128;

/// Budget for one packed B panel, in bytes
const B_PANEL_BYTES: usize = 128 * 1024;

/// Tile dimensions for one GEMM problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSizes {
    pub tile_m: usize,
    pub tile_n: usize,
    pub tile_k: usize,
}

impl TileSizes {
    /// Number of row tiles covering `m`
    pub fn m_tiles(&self, m: usize) -> usize {
        m.div_ceil(self.tile_m)
    }

    /// Number of column tiles covering `n`
    pub fn n_tiles(&self, n: usize) -> usize {
        n.div_ceil(self.tile_n)
    }

    /// Number of K blocks covering `k`, at least one so that `K == 0`
    /// still runs the epilogue
    pub fn k_blocks(&self, k: usize) -> usize {
        k.div_ceil(self.tile_k).max(1)
    }

    /// Grow `tile_m` so every row tile of an `m`-row output starts on a
    /// group of `lane` interleaved rows. Capped at `m` (one tile).
    pub fn align_rows(mut self, m: usize, lane: usize) -> Self {
        let lane = lane.max(1);
        if self.tile_m < m && self.tile_m % lane != 0 {
            self.tile_m = round_up(self.tile_m, lane).min(m);
        }
        self
    }
}

/// Pick tile sizes for an `m × n × k` multiply on `threads` workers.
///
/// `m` or `n` may be 0 when only one operand is known (constant packing);
/// the corresponding tile then falls back to a default.
pub fn optimal_tiles(m: usize, n: usize, k: usize, threads: usize) -> TileSizes {
    let threads = threads.max(1);
    let tile_k = choose_tile_k(k);

    let tile_m = if m == 0 {
        MAX_TILE_M
    } else {
        // Enough row tiles that each thread gets at least one
        let per_thread = m.div_ceil(threads);
        round_up(per_thread, LANE).min(MAX_TILE_M).min(m)
    };

    let tile_n = {
        let cap = (B_PANEL_BYTES / (tile_k * std::mem::size_of::<f32>())) / LANE * LANE;
        let cap = cap.clamp(LANE, 2 * DEFAULT_TILE_N);
        if n == 0 {
            DEFAULT_TILE_N.min(cap)
        } else {
            round_up(n, LANE).min(cap).min(n)
        }
    };

    TileSizes {
        tile_m: tile_m.max(1),
        tile_n: tile_n.max(1),
        tile_k,
    }
}

/// Split K into equal blocks no larger than `MAX_TILE_K`.
fn choose_tile_k(k: usize) -> usize {
    let k = k.max(1);
    if k <= MAX_TILE_K {
        return k;
    }
    let blocks = k.div_ceil(MAX_TILE_K);
    round_up(k.div_ceil(blocks), LANE).min(k)
}

fn round_up(v: usize, to: usize) -> usize {
    v.div_ceil(to) * to
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_are_positive_and_bounded() {
        let shapes = [
            (1, 1, 1, 1),
            (3, 2, 4, 4),
            (17, 33, 1000, 3),
            (1024, 1024, 1024, 8),
            (0, 64, 300, 4),
            (64, 0, 300, 4),
            (5, 7, 0, 2),
        ];

        for (m, n, k, t) in shapes {
            let tiles = optimal_tiles(m, n, k, t);
            assert!(tiles.tile_m >= 1 && tiles.tile_n >= 1 && tiles.tile_k >= 1);
            assert!(tiles.tile_k <= k.max(1), "{:?} for k={}", tiles, k);
            if m > 0 {
                assert!(tiles.tile_m <= m);
                assert!(tiles.tile_m == m || tiles.tile_m % LANE == 0);
            }
            if n > 0 {
                assert!(tiles.tile_n <= n);
            }
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(optimal_tiles(300, 200, 700, 4), optimal_tiles(300, 200, 700, 4));
    }

    #[test]
    fn test_row_tiles_feed_all_threads() {
        for threads in 1..=8 {
            let tiles = optimal_tiles(256, 64, 64, threads);
            assert!(
                tiles.m_tiles(256) >= threads,
                "{} threads got {} row tiles",
                threads,
                tiles.m_tiles(256)
            );
        }
    }

    #[test]
    fn test_constant_packing_tiles_agree_with_forward() {
        // A packed with N unknown must agree on tile_m/tile_k with the real call
        let load = optimal_tiles(100, 0, 600, 4);
        let call = optimal_tiles(100, 37, 600, 4);
        assert_eq!((load.tile_m, load.tile_k), (call.tile_m, call.tile_k));

        // B packed with M unknown must agree on tile_k
        let load_b = optimal_tiles(0, 37, 600, 4);
        assert_eq!(load_b.tile_k, call.tile_k);
    }

    #[test]
    fn test_k_blocks_balanced() {
        let tiles = optimal_tiles(8, 8, 600, 1);
        assert_eq!(tiles.k_blocks(600), 3);
        assert_eq!(tiles.tile_k, 200);

        let empty = optimal_tiles(8, 8, 0, 1);
        assert_eq!(empty.k_blocks(0), 1);
    }

    #[test]
    fn test_align_rows() {
        let tiles = optimal_tiles(16, 5, 8, 4);
        assert_eq!(tiles.tile_m, 4);

        assert_eq!(tiles.align_rows(16, 1).tile_m, 4);
        assert_eq!(tiles.align_rows(16, 4).tile_m, 4);
        assert_eq!(tiles.align_rows(16, 8).tile_m, 8);
        // Rounding past M collapses to a single tile
        assert_eq!(tiles.align_rows(6, 8).tile_m, 6);
        // K and N are untouched
        assert_eq!(tiles.align_rows(16, 8).tile_k, tiles.tile_k);
        assert_eq!(tiles.align_rows(16, 8).tile_n, tiles.tile_n);
    }
}
