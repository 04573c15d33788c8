//! Tile microkernel for the inner loop of the blocked GEMM.
//!
//! The kernel multiplies one packed A panel by one packed B panel for a
//! single K block. Across K blocks it carries partial sums in a per-thread
//! `f32` scratch tile; on the last block it applies alpha, adds the bias
//! and casts into the output.
//!
//! Every output element is accumulated with fused multiply-add in strictly
//! increasing K order, so the AVX2 path and the scalar path produce the
//! same bits, and so does any grouping of K into blocks.

pub mod tile_kernel;

pub use tile_kernel::{OutputTile, TileArgs, compute_tile};
