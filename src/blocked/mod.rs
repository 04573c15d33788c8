//! Cache blocking: tile selection, panel packing and bias broadcasting.
//!
//! These pieces turn a logical M×N×K multiply into a grid of tiles the
//! kernel can stream through cache:
//! - `tile`: deterministic choice of `TILE_M × TILE_N × TILE_K`
//! - `pack`: copies operand sub-regions into K-major panels, transposing
//!   and converting precision on the way
//! - `broadcast`: classifies and prepares the bias operand

pub mod broadcast;
pub mod pack;
pub mod tile;

pub use broadcast::{BroadcastMode, ResolvedBias, resolve_broadcast};
pub use tile::{TileSizes, optimal_tiles};
