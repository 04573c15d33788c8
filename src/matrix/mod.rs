//! Operands, allocators and the reference implementation.
//!
//! - `operand`: shaped, lane-packed, precision-tagged [`Matrix`]
//! - `alloc`: pluggable byte accounting and the [`Buffer`] it backs
//! - `naive`: triple-loop reference multiply used as a correctness baseline
//! - `transpose`: out-of-place transpose of slices and operands

pub mod alloc;
pub mod naive;
pub mod operand;
pub mod transpose;

pub use alloc::{Allocator, BoundedAllocator, Buffer, HeapAllocator};
pub use operand::{Matrix, Shape, Storage};
