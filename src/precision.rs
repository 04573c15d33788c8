//! Storage precision and the two conversion boundaries.
//!
//! Operands may be stored compactly as IEEE binary16 (`half::f16`) or at full
//! single precision. Accumulation always happens in `f32`; every crossing of
//! the compact/full boundary goes through [`f32_to_f16`] or [`f16_to_f32`].
//! Narrowing rounds to nearest, ties to even.

use half::f16;
use half::slice::HalfFloatSliceExt;

use crate::matrix::Storage;

/// Element storage precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    /// 16-bit IEEE half precision
    Half,
    /// 32-bit IEEE single precision
    Single,
}

impl Precision {
    /// Bytes per element
    pub const fn elem_size(self) -> usize {
        match self {
            Precision::Half => 2,
            Precision::Single => 4,
        }
    }
}

/// Narrow an `f32` to half precision, rounding to nearest even.
#[inline]
pub fn f32_to_f16(v: f32) -> f16 {
    f16::from_f32(v)
}

/// Widen a half precision value to `f32`. Always exact.
#[inline]
pub fn f16_to_f32(v: f16) -> f32 {
    v.to_f32()
}

/// Slice form of [`f32_to_f16`].
///
/// # Panics
///
/// Panics if `src` and `dst` differ in length.
pub fn cast_f32_to_f16(src: &[f32], dst: &mut [f16]) {
    dst.convert_from_f32_slice(src);
}

/// Slice form of [`f16_to_f32`].
///
/// # Panics
///
/// Panics if `src` and `dst` differ in length.
pub fn cast_f16_to_f32(src: &[f16], dst: &mut [f32]) {
    src.convert_to_f32_slice(dst);
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for half::f16 {}
}

/// A storable element type: `f32` or `half::f16`.
///
/// Ties the numeric conversions to the matching [`Storage`] variant so
/// packing and output code can stay generic over precision. Sealed: the
/// kernels rely on `PRECISION` describing the real layout.
///
/// ```compile_fail
/// use tilegemm::matrix::Storage;
/// use tilegemm::precision::{Element, Precision};
///
/// #[derive(Clone, Copy, Default, Debug)]
/// struct Narrow(u8);
///
/// impl Element for Narrow {
///     const PRECISION: Precision = Precision::Single;
///     fn from_f32(v: f32) -> Self { Narrow(v as u8) }
///     fn to_f32(self) -> f32 { self.0 as f32 }
///     fn view(_: &Storage) -> Option<&[Self]> { None }
///     fn view_mut(_: &mut Storage) -> Option<&mut [Self]> { None }
///     fn as_f32_slice(_: &[Self]) -> Option<&[f32]> { None }
/// }
/// ```
pub trait Element: sealed::Sealed + Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Precision tag for this type
    const PRECISION: Precision;

    /// Convert from the accumulator type
    fn from_f32(v: f32) -> Self;

    /// Convert to the accumulator type
    fn to_f32(self) -> f32;

    /// Borrow a storage buffer as this element type, if it matches
    fn view(storage: &Storage) -> Option<&[Self]>;

    /// Mutably borrow a storage buffer as this element type, if it matches
    fn view_mut(storage: &mut Storage) -> Option<&mut [Self]>;

    /// The same slice typed as `f32`, only when `Self` is `f32`
    fn as_f32_slice(slice: &[Self]) -> Option<&[f32]>;
}

impl Element for f32 {
    const PRECISION: Precision = Precision::Single;

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v
    }

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    fn view(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::Single(buf) => Some(buf.as_slice()),
            Storage::Half(_) => None,
        }
    }

    fn view_mut(storage: &mut Storage) -> Option<&mut [Self]> {
        match storage {
            Storage::Single(buf) => Some(buf.as_mut_slice()),
            Storage::Half(_) => None,
        }
    }

    #[inline(always)]
    fn as_f32_slice(slice: &[Self]) -> Option<&[f32]> {
        Some(slice)
    }
}

impl Element for f16 {
    const PRECISION: Precision = Precision::Half;

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        f32_to_f16(v)
    }

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f16_to_f32(self)
    }

    fn view(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::Half(buf) => Some(buf.as_slice()),
            Storage::Single(_) => None,
        }
    }

    fn view_mut(storage: &mut Storage) -> Option<&mut [Self]> {
        match storage {
            Storage::Half(buf) => Some(buf.as_mut_slice()),
            Storage::Single(_) => None,
        }
    }

    #[inline(always)]
    fn as_f32_slice(_: &[Self]) -> Option<&[f32]> {
        None
    }
}
