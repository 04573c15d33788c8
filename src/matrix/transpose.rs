//! Out-of-place transposes for slices and operands.

use half::f16;

use super::alloc::Buffer;
use super::operand::{Matrix, Shape, Storage};
use crate::error::{GemmError, Result};

/// `dst[j][i] = src[i][j]` for a row-major `rows × cols` slice.
///
/// ```
/// use tilegemm::matrix::transpose::transpose;
///
/// let src = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
/// let mut dst = [0.0; 6];
/// transpose(&src, &mut dst, 2, 3);
/// assert_eq!(dst, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]); // 3x2
/// ```
pub fn transpose<T: Copy>(src: &[T], dst: &mut [T], rows: usize, cols: usize) {
    for (i, row) in src[..rows * cols].chunks_exact(cols.max(1)).enumerate() {
        for (j, &v) in row.iter().enumerate() {
            dst[j * rows + i] = v;
        }
    }
}

/// Logical transpose of a rank-2 operand, keeping its precision.
///
/// The result is plain row-major (lane width 1) whatever the source
/// layout was. Useful for feeding the same data through `trans_a` or
/// `trans_b`.
pub fn transposed(src: &Matrix) -> Result<Matrix> {
    let (rows, cols) = match src.shape() {
        Shape::Matrix { rows, cols } => (rows, cols),
        other => {
            return Err(GemmError::ShapeMismatch {
                what: "transpose rank",
                expected: 2,
                got: other.dims(),
            });
        }
    };
    let logical = src.to_lane_packed(1)?;

    let storage = match logical.storage() {
        Some(Storage::Half(data)) => {
            let mut out = vec![f16::ZERO; data.len()];
            transpose(data, &mut out, rows, cols);
            Storage::Half(Buffer::from_vec(out))
        }
        Some(Storage::Single(data)) => {
            let mut out = vec![0.0f32; data.len()];
            transpose(data, &mut out, rows, cols);
            Storage::Single(Buffer::from_vec(out))
        }
        None => return Err(GemmError::OperandReleased("source")),
    };
    Matrix::with_storage(
        Shape::Matrix {
            rows: cols,
            cols: rows,
        },
        storage,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transposed_operand() {
        let m = Matrix::from_f32(8, 3, (0..24).map(|v| v as f32).collect()).unwrap();
        let packed = m.to_lane_packed(4).unwrap();

        let t = transposed(&packed).unwrap();
        assert_eq!((t.rows(), t.cols(), t.lane_pack()), (3, 8, 1));
        for r in 0..8 {
            for c in 0..3 {
                assert_eq!(t.get(c, r), m.get(r, c), "mismatch at ({}, {})", r, c);
            }
        }
    }

    #[test]
    fn test_vector_rejected() {
        let v = Matrix::vector_f32(vec![1.0, 2.0]);
        assert!(matches!(transposed(&v), Err(GemmError::ShapeMismatch { .. })));
    }
}
