//! Triple-loop reference GEMM.
//!
//! Slow on purpose: no blocking, no packing, no threads. Serves as the
//! correctness baseline for the tiled engine and as the first row of the
//! benchmark table.

use super::transpose::transpose;

/// Reference multiply: `c += alpha * op(A) * op(B)` in i-k-j order.
///
/// Operands are row-major `f32`. With `trans_a`, `a` is stored K×M and read
/// transposed; with `trans_b`, `b` is stored N×K. Transposed operands are
/// materialised once so the inner loop stays stride-1 over B and C.
///
/// # Arguments
///
/// * `c` - Output (m × n), row-major, accumulated into
/// * `m` - Rows of op(A) and C
/// * `n` - Columns of op(B) and C
/// * `k` - Columns of op(A), rows of op(B)
#[allow(clippy::too_many_arguments)]
pub fn gemm_naive(
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    m: usize,
    n: usize,
    k: usize,
    trans_a: bool,
    trans_b: bool,
    alpha: f32,
) {
    assert_eq!(a.len(), m * k, "A: expected {}x{}={} elements", m, k, m * k);
    assert_eq!(b.len(), k * n, "B: expected {}x{}={} elements", k, n, k * n);
    assert_eq!(c.len(), m * n, "C: expected {}x{}={} elements", m, n, m * n);

    let a_rows;
    let a = if trans_a {
        let mut at = vec![0.0; m * k];
        transpose(a, &mut at, k, m);
        a_rows = at;
        &a_rows[..]
    } else {
        a
    };

    let b_rows;
    let b = if trans_b {
        let mut bt = vec![0.0; k * n];
        transpose(b, &mut bt, n, k);
        b_rows = bt;
        &b_rows[..]
    } else {
        b
    };

    for i in 0..m {
        for p in 0..k {
            let a_ip = alpha * a[i * k + p];
            for j in 0..n {
                c[i * n + j] += a_ip * b[p * n + j];
            }
        }
    }
}
