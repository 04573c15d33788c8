//! Packed-panel tile kernel with AVX2/FMA and scalar paths.

use crate::blocked::ResolvedBias;
use crate::precision::Element;

/// Output rows owned by one row tile: `rows × n` logical elements, rows
/// interleaved in groups of `lane`. The first row must start a lane group.
pub struct OutputTile<'a, O> {
    data: &'a mut [O],
    n: usize,
    lane: usize,
}

impl<'a, O: Element> OutputTile<'a, O> {
    pub fn new(data: &'a mut [O], n: usize, lane: usize) -> Self {
        Self { data, n, lane }
    }

    #[inline]
    fn store(&mut self, r: usize, c: usize, v: f32) {
        let idx = ((r / self.lane) * self.n + c) * self.lane + r % self.lane;
        self.data[idx] = O::from_f32(v);
    }
}

/// Coordinates and epilogue parameters for one kernel invocation.
#[derive(Debug, Clone, Copy)]
pub struct TileArgs<'a> {
    /// Bias, already scaled by beta
    pub bias: Option<&'a ResolvedBias>,
    pub alpha: f32,
    /// First output row of the tile
    pub i: usize,
    pub max_ii: usize,
    /// First output column of the tile
    pub j: usize,
    pub max_jj: usize,
    pub max_kk: usize,
    /// First K block: reset the accumulator
    pub k_begin: bool,
    /// Last K block: scale, add bias, cast and store
    pub k_end: bool,
}

impl TileArgs<'_> {
    #[inline]
    fn finish(&self, acc: f32, r: usize, c: usize) -> f32 {
        let v = acc * self.alpha;
        match self.bias {
            Some(bias) => v + bias.value(self.i + r, self.j + c),
            None => v,
        }
    }
}

/// Multiply one A panel by one B panel for a single K block.
///
/// With `scratch` (more than one K block) partial sums live in the
/// scratch tile, laid out `max_ii × max_jj`; without it the block must be
/// both first and last and results go straight to `out`.
///
/// Panels are K-major: `a_tile[p * max_ii + r]`, `b_tile[p * max_jj + c]`.
pub fn compute_tile<P: Element, O: Element>(
    a_tile: &[P],
    b_tile: &[P],
    scratch: Option<&mut [f32]>,
    args: &TileArgs<'_>,
    out: &mut OutputTile<'_, O>,
) {
    let (ii, jj, kk) = (args.max_ii, args.max_jj, args.max_kk);
    let a = &a_tile[..ii * kk];
    let b = &b_tile[..jj * kk];

    match scratch {
        Some(scratch) => {
            let acc = &mut scratch[..ii * jj];
            if args.k_begin {
                acc.fill(0.0);
            }
            accumulate(a, b, acc, ii, jj, kk);

            if args.k_end {
                for r in 0..ii {
                    for c in 0..jj {
                        out.store(r, args.j + c, args.finish(acc[r * jj + c], r, c));
                    }
                }
            }
        }
        None => {
            debug_assert!(args.k_begin && args.k_end, "direct store needs a single K block");
            direct(a, b, ii, jj, kk, |r, c, v| {
                out.store(r, args.j + c, args.finish(v, r, c))
            });
        }
    }
}

/// `acc[r][c] += sum_p a[p][r] * b[p][c]`, p ascending.
fn accumulate<P: Element>(a: &[P], b: &[P], acc: &mut [f32], ii: usize, jj: usize, kk: usize) {
    #[cfg(target_arch = "x86_64")]
    {
        if let (Some(a), Some(b), true) = (P::as_f32_slice(a), P::as_f32_slice(b), has_avx2_fma()) {
            unsafe { accumulate_avx2(a, b, acc, ii, jj, kk) };
            return;
        }
    }

    for r in 0..ii {
        let acc_row = &mut acc[r * jj..(r + 1) * jj];
        for p in 0..kk {
            let a_val = a[p * ii + r].to_f32();
            let b_row = &b[p * jj..(p + 1) * jj];
            for (slot, b_val) in acc_row.iter_mut().zip(b_row) {
                *slot = a_val.mul_add(b_val.to_f32(), *slot);
            }
        }
    }
}

/// Full dot products for a single-block tile, handed to `emit(r, c, sum)`.
fn direct<P: Element>(
    a: &[P],
    b: &[P],
    ii: usize,
    jj: usize,
    kk: usize,
    mut emit: impl FnMut(usize, usize, f32),
) {
    #[cfg(target_arch = "x86_64")]
    {
        if let (Some(a), Some(b), true) = (P::as_f32_slice(a), P::as_f32_slice(b), has_avx2_fma()) {
            unsafe { direct_avx2(a, b, ii, jj, kk, &mut emit) };
            return;
        }
    }

    for r in 0..ii {
        for c in 0..jj {
            let mut sum = 0.0f32;
            for p in 0..kk {
                sum = a[p * ii + r].to_f32().mul_add(b[p * jj + c].to_f32(), sum);
            }
            emit(r, c, sum);
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn has_avx2_fma() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

/// # Safety
///
/// Caller must ensure the CPU supports AVX2 and FMA, and that `a`, `b`
/// and `acc` hold at least `kk * ii`, `kk * jj` and `ii * jj` values.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn accumulate_avx2(a: &[f32], b: &[f32], acc: &mut [f32], ii: usize, jj: usize, kk: usize) {
    use std::arch::x86_64::*;

    let j_main = (jj / 8) * 8;

    for r in 0..ii {
        let acc_row = acc.as_mut_ptr().add(r * jj);
        for p in 0..kk {
            let a_val = *a.get_unchecked(p * ii + r);
            let a_vec = _mm256_set1_ps(a_val);
            let b_row = b.as_ptr().add(p * jj);

            let mut c = 0;
            while c < j_main {
                let sum = _mm256_loadu_ps(acc_row.add(c));
                let b_vec = _mm256_loadu_ps(b_row.add(c));
                _mm256_storeu_ps(acc_row.add(c), _mm256_fmadd_ps(a_vec, b_vec, sum));
                c += 8;
            }
            for c in j_main..jj {
                *acc_row.add(c) = a_val.mul_add(*b_row.add(c), *acc_row.add(c));
            }
        }
    }
}

/// # Safety
///
/// Same requirements as [`accumulate_avx2`] minus the accumulator.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[allow(unsafe_op_in_unsafe_fn)]
unsafe fn direct_avx2(
    a: &[f32],
    b: &[f32],
    ii: usize,
    jj: usize,
    kk: usize,
    emit: &mut impl FnMut(usize, usize, f32),
) {
    use std::arch::x86_64::*;

    let j_main = (jj / 8) * 8;
    let mut lanes = [0.0f32; 8];

    for r in 0..ii {
        let mut c0 = 0;
        while c0 < j_main {
            let mut sum = _mm256_setzero_ps();
            for p in 0..kk {
                let a_vec = _mm256_set1_ps(*a.get_unchecked(p * ii + r));
                let b_vec = _mm256_loadu_ps(b.as_ptr().add(p * jj + c0));
                sum = _mm256_fmadd_ps(a_vec, b_vec, sum);
            }
            _mm256_storeu_ps(lanes.as_mut_ptr(), sum);
            for (l, &v) in lanes.iter().enumerate() {
                emit(r, c0 + l, v);
            }
            c0 += 8;
        }

        for c in j_main..jj {
            let mut sum = 0.0f32;
            for p in 0..kk {
                sum = a.get_unchecked(p * ii + r).mul_add(*b.get_unchecked(p * jj + c), sum);
            }
            emit(r, c, sum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    /// Pack helpers for the tests: row-major `rows × k` into K-major panels.
    fn k_major(src: &[f32], rows: usize, k: usize) -> Vec<f32> {
        let mut out = vec![0.0; rows * k];
        for r in 0..rows {
            for p in 0..k {
                out[p * rows + r] = src[r * k + p];
            }
        }
        out
    }

    fn args<'a>(ii: usize, jj: usize, kk: usize, k_begin: bool, k_end: bool) -> TileArgs<'a> {
        TileArgs {
            bias: None,
            alpha: 1.0,
            i: 0,
            max_ii: ii,
            j: 0,
            max_jj: jj,
            max_kk: kk,
            k_begin,
            k_end,
        }
    }

    #[test]
    fn test_direct_matches_naive() {
        let (ii, jj, kk) = (5, 11, 7);
        let a: Vec<f32> = (0..ii * kk).map(|v| (v % 7) as f32 - 3.0).collect();
        // B as (jj rows of kk) so that k_major gives b[p][c]
        let b: Vec<f32> = (0..jj * kk).map(|v| (v % 5) as f32 * 0.5).collect();
        let a_panel = k_major(&a, ii, kk);
        let b_panel = k_major(&b, jj, kk);

        let mut out = vec![0.0f32; ii * jj];
        compute_tile(
            &a_panel,
            &b_panel,
            None,
            &args(ii, jj, kk, true, true),
            &mut OutputTile::new(&mut out, jj, 1),
        );

        for r in 0..ii {
            for c in 0..jj {
                let expected: f32 = (0..kk).map(|p| a[r * kk + p] * b[c * kk + p]).sum();
                assert!(
                    (out[r * jj + c] - expected).abs() < 1e-4,
                    "Mismatch at ({}, {}): expected {}, got {}",
                    r,
                    c,
                    expected,
                    out[r * jj + c]
                );
            }
        }
    }

    #[test]
    fn test_split_k_is_bit_identical() {
        let (ii, jj, kk) = (4, 9, 12);
        let a: Vec<f32> = (0..ii * kk).map(|v| (v as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..jj * kk).map(|v| (v as f32 * 0.11).cos()).collect();
        let a_panel = k_major(&a, ii, kk);
        let b_panel = k_major(&b, jj, kk);

        let mut whole = vec![0.0f32; ii * jj];
        compute_tile(
            &a_panel,
            &b_panel,
            None,
            &args(ii, jj, kk, true, true),
            &mut OutputTile::new(&mut whole, jj, 1),
        );

        // Same product in two K blocks of 5 and 7 through the scratch tile
        let mut split = vec![0.0f32; ii * jj];
        let mut scratch = vec![f32::NAN; ii * jj];
        let (a0, a1) = a_panel.split_at(5 * ii);
        let (b0, b1) = b_panel.split_at(5 * jj);
        compute_tile(
            a0,
            b0,
            Some(&mut scratch),
            &args(ii, jj, 5, true, false),
            &mut OutputTile::new(&mut split, jj, 1),
        );
        compute_tile(
            a1,
            b1,
            Some(&mut scratch),
            &args(ii, jj, 7, false, true),
            &mut OutputTile::new(&mut split, jj, 1),
        );

        assert_eq!(whole, split);
    }

    #[test]
    fn test_epilogue_alpha_bias_and_half_output() {
        let a_panel = vec![f16::ONE; 2 * 3];
        let b_panel = vec![f16::ONE; 2 * 2];
        let bias = crate::blocked::ResolvedBias::from_runtime(
            &crate::matrix::Matrix::vector_f32(vec![1.0, 2.0]),
            3,
            2,
            1.0,
            &crate::matrix::alloc::heap(),
        )
        .unwrap()
        .unwrap();

        let mut out = vec![f16::ZERO; 6];
        let tile_args = TileArgs {
            bias: Some(&bias),
            alpha: 2.0,
            ..args(3, 2, 2, true, true)
        };
        compute_tile(
            &a_panel,
            &b_panel,
            None,
            &tile_args,
            &mut OutputTile::new(&mut out, 2, 1),
        );

        let got: Vec<f32> = out.iter().map(|v| v.to_f32()).collect();
        assert_eq!(got, vec![5.0, 6.0, 5.0, 6.0, 5.0, 6.0]);
    }

    #[test]
    fn test_single_row_wide_tile() {
        // One row against a full 8-wide vector of columns
        let mut single = vec![0.0f32; 8];
        compute_tile(
            &[1.0f32],
            &[1.0f32; 8],
            None,
            &args(1, 8, 1, true, true),
            &mut OutputTile::new(&mut single, 8, 1),
        );
        assert_eq!(single, vec![1.0; 8]);

        let mut half = vec![0.0f32; 8];
        compute_tile(
            &[f16::ONE],
            &[f16::ONE; 8],
            None,
            &args(1, 8, 1, true, true),
            &mut OutputTile::new(&mut half, 8, 1),
        );
        assert_eq!(half, vec![1.0; 8]);
    }

    #[test]
    fn test_lane_packed_output() {
        let (ii, jj, kk) = (4, 2, 1);
        let a_panel = vec![1.0f32, 2.0, 3.0, 4.0];
        let b_panel = vec![1.0f32, 10.0];

        let mut out = vec![0.0f32; ii * jj];
        compute_tile(
            &a_panel,
            &b_panel,
            None,
            &args(ii, jj, kk, true, true),
            &mut OutputTile::new(&mut out, jj, 4),
        );

        // column 0 of all four rows, then column 1
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0]);
    }
}
