use proptest::prelude::*;
use tilegemm::matrix::naive::gemm_naive;
use tilegemm::matrix::transpose::{transpose, transposed};
use tilegemm::{GemmConfig, GemmOptions, Matrix, Precision, gemm};

fn assert_matrices_equal(expected: &[f32], actual: &[f32], tol: f32, name: &str) {
    assert_eq!(expected.len(), actual.len(), "{}: length mismatch", name);
    for i in 0..expected.len() {
        let scale = expected[i].abs().max(1.0);
        assert!(
            (expected[i] - actual[i]).abs() <= tol * scale,
            "{}: mismatch at index {}: expected {}, got {}",
            name,
            i,
            expected[i],
            actual[i]
        );
    }
}

fn values(len: usize, seed: usize) -> Vec<f32> {
    (0..len).map(|i| ((i * 7 + seed) % 19) as f32 * 0.25 - 2.0).collect()
}

fn fp32(threads: usize) -> GemmOptions {
    GemmOptions::new().with_threads(threads).with_fp16_storage(false)
}

/// `alpha * op(A) * op(B)` through the reference, operands stored as given.
#[allow(clippy::too_many_arguments)]
fn reference(
    a: &[f32],
    b: &[f32],
    m: usize,
    n: usize,
    k: usize,
    trans_a: bool,
    trans_b: bool,
    alpha: f32,
) -> Vec<f32> {
    let mut c = vec![0.0; m * n];
    gemm_naive(a, b, &mut c, m, n, k, trans_a, trans_b, alpha);
    c
}

// ============================================================
// Concrete scenarios
// ============================================================

#[test]
fn test_all_ones_3x4_times_4x2() {
    let a = Matrix::from_f32(3, 4, vec![1.0; 12]).unwrap();
    let b = Matrix::from_f32(4, 2, vec![1.0; 8]).unwrap();
    let cfg = GemmConfig::new().with_beta(0.0);

    for threads in [1, 2, 4] {
        let out = gemm(&a, &b, None, &cfg, &GemmOptions::new().with_threads(threads)).unwrap();
        assert_eq!((out.rows(), out.cols()), (3, 2));
        assert_eq!(out.to_f32_vec(), vec![4.0; 6], "threads={}", threads);
    }
}

#[test]
fn test_bias_per_column() {
    let a = Matrix::from_f32(3, 4, vec![1.0; 12]).unwrap();
    let b = Matrix::from_f32(4, 2, vec![1.0; 8]).unwrap();
    let bias = Matrix::vector_f32(vec![1.0, 2.0]);
    let cfg = GemmConfig::new().with_beta(1.0);

    let out = gemm(&a, &b, Some(&bias), &cfg, &GemmOptions::new().with_threads(2)).unwrap();
    assert_eq!(out.to_f32_vec(), vec![5.0, 6.0, 5.0, 6.0, 5.0, 6.0]);
}

#[test]
fn test_transposed_a_with_alpha() {
    // A stored 4x3, read as its 3x4 transpose
    let at_data = values(12, 3);
    let b_data = values(8, 5);
    let a = Matrix::from_f32(4, 3, at_data.clone()).unwrap();
    let b = Matrix::from_f32(4, 2, b_data.clone()).unwrap();
    let cfg = GemmConfig::new().with_transpose(true, false).with_alpha(2.0).with_beta(0.0);

    let out = gemm(&a, &b, None, &cfg, &fp32(2)).unwrap();

    let mut a_logical = vec![0.0; 12];
    transpose(&at_data, &mut a_logical, 4, 3);
    let expected = reference(&a_logical, &b_data, 3, 2, 4, false, false, 2.0);
    assert_matrices_equal(&expected, &out.to_f32_vec(), 1e-6, "transA alpha=2");
}

// ============================================================
// Reference equivalence
// ============================================================

#[test]
fn test_odd_sizes_fp32() {
    let test_sizes = [
        (1, 1, 1),
        (3, 3, 3),
        (5, 7, 3),
        (7, 3, 5),
        (11, 13, 17),
        (33, 65, 129),
        (70, 9, 600),
    ];

    for (m, n, k) in test_sizes {
        let a_data = values(m * k, 1);
        let b_data = values(k * n, 2);
        let a = Matrix::from_f32(m, k, a_data.clone()).unwrap();
        let b = Matrix::from_f32(k, n, b_data.clone()).unwrap();

        let out = gemm(&a, &b, None, &GemmConfig::default(), &fp32(3)).unwrap();
        let expected = reference(&a_data, &b_data, m, n, k, false, false, 1.0);
        assert_matrices_equal(&expected, &out.to_f32_vec(), 1e-5, &format!("{}x{}x{}", m, n, k));
    }
}

#[test]
fn test_all_transpose_combinations() {
    let (m, n, k) = (13, 11, 300);
    let a_plain = values(m * k, 4);
    let b_plain = values(k * n, 9);

    let a_m = Matrix::from_f32(m, k, a_plain.clone()).unwrap();
    let b_m = Matrix::from_f32(k, n, b_plain.clone()).unwrap();
    let a_t = transposed(&a_m).unwrap();
    let b_t = transposed(&b_m).unwrap();

    let expected = reference(&a_plain, &b_plain, m, n, k, false, false, 1.0);
    let plain = gemm(&a_m, &b_m, None, &GemmConfig::default(), &fp32(2)).unwrap().to_f32_vec();

    for (trans_a, trans_b) in [(false, false), (true, false), (false, true), (true, true)] {
        let a = if trans_a { &a_t } else { &a_m };
        let b = if trans_b { &b_t } else { &b_m };
        let cfg = GemmConfig::new().with_transpose(trans_a, trans_b);

        let out = gemm(a, b, None, &cfg, &fp32(2)).unwrap();
        assert_eq!(
            out.to_f32_vec(),
            plain,
            "transA={} transB={} differs from plain layout",
            trans_a,
            trans_b
        );
        assert_matrices_equal(
            &expected,
            &out.to_f32_vec(),
            1e-5,
            &format!("transA={} transB={}", trans_a, trans_b),
        );
    }
}

#[test]
fn test_fp16_storage_within_half_tolerance() {
    let (m, n, k) = (24, 40, 96);
    let a_data: Vec<f32> = (0..m * k).map(|i| ((i % 13) as f32 - 6.0) * 0.1).collect();
    let b_data: Vec<f32> = (0..k * n).map(|i| ((i % 7) as f32 - 3.0) * 0.1).collect();
    let a = Matrix::from_f32(m, k, a_data.clone()).unwrap();
    let b = Matrix::from_f32(k, n, b_data.clone()).unwrap();

    let cfg = GemmConfig::new().with_output_precision(Precision::Half);
    let out = gemm(&a, &b, None, &cfg, &GemmOptions::new().with_threads(2)).unwrap();
    assert_eq!(out.precision(), Some(Precision::Half));

    let expected = reference(&a_data, &b_data, m, n, k, false, false, 1.0);
    assert_matrices_equal(&expected, &out.to_f32_vec(), 2.5e-2, "fp16");
}

#[test]
fn test_half_inputs() {
    let a = Matrix::from_f16(2, 2, [1.0f32, 2.0, 3.0, 4.0].map(half::f16::from_f32).to_vec()).unwrap();
    let b = Matrix::from_f16(2, 2, [5.0f32, 6.0, 7.0, 8.0].map(half::f16::from_f32).to_vec()).unwrap();

    let out = gemm(&a, &b, None, &GemmConfig::default(), &GemmOptions::new().with_threads(1)).unwrap();
    assert_eq!(out.to_f32_vec(), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_lane_packed_output_and_input() {
    let (m, n, k) = (8, 6, 5);
    let a_data = values(m * k, 6);
    let b_data = values(k * n, 8);
    let a = Matrix::from_f32(m, k, a_data.clone())
        .unwrap()
        .to_lane_packed(4)
        .unwrap();
    let b = Matrix::from_f32(k, n, b_data.clone()).unwrap();

    let out = gemm(&a, &b, None, &GemmConfig::default(), &fp32(2).with_packing_layout(true)).unwrap();
    assert_eq!(out.lane_pack(), 4);

    let expected = reference(&a_data, &b_data, m, n, k, false, false, 1.0);
    assert_matrices_equal(&expected, &out.to_f32_vec(), 1e-6, "lane packed");
}

#[test]
fn test_empty_dimensions() {
    let a = Matrix::from_f32(0, 4, Vec::new()).unwrap();
    let b = Matrix::from_f32(4, 3, vec![1.0; 12]).unwrap();
    let out = gemm(&a, &b, None, &GemmConfig::default(), &fp32(2)).unwrap();
    assert_eq!((out.rows(), out.cols(), out.total()), (0, 3, 0));

    // K == 0 leaves only the bias
    let a = Matrix::from_f32(2, 0, Vec::new()).unwrap();
    let b = Matrix::from_f32(0, 3, Vec::new()).unwrap();
    let bias = Matrix::scalar(3.0);
    let out = gemm(&a, &b, Some(&bias), &GemmConfig::default(), &fp32(2)).unwrap();
    assert_eq!(out.to_f32_vec(), vec![3.0; 6]);
}

// ============================================================
// Thread count invariance
// ============================================================

#[test]
fn test_thread_count_is_bit_exact() {
    let (m, n, k) = (97, 41, 700);
    let a = Matrix::from_f32(m, k, values(m * k, 11)).unwrap();
    let b = Matrix::from_f32(k, n, values(k * n, 13)).unwrap();

    let baseline = gemm(&a, &b, None, &GemmConfig::default(), &fp32(1)).unwrap().to_f32_vec();
    for threads in [2, 3, 4, 8] {
        let out = gemm(&a, &b, None, &GemmConfig::default(), &fp32(threads)).unwrap();
        assert_eq!(baseline, out.to_f32_vec(), "threads={}", threads);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_matches_reference(
        m in 1usize..40,
        n in 1usize..40,
        k in 1usize..300,
        threads in 1usize..5,
        trans_a in any::<bool>(),
        trans_b in any::<bool>(),
        alpha in -2.0f32..2.0,
    ) {
        let a_data = values(m * k, m);
        let b_data = values(k * n, n);
        let a = if trans_a { Matrix::from_f32(k, m, a_data.clone()) } else { Matrix::from_f32(m, k, a_data.clone()) }.unwrap();
        let b = if trans_b { Matrix::from_f32(n, k, b_data.clone()) } else { Matrix::from_f32(k, n, b_data.clone()) }.unwrap();
        let cfg = GemmConfig::new().with_transpose(trans_a, trans_b).with_alpha(alpha);

        let out = gemm(&a, &b, None, &cfg, &fp32(threads)).unwrap().to_f32_vec();
        let expected = reference(&a_data, &b_data, m, n, k, trans_a, trans_b, alpha);

        for i in 0..m * n {
            let scale = expected[i].abs().max(1.0);
            prop_assert!(
                (out[i] - expected[i]).abs() <= 1e-3 * scale,
                "mismatch at {}: expected {}, got {}", i, expected[i], out[i]
            );
        }
    }

    #[test]
    fn prop_threads_do_not_change_bits(
        m in 1usize..70,
        n in 1usize..30,
        k in 1usize..600,
        threads in 2usize..9,
    ) {
        let a = Matrix::from_f32(m, k, values(m * k, 1)).unwrap();
        let b = Matrix::from_f32(k, n, values(k * n, 2)).unwrap();
        let cfg = GemmConfig::default();

        let one = gemm(&a, &b, None, &cfg, &fp32(1)).unwrap().to_f32_vec();
        let many = gemm(&a, &b, None, &cfg, &fp32(threads)).unwrap().to_f32_vec();
        prop_assert_eq!(one, many);
    }
}
