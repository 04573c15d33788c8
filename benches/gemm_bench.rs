//! Criterion benchmarks for the tiled GEMM.
//!
//! Compares fresh packing of both operands against a pre-packed constant
//! B, at single and half panel precision.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use tilegemm::{Gemm, GemmConfig, GemmOptions, Matrix, gemm};

fn operand(rows: usize, cols: usize) -> Matrix {
    let data = (0..rows * cols).map(|i| (i % 100) as f32 * 0.01).collect();
    Matrix::from_f32(rows, cols, data).unwrap()
}

// ---------------------------------------------------------------------------
// Runtime operands
// ---------------------------------------------------------------------------

fn bench_runtime(c: &mut Criterion) {
    let mut group = c.benchmark_group("gemm_runtime");
    group.sample_size(10);

    let cfg = GemmConfig::default();
    for size in [64, 256, 512] {
        let a = operand(size, size);
        let b = operand(size, size);

        for (label, fp16) in [("fp32", false), ("fp16", true)] {
            let opt = GemmOptions::new().with_threads(4).with_fp16_storage(fp16);
            group.bench_with_input(BenchmarkId::new(label, size), &size, |bench, _| {
                bench.iter(|| gemm(black_box(&a), black_box(&b), None, &cfg, &opt).unwrap())
            });
        }
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Constant B
// ---------------------------------------------------------------------------

fn bench_constant_b(c: &mut Criterion) {
    let mut group = c.benchmark_group("gemm_constant_b");
    group.sample_size(10);

    // (M, N, K): a few rows against a fixed weight matrix
    let shapes = [(1, 1024, 1024), (8, 1024, 1024), (64, 512, 512)];

    for (m, n, k) in shapes {
        let opt = GemmOptions::new().with_threads(4).with_fp16_storage(false);
        let mut layer = Gemm::new(GemmConfig::default()).with_constant_b(operand(k, n));
        layer.create_pipeline(&opt).unwrap();
        let x = operand(m, k);

        let label = format!("{}x{}x{}", m, n, k);
        group.bench_with_input(BenchmarkId::new("forward", &label), &label, |bench, _| {
            bench.iter(|| layer.forward(&[black_box(&x)], &opt).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_runtime, bench_constant_b);
criterion_main!(benches);
