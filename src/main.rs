//! Benchmark runner for the tiled GEMM.
//!
//! Set `RUST_LOG=debug` to see tile and pipeline decisions.

use std::time::Instant;

use tilegemm::matrix::naive::gemm_naive;
use tilegemm::{Gemm, GemmConfig, GemmOptions, Matrix, gemm};

type Method<'a> = (&'static str, Box<dyn Fn(&Matrix, &Matrix) + 'a>);

fn main() {
    env_logger::init();

    println!("=== Tiled GEMM Benchmark ===\n");

    let sizes = [256, 512, 1024];
    let iterations = 3;
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
    let mut all_results = Vec::new();

    println!("Threads: {}\n", threads);

    let cfg = GemmConfig::default();
    let single = GemmOptions::new().with_threads(1).with_fp16_storage(false);
    let multi = GemmOptions::new().with_threads(threads).with_fp16_storage(false);
    let multi_fp16 = GemmOptions::new().with_threads(threads);

    for &size in &sizes {
        println!("Matrix: {}×{}", size, size);
        println!("{}", "-".repeat(50));

        let (m, n, k) = (size, size, size);
        let a = Matrix::from_f32(m, k, (0..m * k).map(|i| (i % 100) as f32 * 0.01).collect())
            .expect("A");
        let b = Matrix::from_f32(k, n, (0..k * n).map(|i| (i % 100) as f32 * 0.01).collect())
            .expect("B");

        let mut constant = Gemm::new(cfg.clone()).with_constant_b(b.clone());
        constant.create_pipeline(&multi).expect("create_pipeline");

        let mut methods: Vec<Method> = Vec::new();
        methods.push((
            "Naive (i-k-j)",
            Box::new(|a: &Matrix, b: &Matrix| {
                let mut c = vec![0.0f32; m * n];
                gemm_naive(
                    a.data::<f32>().expect("f32 A"),
                    b.data::<f32>().expect("f32 B"),
                    &mut c,
                    m,
                    n,
                    k,
                    false,
                    false,
                    1.0,
                );
            }),
        ));
        methods.push((
            "Tiled fp32 1T",
            Box::new(|a: &Matrix, b: &Matrix| {
                gemm(a, b, None, &cfg, &single).expect("gemm");
            }),
        ));
        methods.push((
            "Tiled fp32 MT",
            Box::new(|a: &Matrix, b: &Matrix| {
                gemm(a, b, None, &cfg, &multi).expect("gemm");
            }),
        ));
        methods.push((
            "Tiled fp16 MT",
            Box::new(|a: &Matrix, b: &Matrix| {
                gemm(a, b, None, &cfg, &multi_fp16).expect("gemm");
            }),
        ));
        methods.push((
            "Const B fp32 MT",
            Box::new(|a: &Matrix, _: &Matrix| {
                constant.forward(&[a], &multi).expect("forward");
            }),
        ));

        let results: Vec<(&'static str, (f64, f64))> = methods
            .iter()
            .map(|(name, f)| (*name, bench_fn(&a, &b, m, n, k, iterations, f.as_ref())))
            .collect();

        let baseline_time = results[0].1.0;
        for (i, (name, (time_ms, gflops))) in results.iter().enumerate() {
            let speedup = baseline_time / time_ms;
            println!(
                "{}. {:16} {:8.2} ms  {:6.2} GFLOPS  ({:.1}×)",
                i + 1,
                name,
                time_ms,
                gflops,
                speedup
            );
        }
        println!();

        all_results.push((size, results));
    }

    print_summary_table(&all_results);
}

/// Average time and GFLOPS of `f` over `iterations` runs after one warmup
fn bench_fn(
    a: &Matrix,
    b: &Matrix,
    m: usize,
    n: usize,
    k: usize,
    iterations: usize,
    f: &dyn Fn(&Matrix, &Matrix),
) -> (f64, f64) {
    // Warmup
    f(a, b);

    let mut total = 0.0;
    for _ in 0..iterations {
        let start = Instant::now();
        f(a, b);
        total += start.elapsed().as_secs_f64();
    }

    let avg = total / iterations as f64;
    let gflops = 2.0 * (m * n * k) as f64 / avg / 1e9;
    (avg * 1000.0, gflops)
}

#[allow(clippy::type_complexity)]
fn print_summary_table(all_results: &[(usize, Vec<(&str, (f64, f64))>)]) {
    println!("\n{}", "=".repeat(90));
    println!("SUMMARY");
    println!("{}", "=".repeat(90));

    println!(
        "\n{:<18} {:>14} {:>14} {:>14} {:>12}",
        "Method", "256×256", "512×512", "1024×1024", "Speedup"
    );
    println!("{}", "-".repeat(90));

    let num_methods = all_results[0].1.len();

    for method_idx in 0..num_methods {
        let method_name = all_results[0].1[method_idx].0;

        let mut gflops_list = Vec::new();
        let mut speedups = Vec::new();

        for (_, results) in all_results {
            let (time_ms, gflops) = results[method_idx].1;
            let baseline_time = results[0].1.0;
            gflops_list.push(gflops);
            speedups.push(baseline_time / time_ms);
        }

        let avg_speedup: f64 = speedups.iter().sum::<f64>() / speedups.len() as f64;

        println!(
            "{:<18} {:>10.2} GF  {:>10.2} GF  {:>10.2} GF  {:>10.1}×",
            method_name, gflops_list[0], gflops_list[1], gflops_list[2], avg_speedup
        );
    }

    println!("{}", "=".repeat(90));
    println!("\nGF = GFLOPS (billion floating point operations per second)");
    println!("Speedup relative to Naive (i-k-j). Higher is better.\n");
}
