//! Blocked, multi-threaded GEMM for inference layers.
//!
//! Computes `alpha * op(A) * op(B) + beta * C` by cutting the problem
//! into cache-sized tiles, packing operand panels at half or single
//! precision, and spreading row tiles statically across a worker pool.
//! Weights known ahead of time can be packed once and reused by every call.
//!
//! ## Usage
//!
//! ```
//! use tilegemm::{GemmConfig, GemmOptions, Matrix, gemm};
//!
//! let a = Matrix::from_f32(3, 4, vec![1.0; 12]).unwrap();
//! let b = Matrix::from_f32(4, 2, vec![1.0; 8]).unwrap();
//! let bias = Matrix::vector_f32(vec![1.0, 2.0]);
//!
//! let out = gemm(&a, &b, Some(&bias), &GemmConfig::default(), &GemmOptions::new()).unwrap();
//! assert_eq!(out.to_f32_vec(), vec![5.0, 6.0, 5.0, 6.0, 5.0, 6.0]);
//! ```
//!
//! With a constant weight, pack it once and run many times:
//!
//! ```
//! use tilegemm::{Gemm, GemmConfig, GemmOptions, Matrix};
//!
//! let weights = Matrix::from_f32(64, 32, vec![0.5; 64 * 32]).unwrap();
//! let opt = GemmOptions::new().with_threads(2).with_lightmode(true);
//!
//! let mut layer = Gemm::new(GemmConfig::default()).with_constant_b(weights);
//! layer.create_pipeline(&opt).unwrap();
//!
//! let x = Matrix::from_f32(8, 64, vec![1.0; 8 * 64]).unwrap();
//! let y = layer.forward(&[&x], &opt).unwrap();
//! assert_eq!((y.rows(), y.cols()), (8, 32));
//! assert!(y.to_f32_vec().iter().all(|&v| v == 32.0));
//! ```
//!
//! ## What's inside
//!
//! - Deterministic tile selection and K-major panel packing
//! - Tile kernel with an AVX2/FMA path, bit-identical to the scalar one
//! - Pre-packed constant A, B and bias with a light memory mode
//! - Seven bias broadcast modes

pub mod blocked;
pub mod config;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod matrix;
pub mod precision;
pub mod threaded;

pub use blocked::BroadcastMode;
pub use config::{GemmConfig, GemmOptions};
pub use engine::cache::{PackedOperand, PrePackedCache};
pub use engine::{Gemm, gemm};
pub use error::{GemmError, Result};
pub use matrix::{Allocator, BoundedAllocator, HeapAllocator, Matrix, Shape};
pub use precision::Precision;
