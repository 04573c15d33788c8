//! The GEMM layer: constant operand setup and forward calls.
//!
//! A [`Gemm`] is configured once, optionally given constant operands,
//! prepared with [`Gemm::create_pipeline`] and then run any number of
//! times with [`Gemm::forward`]. Which operands are constant decides what
//! `forward` expects at runtime:
//!
//! | constant | runtime operands |
//! |---|---|
//! | none | `[A, B, C?]` |
//! | A | `[B, C?]` |
//! | B | `[A, C?]` |
//! | A and B | `[C?]` |
//!
//! A constant C is never passed at runtime.

pub mod cache;

use std::sync::{Arc, Mutex, PoisonError};

use half::f16;

use crate::blocked::ResolvedBias;
use crate::blocked::pack::Side;
use crate::blocked::tile::LANE;
use crate::config::{GemmConfig, GemmOptions};
use crate::error::{GemmError, Result};
use crate::matrix::{Allocator, Matrix, Shape};
use crate::precision::{Element, Precision};
use crate::threaded::{GemmParams, OperandSource, WorkerPool, run_gemm};
use cache::{PackedOperand, PrePackedCache, operand_extents};

/// A constant bias and the output shape it was declared for.
#[derive(Debug)]
struct ConstantBias {
    matrix: Matrix,
    m: usize,
    n: usize,
}

/// A GEMM layer computing `alpha * op(A) * op(B) + beta * C`.
#[derive(Debug)]
pub struct Gemm {
    config: GemmConfig,
    constant_a: Option<Matrix>,
    constant_b: Option<Matrix>,
    constant_c: Option<ConstantBias>,
    cache: PrePackedCache,
    pool: Mutex<Option<Arc<WorkerPool>>>,
}

impl Gemm {
    pub fn new(config: GemmConfig) -> Self {
        Self {
            config,
            constant_a: None,
            constant_b: None,
            constant_c: None,
            cache: PrePackedCache::default(),
            pool: Mutex::new(None),
        }
    }

    /// Mark A as constant. It is packed by `create_pipeline`.
    pub fn with_constant_a(mut self, a: Matrix) -> Self {
        self.constant_a = Some(a);
        self
    }

    /// Mark B as constant. It is packed by `create_pipeline`.
    pub fn with_constant_b(mut self, b: Matrix) -> Self {
        self.constant_b = Some(b);
        self
    }

    /// Mark the bias as constant for an `m × n` output.
    pub fn with_constant_c(mut self, c: Matrix, m: usize, n: usize) -> Self {
        self.constant_c = Some(ConstantBias { matrix: c, m, n });
        self
    }

    pub fn config(&self) -> &GemmConfig {
        &self.config
    }

    pub fn cache(&self) -> &PrePackedCache {
        &self.cache
    }

    /// The unpacked constant A; released in light mode
    pub fn constant_a(&self) -> Option<&Matrix> {
        self.constant_a.as_ref()
    }

    pub fn constant_b(&self) -> Option<&Matrix> {
        self.constant_b.as_ref()
    }

    pub fn constant_c(&self) -> Option<&Matrix> {
        self.constant_c.as_ref().map(|c| &c.matrix)
    }

    fn has_constants(&self) -> bool {
        self.constant_a.is_some() || self.constant_b.is_some() || self.constant_c.is_some()
    }

    /// Pack every constant operand and pin the thread count.
    ///
    /// Must run before the first `forward` when any operand is constant.
    /// With `opt.lightmode` the unpacked constants are released afterwards
    /// and cannot be packed again. On error the previous cache is kept.
    pub fn create_pipeline(&mut self, opt: &GemmOptions) -> Result<()> {
        let threads = opt.num_threads.max(1);
        let pool = self.pool(threads)?;
        let precision = opt.storage_precision();
        let allocator = &opt.blob_allocator;
        // Widest lane packing a forward call can pick for the output rows
        let row_lane = self.config.output_lane_pack.unwrap_or(LANE);

        let a = match &self.constant_a {
            Some(a) => Some(pack_constant(
                Side::A,
                a,
                self.config.trans_a,
                precision,
                row_lane,
                &pool,
                allocator,
            )?),
            None => None,
        };
        let b = match &self.constant_b {
            Some(b) => Some(pack_constant(
                Side::B,
                b,
                self.config.trans_b,
                precision,
                row_lane,
                &pool,
                allocator,
            )?),
            None => None,
        };
        if let (Some(a), Some(b)) = (&a, &b) {
            if a.k() != b.k() {
                return Err(GemmError::ShapeMismatch {
                    what: "K",
                    expected: a.k(),
                    got: b.k(),
                });
            }
        }

        let bias = match &self.constant_c {
            Some(c) => {
                if c.matrix.is_released() {
                    return Err(GemmError::OperandReleased("C"));
                }
                Some(ResolvedBias::from_constant(
                    &c.matrix,
                    c.m,
                    c.n,
                    self.config.beta,
                    opt.use_packing_layout,
                    allocator,
                )?)
            }
            None => None,
        };

        self.cache = PrePackedCache {
            a,
            b,
            bias,
            threads: self.has_constants().then_some(threads),
            light_mode: opt.lightmode,
        };

        if opt.lightmode {
            for operand in [
                self.constant_a.as_mut(),
                self.constant_b.as_mut(),
                self.constant_c.as_mut().map(|c| &mut c.matrix),
            ]
            .into_iter()
            .flatten()
            {
                operand.release();
            }
        }

        log::debug!(
            "gemm pipeline ready: {} cached bytes, {} threads, lightmode {}",
            self.cache.byte_size(),
            threads,
            opt.lightmode
        );
        Ok(())
    }

    /// Run one multiply on the runtime operands.
    ///
    /// # Errors
    ///
    /// - `MissingOperand` if `inputs` is shorter than the constant layout requires
    /// - `PipelineNotCreated` if a constant operand has not been packed
    /// - `ShapeMismatch` if op(A) and op(B) disagree on K
    /// - `BiasShape` if the bias falls back to elementwise and is too small
    /// - `OutOfMemory` if the output or workspace cannot be allocated
    pub fn forward(&self, inputs: &[&Matrix], opt: &GemmOptions) -> Result<Matrix> {
        let cfg = &self.config;
        let mut pos = 0;

        let a = match &self.constant_a {
            Some(_) => OperandSource::Cached(self.cache.a().ok_or(GemmError::PipelineNotCreated("A"))?),
            None => OperandSource::Runtime(required(inputs, &mut pos)?),
        };
        let b = match &self.constant_b {
            Some(_) => OperandSource::Cached(self.cache.b().ok_or(GemmError::PipelineNotCreated("B"))?),
            None => OperandSource::Runtime(required(inputs, &mut pos)?),
        };

        let (m, k) = match a {
            OperandSource::Runtime(a) => operand_extents(Side::A, a, cfg.trans_a),
            OperandSource::Cached(a) => (a.outer(), a.k()),
        };
        let (n, k_b) = match b {
            OperandSource::Runtime(b) => operand_extents(Side::B, b, cfg.trans_b),
            OperandSource::Cached(b) => (b.outer(), b.k()),
        };
        if k != k_b {
            return Err(GemmError::ShapeMismatch {
                what: "K",
                expected: k,
                got: k_b,
            });
        }

        let runtime_bias;
        let bias = match &self.constant_c {
            Some(c) => {
                if !self.cache.has_bias() {
                    return Err(GemmError::PipelineNotCreated("C"));
                }
                if c.m != m {
                    return Err(GemmError::ShapeMismatch {
                        what: "constant C rows",
                        expected: c.m,
                        got: m,
                    });
                }
                if c.n != n {
                    return Err(GemmError::ShapeMismatch {
                        what: "constant C columns",
                        expected: c.n,
                        got: n,
                    });
                }
                self.cache.bias()
            }
            None => {
                runtime_bias = match inputs.get(pos) {
                    Some(c) => ResolvedBias::from_runtime(c, m, n, cfg.beta, &opt.workspace_allocator)?,
                    None => None,
                };
                runtime_bias.as_ref()
            }
        };

        let threads = match self.cache.threads() {
            Some(pinned) => {
                if pinned != opt.num_threads {
                    log::warn!(
                        "num_threads changed from {} to {}, gemm keeps the pipeline value {}",
                        pinned,
                        opt.num_threads,
                        pinned
                    );
                }
                pinned
            }
            None => opt.num_threads.max(1),
        };
        let pool = self.pool(threads)?;

        let out_lane = cfg.output_lane_pack.unwrap_or(if opt.use_packing_layout && m % 4 == 0 {
            4
        } else {
            1
        });
        let shape = if cfg.output_n1m {
            Shape::Planes {
                channels: m,
                height: 1,
                width: n,
            }
        } else {
            Shape::Matrix { rows: m, cols: n }
        };

        let packed_precision = self
            .cache
            .a()
            .or(self.cache.b())
            .map_or(opt.storage_precision(), PackedOperand::precision);
        let params = GemmParams {
            m,
            n,
            k,
            trans_a: cfg.trans_a,
            trans_b: cfg.trans_b,
            alpha: cfg.alpha,
        };
        let call = Call {
            a,
            b,
            bias,
            params,
            shape,
            out_lane,
            pool: &pool,
            opt,
        };

        match (packed_precision, cfg.output_precision) {
            (Precision::Half, Precision::Half) => call.execute::<f16, f16>(),
            (Precision::Half, Precision::Single) => call.execute::<f16, f32>(),
            (Precision::Single, Precision::Half) => call.execute::<f32, f16>(),
            (Precision::Single, Precision::Single) => call.execute::<f32, f32>(),
        }
    }

    /// Worker pool for `threads`, reused across calls with the same count.
    fn pool(&self, threads: usize) -> Result<Arc<WorkerPool>> {
        let mut slot = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = slot.as_ref().filter(|p| p.threads() == threads) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(WorkerPool::new(threads)?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }
}

/// Everything one forward call needs once its operands are resolved.
struct Call<'a> {
    a: OperandSource<'a>,
    b: OperandSource<'a>,
    bias: Option<&'a ResolvedBias>,
    params: GemmParams,
    shape: Shape,
    out_lane: usize,
    pool: &'a WorkerPool,
    opt: &'a GemmOptions,
}

impl Call<'_> {
    fn execute<P: Element, O: Element>(&self) -> Result<Matrix> {
        let mut output = Matrix::zeros(self.shape, O::PRECISION, self.out_lane, &self.opt.blob_allocator)?;
        let data = output
            .storage_mut()
            .and_then(|s| O::view_mut(s))
            .ok_or(GemmError::OperandReleased("output"))?;

        run_gemm::<P, O>(
            self.a,
            self.b,
            self.bias,
            data,
            self.out_lane,
            &self.params,
            self.pool,
            &self.opt.workspace_allocator,
        )?;
        Ok(output)
    }
}

fn required<'a>(inputs: &[&'a Matrix], pos: &mut usize) -> Result<&'a Matrix> {
    let operand = inputs
        .get(*pos)
        .copied()
        .ok_or(GemmError::MissingOperand { index: *pos })?;
    *pos += 1;
    Ok(operand)
}

fn pack_constant(
    side: Side,
    src: &Matrix,
    trans: bool,
    precision: Precision,
    row_lane: usize,
    pool: &WorkerPool,
    allocator: &Arc<dyn Allocator>,
) -> Result<PackedOperand> {
    if src.is_released() {
        return Err(GemmError::OperandReleased(side.name()));
    }
    PackedOperand::pack(side, src, trans, precision, row_lane, pool, allocator)
}

/// Pools shared by one-shot [`gemm`] calls, one per thread count.
static SHARED_POOLS: Mutex<Vec<Arc<WorkerPool>>> = Mutex::new(Vec::new());

fn shared_pool(threads: usize) -> Result<Arc<WorkerPool>> {
    let threads = threads.max(1);
    let mut pools = SHARED_POOLS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(pool) = pools.iter().find(|p| p.threads() == threads) {
        return Ok(Arc::clone(pool));
    }
    let pool = Arc::new(WorkerPool::new(threads)?);
    pools.push(Arc::clone(&pool));
    Ok(pool)
}

/// One-shot multiply with every operand supplied at runtime.
///
/// `c` is the optional bias. Equivalent to a fresh [`Gemm`] without
/// constants and a single `forward` call. Worker threads are shared
/// between calls with the same thread count; constant operands still
/// want a [`Gemm`] kept across calls.
pub fn gemm(
    a: &Matrix,
    b: &Matrix,
    c: Option<&Matrix>,
    config: &GemmConfig,
    opt: &GemmOptions,
) -> Result<Matrix> {
    let mut inputs = vec![a, b];
    inputs.extend(c);
    let layer = Gemm::new(config.clone());
    let pool = shared_pool(opt.num_threads)?;
    *layer.pool.lock().unwrap_or_else(PoisonError::into_inner) = Some(pool);
    layer.forward(&inputs, opt)
}
