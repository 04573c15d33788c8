//! Fork-join worker pool with static partitioning.

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{GemmError, Result};

/// A fixed-size set of workers.
///
/// Work is split statically: items are cut into `threads` contiguous
/// ranges and worker `t` processes range `t` in increasing order. There is
/// no stealing between ranges. [`WorkerPool::run_static`] returns only
/// after every worker has finished, which is the barrier between phases.
#[derive(Debug)]
pub struct WorkerPool {
    threads: usize,
    pool: Option<ThreadPool>,
}

impl WorkerPool {
    /// Start `threads` workers. A single-thread pool runs work inline on
    /// the caller.
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = if threads > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("tilegemm-{}", i))
                .build()
                .map_err(|e| GemmError::ThreadPool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };

        log::debug!("started gemm worker pool with {} threads", threads);
        Ok(Self { threads, pool })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `f(state, index, item)` over `items`.
    ///
    /// `states` supplies one private value per worker (scratch buffers and
    /// the like); worker `t` gets `states[t]`. The first error reported by
    /// any worker is returned after all workers stop.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `threads` states are supplied.
    pub fn run_static<I, S, F>(&self, items: Vec<I>, mut states: Vec<S>, f: F) -> Result<()>
    where
        I: Send,
        S: Send,
        F: Fn(&mut S, usize, I) -> Result<()> + Sync,
    {
        assert!(
            states.len() >= self.threads,
            "need {} worker states, got {}",
            self.threads,
            states.len()
        );

        let Some(pool) = &self.pool else {
            let state = &mut states[0];
            for (idx, item) in items.into_iter().enumerate() {
                f(state, idx, item)?;
            }
            return Ok(());
        };

        let chunk = items.len().div_ceil(self.threads).max(1);
        let mut ranges: Vec<Vec<(usize, I)>> = (0..self.threads).map(|_| Vec::new()).collect();
        for (idx, item) in items.into_iter().enumerate() {
            ranges[idx / chunk].push((idx, item));
        }

        let mut results: Vec<Result<()>> = (0..self.threads).map(|_| Ok(())).collect();
        let f = &f;

        pool.scope(|s| {
            for ((range, state), slot) in ranges.into_iter().zip(states.iter_mut()).zip(results.iter_mut()) {
                if range.is_empty() {
                    continue;
                }
                s.spawn(move |_| {
                    for (idx, item) in range {
                        if let Err(e) = f(state, idx, item) {
                            *slot = Err(e);
                            return;
                        }
                    }
                });
            }
        });

        results.into_iter().collect()
    }
}
