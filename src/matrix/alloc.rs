//! Pluggable allocators and the buffers they account for.
//!
//! The engine separates transient workspace (packed B panels, scratch
//! accumulators, converted bias) from persistent storage (outputs and
//! pre-packed constants). Both go through an [`Allocator`], so a caller
//! can cap either pool and get [`GemmError::OutOfMemory`] instead of an
//! abort.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{GemmError, Result};

/// Byte accounting for engine buffers.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Reserve `bytes` or fail with `OutOfMemory`
    fn acquire(&self, bytes: usize) -> Result<()>;

    /// Return bytes previously acquired
    fn release(&self, bytes: usize);

    /// Bytes currently outstanding
    fn allocated_bytes(&self) -> usize {
        0
    }
}

/// Unbounded allocator backed by the global heap.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    allocated: AtomicUsize,
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Allocator for HeapAllocator {
    fn acquire(&self, bytes: usize) -> Result<()> {
        self.allocated.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn release(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

/// Allocator with a fixed byte budget.
///
/// Requests that would push the outstanding total past `limit` fail.
#[derive(Debug)]
pub struct BoundedAllocator {
    limit: usize,
    allocated: AtomicUsize,
}

impl BoundedAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Allocator for BoundedAllocator {
    fn acquire(&self, bytes: usize) -> Result<()> {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.limit)
            })
            .map(|_| ())
            .map_err(|_| GemmError::OutOfMemory { bytes })
    }

    fn release(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }
}

/// A fresh unbounded heap allocator.
pub fn heap() -> Arc<dyn Allocator> {
    Arc::new(HeapAllocator::new())
}

/// A contiguous element buffer whose bytes are charged to an allocator
/// until it is dropped.
pub struct Buffer<T> {
    data: Vec<T>,
    allocator: Option<Arc<dyn Allocator>>,
}

impl<T: Copy + Default> Buffer<T> {
    /// Allocate `len` default-initialised elements.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the allocator refuses the request or the heap
    /// reservation fails.
    pub fn zeroed(len: usize, allocator: &Arc<dyn Allocator>) -> Result<Self> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(GemmError::OutOfMemory { bytes: usize::MAX })?;

        allocator.acquire(bytes)?;

        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            allocator.release(bytes);
            return Err(GemmError::OutOfMemory { bytes });
        }
        data.resize(len, T::default());

        Ok(Self {
            data,
            allocator: Some(Arc::clone(allocator)),
        })
    }
}

impl<T> Buffer<T> {
    /// Wrap caller-owned data without allocator accounting.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data,
            allocator: None,
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    fn bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }
}

impl<T> Drop for Buffer<T> {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            allocator.release(self.bytes());
        }
    }
}

impl<T> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

// Clones are caller-owned copies and are not charged to the allocator.
impl<T: Clone> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self::from_vec(self.data.clone())
    }
}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("managed", &self.allocator.is_some())
            .finish()
    }
}
