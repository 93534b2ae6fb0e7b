//! # Buffer Pool
//!
//! Object pool for frame read buffers so the reader does not allocate per frame.
//!
//! ## Usage
//! ```rust,no_run
//! use envelope_rpc::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(16, 64 * 1024);
//! let mut buffer = pool.acquire();
//! buffer.resize(128, 0);
//! // Buffer automatically returned to pool on drop
//! ```

use std::sync::{Arc, Mutex};

/// Default buffer capacity
const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A pooled buffer that returns itself to the pool when dropped
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    max_pooled_size: usize,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if self.buffer.capacity() <= self.max_pooled_size {
            self.buffer.clear();
            if let Ok(mut pool) = self.pool.lock() {
                pool.push(std::mem::take(&mut self.buffer));
            }
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

/// Thread-safe pool of byte buffers
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    initial_capacity: usize,
    max_pooled_size: usize,
}

impl BufferPool {
    /// Create a pool with `pool_size` pre-allocated buffers. Buffers whose capacity
    /// grows beyond `max_pooled_size` are freed on drop instead of pooled.
    pub fn new(pool_size: usize, max_pooled_size: usize) -> Self {
        let initial_capacity = DEFAULT_BUFFER_CAPACITY.min(max_pooled_size);
        let pool = (0..pool_size)
            .map(|_| Vec::with_capacity(initial_capacity))
            .collect();

        Self {
            pool: Arc::new(Mutex::new(pool)),
            initial_capacity,
            max_pooled_size,
        }
    }

    /// Acquire a buffer from the pool (or allocate a new one if pool is empty)
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .pool
            .lock()
            .ok()
            .and_then(|mut pool| pool.pop())
            .unwrap_or_else(|| Vec::with_capacity(self.initial_capacity));

        PooledBuffer {
            buffer,
            pool: self.pool.clone(),
            max_pooled_size: self.max_pooled_size,
        }
    }

    /// Get the current number of available buffers in the pool
    pub fn available(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_BUFFER_POOL_SIZE,
            crate::config::DEFAULT_MAX_POOLED_BUFFER_SIZE,
        )
    }
}
