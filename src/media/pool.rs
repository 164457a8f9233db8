//! Bounded pool of reusable packet buffers.
//!
//! Every buffer has exactly one owner. [`PooledBuffer`] is move-only and
//! hands its allocation back to the pool when dropped, so frames released
//! by the consumer are recycled for the next parse.

use std::{
    ops::{Deref, DerefMut},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::configs::PoolConfig;

// ── Inner state ──────────────────────────────────────────────────────────────

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    buffer_size: usize,
    allocations: AtomicU64,
    reuses: AtomicU64,
}

impl PoolInner {
    fn release(&self, mut buf: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() >= self.max_pooled {
            return;
        }
        buf.clear();
        free.push(buf);
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl PacketPool {
    pub fn new(max_pooled: usize, buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_pooled)),
                max_pooled,
                buffer_size,
                allocations: AtomicU64::new(0),
                reuses: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.max_pooled, config.buffer_size)
    }

    /// An empty buffer with room for at least `capacity` bytes.
    pub fn acquire(&self, capacity: usize) -> PooledBuffer {
        let recycled = self.inner.free.lock().pop();
        let mut buf = match recycled {
            Some(buf) => {
                self.inner.reuses.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.inner.allocations.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.inner.buffer_size.max(capacity))
            }
        };
        buf.reserve(capacity);

        PooledBuffer {
            buf,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Buffers currently waiting for reuse.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn allocations(&self) -> u64 {
        self.inner.allocations.load(Ordering::Relaxed)
    }

    pub fn reuses(&self) -> u64 {
        self.inner.reuses.load(Ordering::Relaxed)
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

impl std::fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketPool")
            .field("available", &self.available())
            .field("max_pooled", &self.inner.max_pooled)
            .finish()
    }
}

/// Byte buffer on loan from a [`PacketPool`].
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Weak<PoolInner>,
}

impl PooledBuffer {
    /// A buffer that is simply freed on drop.
    pub fn unpooled(buf: Vec<u8>) -> Self {
        Self {
            buf,
            pool: Weak::new(),
        }
    }

    /// Take the allocation out of the pool's reach.
    pub fn detach(mut self) -> Vec<u8> {
        self.pool = Weak::new();
        std::mem::take(&mut self.buf)
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.buf));
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .finish_non_exhaustive()
    }
}
