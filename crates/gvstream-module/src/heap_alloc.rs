//! `HeapAlloc` and `PooledAlloc` — `AllocPolicy` implementations.
//!
//! `HeapAlloc` makes one heap allocation per read and drops it on
//! release. `PooledAlloc` keeps up to `capacity` released buffers in a
//! lock-free queue and hands them out again.

use gvstream_core::buffer::{AllocPolicy, ReadBuf};

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct HeapAlloc {
    /// Upper bound on a single buffer, regardless of the reactor's hint.
    max_size: usize,
    /// Buffers currently handed out.
    in_use: AtomicUsize,
    /// Total allocations (for diagnostics).
    total: AtomicUsize,
}

impl HeapAlloc {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            in_use: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for HeapAlloc {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl AllocPolicy for HeapAlloc {
    fn alloc(&self, suggested: usize) -> ReadBuf {
        let size = suggested.clamp(1, self.max_size);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        ReadBuf::with_len(size)
    }

    fn release(&self, buf: ReadBuf) {
        drop(buf);
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

pub struct PooledAlloc {
    /// Size of every pooled buffer.
    buf_size: usize,
    /// Released buffers waiting for reuse.
    free: ArrayQueue<Vec<u8>>,
    in_use: AtomicUsize,
    /// Allocations served from the free queue.
    reused: AtomicUsize,
}

impl PooledAlloc {
    pub fn new(buf_size: usize, capacity: usize) -> Self {
        Self {
            buf_size: buf_size.max(1),
            free: ArrayQueue::new(capacity.max(1)),
            in_use: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }

    pub fn pooled(&self) -> usize {
        self.free.len()
    }
}

impl AllocPolicy for PooledAlloc {
    fn alloc(&self, _suggested: usize) -> ReadBuf {
        self.in_use.fetch_add(1, Ordering::Relaxed);
        match self.free.pop() {
            Some(v) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                ReadBuf::from_vec(v)
            }
            None => ReadBuf::with_len(self.buf_size),
        }
    }

    fn release(&self, buf: ReadBuf) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let v = buf.into_vec();
        if v.len() == self.buf_size {
            // Full pool: the buffer is simply dropped.
            let _ = self.free.push(v);
        }
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}
