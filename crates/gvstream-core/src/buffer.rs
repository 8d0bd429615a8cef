//! Read buffer allocation policy.
//!
//! Before each read the reactor asks the handle's [`AllocPolicy`] for a
//! buffer. The buffer travels inside the read completion and is handed
//! back to the same policy once the dispatcher has copied the data out.
//! No buffer outlives one completion.
//!
//! # Implementors
//!
//! - `HeapAlloc` (default): one fresh allocation per read.
//! - `PooledAlloc`: recycles a bounded number of buffers.

/// A transient byte region filled by one read.
#[derive(Debug)]
pub struct ReadBuf {
    data: Vec<u8>,
}

impl ReadBuf {
    /// Wrap an allocation. The full length of `data` is writable.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Zeroed buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self { data: vec![0u8; len] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copy the first `n` bytes out as an owned value.
    pub fn copy_prefix(&self, n: usize) -> Vec<u8> {
        self.data[..n.min(self.data.len())].to_vec()
    }

    /// Give the allocation back (used by recycling policies).
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Allocates and releases read buffers.
///
/// **Contract:**
/// - `alloc()` is called once per read attempt, on the reactor thread.
/// - every buffer returned by `alloc()` is passed to `release()` exactly once.
pub trait AllocPolicy: Send + Sync {
    /// Provide a buffer. `suggested` is the reactor's size hint.
    fn alloc(&self, suggested: usize) -> ReadBuf;

    /// Take a buffer back after its completion was processed.
    fn release(&self, buf: ReadBuf);

    /// Buffers handed out and not yet released.
    fn in_use(&self) -> usize;
}
