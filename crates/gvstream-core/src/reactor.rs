//! Reactor contract.
//!
//! The reactor owns native handle state and performs the actual I/O on a
//! single thread. Every `arm_*` call either fails synchronously with a
//! negative code (nothing was queued, no completion will follow) or
//! returns `0` and later reports exactly one terminal [`Completion`] for
//! one-shot operations, or a stream of them for continuous ones.
//!
//! **Contract:** completions are only ever produced by `run_once()`,
//! never from inside an `arm_*` call.

use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::{AllocPolicy, ReadBuf};
use crate::error::Result;
use crate::id::{HandleId, ReqId};

/// A completion observed by the reactor.
///
/// One-shot variants carry the request id; continuous variants carry the
/// handle the registration was made on.
#[derive(Debug)]
pub enum Completion {
    /// Half-close of the outbound side finished.
    Shutdown { req: ReqId, status: i64 },
    /// A queued write (or write2) was flushed or failed.
    Write { req: ReqId, status: i64 },
    /// A listening handle has a connection pending (or failed to get one).
    Connection { server: HandleId, status: i64 },
    /// A read attempt finished: `nread > 0` bytes, `0` nothing, `< 0` EOF or
    /// error. EOF and errors end continuous reading on the handle.
    Read { handle: HandleId, nread: i64, buf: ReadBuf },
}

impl Completion {
    /// Short name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Completion::Shutdown { .. } => "shutdown",
            Completion::Write { .. } => "write",
            Completion::Connection { .. } => "connection",
            Completion::Read { .. } => "read",
        }
    }
}

/// Native duplex-stream primitives driven by a single-threaded reactor.
pub trait StreamReactor: Send {
    // ── Handle lifecycle ──

    /// Adopt a connected, bound or listening descriptor as a new handle.
    fn open_fd(&mut self, fd: OwnedFd) -> Result<HandleId>;

    /// Create an unconnected handle, usable as an `arm_accept` target.
    fn open_empty(&mut self) -> HandleId;

    /// Close the native handle. Pending one-shot requests receive an
    /// `ECANCELED` completion on the next `run_once()`.
    fn close(&mut self, handle: HandleId) -> i64;

    /// Every handle currently open.
    fn open_handles(&self) -> Vec<HandleId>;

    // ── Stream primitives ──

    /// Queue a half-close of `handle`'s outbound side after pending writes.
    fn arm_shutdown(&mut self, handle: HandleId, req: ReqId) -> i64;

    /// Start accepting connections. Completions arrive as `Connection`.
    fn arm_listen(&mut self, handle: HandleId, backlog: i32) -> i64;

    /// Move one pending connection of `server` into `client`. Synchronous.
    fn arm_accept(&mut self, server: HandleId, client: HandleId) -> i64;

    /// Start continuous reading, allocating each buffer from `alloc`.
    fn arm_read(&mut self, handle: HandleId, alloc: Arc<dyn AllocPolicy>) -> i64;

    /// Stop continuous reading. Idempotent.
    fn stop_read(&mut self, handle: HandleId) -> i64;

    /// Queue `bufs` for transmission in FIFO order with other writes on
    /// `handle`, optionally passing `send_handle` alongside. Passing a
    /// handle needs at least one byte of data to carry it.
    fn arm_write(
        &mut self,
        handle: HandleId,
        req: ReqId,
        bufs: &[&[u8]],
        send_handle: Option<HandleId>,
    ) -> i64;

    /// Write without queueing. Returns bytes written.
    fn try_write(&mut self, handle: HandleId, bufs: &[&[u8]]) -> i64;

    fn query_readable(&self, handle: HandleId) -> bool;

    fn query_writable(&self, handle: HandleId) -> bool;

    /// Toggle blocking mode on the native descriptor.
    fn set_blocking_mode(&mut self, handle: HandleId, blocking: bool) -> i64;

    /// Bytes queued for writing and not yet flushed.
    fn write_queue_size(&self, handle: HandleId) -> usize;

    /// True while any handle is listening, reading, writing or has
    /// completions waiting to be delivered.
    fn has_active(&self) -> bool;

    /// Wait up to `timeout` for readiness, perform the I/O and append
    /// completions to `out`. Returns how many were appended.
    fn run_once(&mut self, timeout: Option<Duration>, out: &mut Vec<Completion>) -> usize;
}
