//! Stream Handle Facade
//!
//! The per-handle API. Non-suspending operations (listen, accept,
//! read_start/stop, try_write, queries, set_blocking) call the reactor and
//! translate its status immediately. One-shot operations (shutdown, write,
//! write2) follow the bridge protocol:
//!
//! ```text
//! context                         loop thread
//! ───────                         ───────────
//! begin request (ReqId)
//! arm(request, current context)
//! reactor.arm_*(…, ReqId) ──┐
//!   < 0: abort, Err(…)      │
//! suspend ──────────────────┼──▶  run_once → Completion{req, status}
//!                           │     dispatch → requests.complete(req)
//! ◀── resume(status) ───────┘                 → scheduler.resume
//! translate(status)
//! ```
//!
//! The reactor lock is never held while a context is suspended or while a
//! listener runs.

use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gvstream_core::buffer::AllocPolicy;
use gvstream_core::diag::{self, DiagSink};
use gvstream_core::errno::{translate, translate_unit};
use gvstream_core::error::{Result, StreamError};
use gvstream_core::id::{ContextId, HandleId, ReqId};
use gvstream_core::reactor::{Completion, StreamReactor};
use gvstream_core::scheduler::Scheduler;
use gvstream_core::kdebug;

use crate::event::Listener;
use crate::registry::{HandleRegistry, MapRegistry};
use crate::request::{Request, RequestKind, RequestTable, ShutdownReq, WriteReq};

/// Backlog used by servers that do not pick one.
pub const DEFAULT_BACKLOG: i32 = 128;

/// The bridge between execution contexts, the reactor and listeners.
///
/// Shared as `Arc<StreamBridge>` by every context and the loop driver.
pub struct StreamBridge {
    reactor: Mutex<Box<dyn StreamReactor>>,
    sched: Arc<dyn Scheduler>,
    registry: Arc<dyn HandleRegistry>,
    requests: RequestTable,
    alloc: Arc<dyn AllocPolicy>,
    diag: Arc<dyn DiagSink>,
}

impl StreamBridge {
    pub fn new(
        reactor: Box<dyn StreamReactor>,
        sched: Arc<dyn Scheduler>,
        alloc: Arc<dyn AllocPolicy>,
    ) -> Self {
        Self {
            reactor: Mutex::new(reactor),
            requests: RequestTable::new(sched.clone()),
            sched,
            registry: Arc::new(MapRegistry::new()),
            alloc,
            diag: diag::global_sink(),
        }
    }

    /// Replace the handle registry.
    pub fn with_registry(mut self, registry: Arc<dyn HandleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Send this bridge's diagnostics to `sink` instead of the global one.
    pub fn with_diag(mut self, sink: Arc<dyn DiagSink>) -> Self {
        self.diag = sink;
        self
    }

    // ── Handles ──

    /// Adopt a connected, bound or listening descriptor.
    pub fn open(&self, fd: impl Into<OwnedFd>) -> Result<HandleId> {
        self.reactor().open_fd(fd.into())
    }

    /// Create an unconnected handle to `accept` into.
    pub fn open_empty(&self) -> HandleId {
        self.reactor().open_empty()
    }

    /// Close `handle` and forget its listener. Pending one-shot requests
    /// complete with `ECANCELED`.
    pub fn close(&self, handle: HandleId) -> Result<()> {
        let rc = self.reactor().close(handle);
        self.registry.cleanup(handle);
        translate_unit(rc)
    }

    /// Close every open handle. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let handles = self.reactor().open_handles();
        for &handle in &handles {
            if let Err(e) = self.close(handle) {
                kdebug!("{}: close on teardown: {}", handle, e);
            }
        }
        handles.len()
    }

    /// Bind the listener that receives `handle`'s continuous events.
    pub fn set_listener(&self, handle: HandleId, listener: Arc<dyn Listener>) {
        self.registry.setup(handle, listener);
    }

    /// Unbind `handle`'s listener and continuous-mode state.
    pub fn clear(&self, handle: HandleId) {
        self.registry.cleanup(handle);
    }

    // ── Requests ──

    pub fn shutdown_req(&self) -> ShutdownReq {
        ShutdownReq(self.requests.begin(RequestKind::Shutdown))
    }

    pub fn write_req(&self) -> WriteReq {
        WriteReq(self.requests.begin(RequestKind::Write))
    }

    // ── One-shot operations (suspend the calling context) ──

    /// Half-close the outbound side once queued writes are flushed.
    pub fn shutdown(&self, handle: HandleId) -> Result<()> {
        self.shutdown_with(self.shutdown_req(), handle)
    }

    pub fn shutdown_with(&self, req: ShutdownReq, handle: HandleId) -> Result<()> {
        self.one_shot(req.0, |reactor, id| reactor.arm_shutdown(handle, id))
    }

    /// Write `data`, suspending until it is flushed or fails.
    pub fn write(&self, req: WriteReq, handle: HandleId, data: &[u8]) -> Result<()> {
        self.write_vectored(req, handle, &[data])
    }

    /// Write several buffers as one ordered unit.
    pub fn write_vectored(&self, req: WriteReq, handle: HandleId, bufs: &[&[u8]]) -> Result<()> {
        self.one_shot(req.0, |reactor, id| reactor.arm_write(handle, id, bufs, None))
    }

    /// Write `data` and pass `send_handle` to the peer in the same message.
    pub fn write2(
        &self,
        req: WriteReq,
        handle: HandleId,
        data: &[u8],
        send_handle: HandleId,
    ) -> Result<()> {
        self.one_shot(req.0, |reactor, id| {
            reactor.arm_write(handle, id, &[data], Some(send_handle))
        })
    }

    fn one_shot<F>(&self, req: Request, arm: F) -> Result<()>
    where
        F: FnOnce(&mut dyn StreamReactor, ReqId) -> i64,
    {
        let Some(token) = self.sched.current() else {
            self.requests.abort(req);
            return Err(StreamError::NoContext);
        };
        self.requests.arm(&req, token);

        let rc = {
            let mut reactor = self.reactor();
            arm(&mut **reactor, req.id())
        };
        if rc < 0 {
            kdebug!("{} {} failed to arm: {}", req.kind(), req.id(), rc);
            self.requests.abort(req);
            return Err(StreamError::os(rc));
        }

        let status = self.sched.suspend(token);
        translate_unit(status)
    }

    // ── Continuous modes ──

    /// Start accepting connections; each pending one emits `onconnection`.
    pub fn listen(&self, handle: HandleId, backlog: i32) -> Result<()> {
        if backlog < 0 {
            return Err(StreamError::InvalidArgument("backlog must be non-negative"));
        }
        translate_unit(self.reactor().arm_listen(handle, backlog))?;
        self.registry.set_listening(handle, true);
        Ok(())
    }

    /// Move one pending connection of `server` into `client`.
    pub fn accept(&self, server: HandleId, client: HandleId) -> Result<()> {
        translate_unit(self.reactor().arm_accept(server, client))
    }

    /// Start continuous reading; each chunk, EOF or error emits `onread`.
    pub fn read_start(&self, handle: HandleId) -> Result<()> {
        translate_unit(self.reactor().arm_read(handle, self.alloc.clone()))?;
        self.registry.set_reading(handle, true);
        Ok(())
    }

    /// Stop continuous reading. Idempotent.
    pub fn read_stop(&self, handle: HandleId) -> Result<()> {
        self.registry.set_reading(handle, false);
        translate_unit(self.reactor().stop_read(handle))
    }

    // ── Non-suspending ──

    /// Write as much of `data` as the transport takes right now.
    pub fn try_write(&self, handle: HandleId, data: &[u8]) -> Result<usize> {
        translate(self.reactor().try_write(handle, &[data]))
    }

    pub fn is_readable(&self, handle: HandleId) -> bool {
        self.reactor().query_readable(handle)
    }

    pub fn is_writable(&self, handle: HandleId) -> bool {
        self.reactor().query_writable(handle)
    }

    pub fn set_blocking(&self, handle: HandleId, blocking: bool) -> Result<()> {
        translate_unit(self.reactor().set_blocking_mode(handle, blocking))
    }

    /// Bytes queued on `handle` and not yet flushed.
    pub fn write_queue_size(&self, handle: HandleId) -> usize {
        self.reactor().write_queue_size(handle)
    }

    // ── Contexts ──

    /// Start `f` as a new execution context.
    pub fn spawn<F>(&self, f: F) -> Result<ContextId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sched.spawn(Box::new(f))
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.sched
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.pending()
    }

    pub fn buffers_in_use(&self) -> usize {
        self.alloc.in_use()
    }

    // ── Loop side ──

    /// One reactor pass. Completions are appended to `out`.
    pub fn poll(&self, timeout: Option<Duration>, out: &mut Vec<Completion>) -> usize {
        self.reactor().run_once(timeout, out)
    }

    /// Whether the reactor still has registrations or queued work.
    pub fn has_active(&self) -> bool {
        self.reactor().has_active()
    }

    pub(crate) fn requests(&self) -> &RequestTable {
        &self.requests
    }

    pub(crate) fn registry(&self) -> &dyn HandleRegistry {
        &*self.registry
    }

    pub(crate) fn alloc(&self) -> &dyn AllocPolicy {
        &*self.alloc
    }

    pub(crate) fn diag(&self) -> &dyn DiagSink {
        &*self.diag
    }

    fn reactor(&self) -> MutexGuard<'_, Box<dyn StreamReactor>> {
        self.reactor.lock().unwrap_or_else(|e| e.into_inner())
    }
}
