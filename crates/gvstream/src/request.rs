//! Request Lifecycle Manager
//!
//! Every one-shot operation (shutdown, write, write2) is represented by a
//! request with its own `ReqId`. Arming pairs that id with the context
//! about to park on it; the completion for the id removes the entry and
//! resumes the context. Ids are never reused, so a stale or repeated completion
//! finds nothing and cannot resume anyone twice.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gvstream_core::id::ReqId;
use gvstream_core::scheduler::{ParkToken, Scheduler};
use gvstream_core::{ktrace, kwarn};

/// Kind tag of a one-shot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Shutdown,
    Write,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Shutdown => f.write_str("shutdown"),
            RequestKind::Write => f.write_str("write"),
        }
    }
}

/// One in-flight one-shot operation. Not `Clone`: whoever holds it is the
/// only one who can arm or abort it.
#[derive(Debug)]
pub struct Request {
    id: ReqId,
    kind: RequestKind,
}

impl Request {
    #[inline]
    pub fn id(&self) -> ReqId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

/// A request reserved for [`StreamBridge::shutdown_with`](crate::StreamBridge::shutdown_with).
#[derive(Debug)]
pub struct ShutdownReq(pub(crate) Request);

/// A request reserved for `write`, `write_vectored` or `write2`.
#[derive(Debug)]
pub struct WriteReq(pub(crate) Request);

impl ShutdownReq {
    pub fn id(&self) -> ReqId {
        self.0.id
    }
}

impl WriteReq {
    pub fn id(&self) -> ReqId {
        self.0.id
    }
}

struct Entry {
    kind: RequestKind,
    waiter: ParkToken,
}

/// Request/continuation pairing table keyed by request id.
pub struct RequestTable {
    next: AtomicU64,
    entries: Mutex<HashMap<ReqId, Entry>>,
    sched: Arc<dyn Scheduler>,
}

impl RequestTable {
    pub fn new(sched: Arc<dyn Scheduler>) -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            sched,
        }
    }

    /// Allocate a request of `kind`. No context is associated yet, and a
    /// request dropped before `arm` leaves nothing behind.
    pub fn begin(&self, kind: RequestKind) -> Request {
        let id = ReqId(self.next.fetch_add(1, Ordering::Relaxed));
        Request { id, kind }
    }

    /// Record `token` as the context to resume when `req` completes.
    /// Must happen before the native operation is armed.
    pub fn arm(&self, req: &Request, token: ParkToken) {
        let entry = Entry {
            kind: req.kind,
            waiter: token,
        };
        self.lock().insert(req.id, entry);
    }

    /// Release `req` and resume its context with `code`.
    ///
    /// Returns `false` if the id is unknown (already completed or aborted).
    pub fn complete(&self, id: ReqId, code: i64) -> bool {
        let entry = self.lock().remove(&id);
        match entry {
            Some(Entry { kind, waiter }) => {
                ktrace!("request {} ({}) done: {} -> {}", id, kind, code, waiter.ctx);
                self.sched.resume(waiter, code);
                true
            }
            None => {
                kwarn!("completion for unknown request {} (status {})", id, code);
                false
            }
        }
    }

    /// Release a request whose native operation failed to arm.
    pub fn abort(&self, req: Request) {
        self.lock().remove(&req.id);
    }

    /// Requests armed and not yet completed or aborted.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ReqId, Entry>> {
        // Entries are inserted and removed whole, so poisoning is harmless.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingScheduler;
    use gvstream_core::id::ContextId;

    fn table() -> (Arc<RecordingScheduler>, RequestTable) {
        let sched = Arc::new(RecordingScheduler::default());
        let table = RequestTable::new(sched.clone());
        (sched, table)
    }

    #[test]
    fn test_ids_are_unique_and_tagged() {
        let (_s, t) = table();
        let a = t.begin(RequestKind::Write);
        let b = t.begin(RequestKind::Shutdown);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), RequestKind::Write);
        assert_eq!(b.kind(), RequestKind::Shutdown);
        assert_eq!(t.pending(), 0);

        t.arm(&a, ParkToken::new(ContextId::new(1)));
        assert_eq!(t.pending(), 1);
    }

    #[test]
    fn test_complete_resumes_once() {
        let (s, t) = table();
        let token = ParkToken::new(ContextId::new(3));
        let req = t.begin(RequestKind::Write);
        t.arm(&req, token);

        assert!(t.complete(req.id(), -32));
        assert!(!t.complete(req.id(), 0));
        assert_eq!(s.resumed(), vec![(token, -32)]);
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn test_abort_releases_without_resume() {
        let (s, t) = table();
        let req = t.begin(RequestKind::Shutdown);
        let id = req.id();
        t.arm(&req, ParkToken::new(ContextId::new(1)));
        t.abort(req);

        assert_eq!(t.pending(), 0);
        assert!(!t.complete(id, 0));
        assert!(s.resumed().is_empty());
    }
}
