//! `FiberScheduler` — default `Scheduler` implementation.
//!
//! Every execution context is a dedicated OS thread, but only one of
//! them (or the loop thread) runs at any moment: control moves by an
//! explicit baton handoff. The loop hands the baton to a ready context
//! in `run_ready()`; the context hands it back when it suspends or
//! finishes. From the program's point of view this is a single-threaded
//! cooperative scheduler with real stacks, so blocking-style code like
//! `bridge.write(req, h, data)?` reads top to bottom.
//!
//! Status delivery follows the park/wake pattern: `resume()` stores the
//! status in the context's park word and queues it; the context reads
//! the word when it gets the baton back.

use gvstream_core::errno::ECANCELED;
use gvstream_core::error::{Result, StreamError};
use gvstream_core::id::ContextId;
use gvstream_core::scheduler::{ContextFn, ParkToken, Scheduler};
use gvstream_core::{kerror, ktrace, kwarn};

use crossbeam_queue::SegQueue;

use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

static NEXT_INSTANCE: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// (scheduler instance, context) running on this thread.
    static CURRENT: Cell<(usize, ContextId)> = const { Cell::new((0, ContextId::NONE)) };
}

/// Who holds the baton for one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Loop,
    Context,
    /// Dropped before its first slice; the closure never runs.
    Cancelled,
    Done,
}

/// Park word of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Park {
    Running,
    Parked,
    Notified(i64),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Fiber {
    id: ContextId,
    turn: Mutex<Turn>,
    cv: Condvar,
    park: Mutex<Park>,
    /// Set by the loop when it hands over the first slice.
    started: AtomicBool,
}

impl Fiber {
    fn new(id: ContextId) -> Self {
        Self {
            id,
            turn: Mutex::new(Turn::Loop),
            cv: Condvar::new(),
            park: Mutex::new(Park::Running),
            started: AtomicBool::new(false),
        }
    }

    /// Loop side: give the baton to this context and wait for it back.
    fn run_slice(&self) {
        let mut turn = lock(&self.turn);
        if *turn != Turn::Loop {
            return;
        }
        self.started.store(true, Ordering::Release);
        *turn = Turn::Context;
        self.cv.notify_all();
        while *turn == Turn::Context {
            turn = self.cv.wait(turn).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Context side: wait for the first slice. `false` if cancelled instead.
    fn wait_turn(&self) -> bool {
        let mut turn = lock(&self.turn);
        while *turn == Turn::Loop {
            turn = self.cv.wait(turn).unwrap_or_else(|e| e.into_inner());
        }
        *turn == Turn::Context
    }

    /// Loop side: tell a context that never started to drop its closure,
    /// and wait until it has.
    fn cancel(&self) {
        let mut turn = lock(&self.turn);
        if *turn != Turn::Loop {
            return;
        }
        *turn = Turn::Cancelled;
        self.cv.notify_all();
        while *turn != Turn::Done {
            turn = self.cv.wait(turn).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Context side: give the baton back and wait for the next slice.
    fn yield_to_loop(&self) {
        let mut turn = lock(&self.turn);
        *turn = Turn::Loop;
        self.cv.notify_all();
        while *turn == Turn::Loop {
            turn = self.cv.wait(turn).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Context side: final handoff.
    fn finish(&self) {
        let mut turn = lock(&self.turn);
        *turn = Turn::Done;
        self.cv.notify_all();
    }
}

struct Shared {
    instance: usize,
    fibers: Mutex<HashMap<ContextId, Arc<Fiber>>>,
    ready: SegQueue<ContextId>,
    next_id: AtomicU32,
    live: AtomicUsize,
    stack_size: usize,
}

impl Shared {
    fn lookup(&self, id: ContextId) -> Option<Arc<Fiber>> {
        lock(&self.fibers).get(&id).cloned()
    }

    fn retire(&self, id: ContextId) {
        lock(&self.fibers).remove(&id);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cooperative scheduler of baton-passing contexts.
pub struct FiberScheduler {
    shared: Arc<Shared>,
}

impl FiberScheduler {
    /// Default stack size per context.
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    pub fn new() -> Self {
        Self::with_stack_size(Self::DEFAULT_STACK_SIZE)
    }

    pub fn with_stack_size(stack_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                fibers: Mutex::new(HashMap::new()),
                ready: SegQueue::new(),
                next_id: AtomicU32::new(0),
                live: AtomicUsize::new(0),
                stack_size: stack_size.max(16 * 1024),
            }),
        }
    }

    /// Id of the calling context, if it belongs to this scheduler.
    pub fn current_id(&self) -> Option<ContextId> {
        let (instance, id) = CURRENT.with(|c| c.get());
        if instance == self.shared.instance {
            id.to_option()
        } else {
            None
        }
    }

    /// Requeue the calling context behind every other ready one.
    /// No-op outside a context.
    pub fn yield_now(&self) {
        let Some(id) = self.current_id() else {
            return;
        };
        let Some(fiber) = self.shared.lookup(id) else {
            return;
        };
        self.shared.ready.push(id);
        fiber.yield_to_loop();
    }
}

impl Default for FiberScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for FiberScheduler {
    fn current(&self) -> Option<ParkToken> {
        self.current_id().map(ParkToken::new)
    }

    fn suspend(&self, token: ParkToken) -> i64 {
        let Some(fiber) = self.shared.lookup(token.ctx) else {
            kwarn!("suspend of unknown context {}", token.ctx);
            return ECANCELED;
        };
        if self.current_id() != Some(token.ctx) {
            kwarn!("context {} suspended from outside itself", token.ctx);
            return ECANCELED;
        }

        {
            let mut park = lock(&fiber.park);
            if let Park::Notified(status) = *park {
                // Resumed before we got here.
                *park = Park::Running;
                return status;
            }
            *park = Park::Parked;
        }

        ktrace!("context {} parked", fiber.id);
        fiber.yield_to_loop();

        let mut park = lock(&fiber.park);
        match std::mem::replace(&mut *park, Park::Running) {
            Park::Notified(status) => status,
            other => {
                kwarn!("context {} woke in state {:?}", fiber.id, other);
                ECANCELED
            }
        }
    }

    fn resume(&self, token: ParkToken, status: i64) {
        let Some(fiber) = self.shared.lookup(token.ctx) else {
            kwarn!("resume of unknown context {}", token.ctx);
            return;
        };
        let mut park = lock(&fiber.park);
        match *park {
            Park::Parked => {
                *park = Park::Notified(status);
                drop(park);
                self.shared.ready.push(token.ctx);
            }
            Park::Running => *park = Park::Notified(status),
            Park::Notified(_) => {
                kwarn!("context {} resumed twice; ignoring status {}", token.ctx, status);
            }
        }
    }

    fn spawn(&self, f: ContextFn) -> Result<ContextId> {
        let id = ContextId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let fiber = Arc::new(Fiber::new(id));
        lock(&self.shared.fibers).insert(id, Arc::clone(&fiber));
        self.shared.live.fetch_add(1, Ordering::AcqRel);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("gvs-ctx-{}", id.as_u32()))
            .stack_size(self.shared.stack_size)
            .spawn(move || {
                if !fiber.wait_turn() {
                    drop(f);
                    fiber.finish();
                    return;
                }
                CURRENT.with(|c| c.set((shared.instance, id)));
                if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                    kerror!("context {} panicked", id);
                }
                CURRENT.with(|c| c.set((0, ContextId::NONE)));
                shared.retire(id);
                fiber.finish();
            });

        match spawned {
            Ok(_) => {
                self.shared.ready.push(id);
                Ok(id)
            }
            Err(e) => {
                self.shared.retire(id);
                Err(StreamError::Scheduler(format!("spawn context: {}", e)))
            }
        }
    }

    fn run_ready(&self) -> usize {
        let n = self.shared.ready.len();
        let mut ran = 0;
        for _ in 0..n {
            let Some(id) = self.shared.ready.pop() else {
                break;
            };
            if let Some(fiber) = self.shared.lookup(id) {
                fiber.run_slice();
                ran += 1;
            }
        }
        ran
    }

    fn live(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    fn ready(&self) -> usize {
        self.shared.ready.len()
    }

    fn cancel_unstarted(&self) -> usize {
        let unstarted: Vec<Arc<Fiber>> = lock(&self.shared.fibers)
            .values()
            .filter(|f| !f.started.load(Ordering::Acquire))
            .cloned()
            .collect();
        for fiber in &unstarted {
            fiber.cancel();
            self.shared.retire(fiber.id);
            ktrace!("context {} cancelled before start", fiber.id);
        }
        unstarted.len()
    }
}

impl Drop for FiberScheduler {
    fn drop(&mut self) {
        self.cancel_unstarted();
        let live = self.live();
        if live > 0 {
            kwarn!("scheduler dropped with {} parked context(s)", live);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_current_outside_context() {
        let sched = FiberScheduler::new();
        assert!(sched.current().is_none());
        assert_eq!(sched.live(), 0);
        assert_eq!(sched.run_ready(), 0);
    }

    #[test]
    fn test_suspend_then_resume_delivers_status() {
        let sched = Arc::new(FiberScheduler::new());
        let events = log();

        let (s, e) = (Arc::clone(&sched), Arc::clone(&events));
        let id = sched
            .spawn(Box::new(move || {
                e.lock().unwrap().push("start".into());
                let tok = s.current().unwrap();
                let status = s.suspend(tok);
                e.lock().unwrap().push(format!("resumed {}", status));
            }))
            .unwrap();

        assert_eq!(sched.run_ready(), 1);
        assert_eq!(*events.lock().unwrap(), vec!["start".to_string()]);
        assert_eq!(sched.live(), 1);
        assert_eq!(sched.ready(), 0);

        sched.resume(ParkToken::new(id), 7);
        assert_eq!(sched.ready(), 1);
        assert_eq!(sched.run_ready(), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start".to_string(), "resumed 7".to_string()]
        );
        assert_eq!(sched.live(), 0);
    }

    #[test]
    fn test_resume_before_suspend_does_not_yield() {
        let sched = Arc::new(FiberScheduler::new());
        let events = log();

        let (s, e) = (Arc::clone(&sched), Arc::clone(&events));
        sched
            .spawn(Box::new(move || {
                let tok = s.current().unwrap();
                s.resume(tok, 3);
                let status = s.suspend(tok);
                e.lock().unwrap().push(format!("got {}", status));
            }))
            .unwrap();

        sched.run_ready();
        assert_eq!(*events.lock().unwrap(), vec!["got 3".to_string()]);
        assert_eq!(sched.live(), 0);
    }

    #[test]
    fn test_double_resume_is_ignored() {
        let sched = Arc::new(FiberScheduler::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let (s, r) = (Arc::clone(&sched), Arc::clone(&runs));
        let id = sched
            .spawn(Box::new(move || {
                let tok = s.current().unwrap();
                let status = s.suspend(tok);
                assert_eq!(status, 1);
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        sched.run_ready();
        sched.resume(ParkToken::new(id), 1);
        sched.resume(ParkToken::new(id), 2);
        assert_eq!(sched.ready(), 1);
        sched.run_ready();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(sched.run_ready(), 0);
    }

    #[test]
    fn test_yield_now_round_robin() {
        let sched = Arc::new(FiberScheduler::new());
        let events = log();

        for name in ["a", "b"] {
            let (s, e) = (Arc::clone(&sched), Arc::clone(&events));
            sched
                .spawn(Box::new(move || {
                    e.lock().unwrap().push(format!("{}1", name));
                    s.yield_now();
                    e.lock().unwrap().push(format!("{}2", name));
                }))
                .unwrap();
        }

        sched.run_ready();
        sched.run_ready();
        assert_eq!(*events.lock().unwrap(), vec!["a1", "b1", "a2", "b2"]);
        assert_eq!(sched.live(), 0);
    }

    #[test]
    fn test_cancel_unstarted_drops_closure() {
        let sched = FiberScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let held = Arc::new(());

        let (r, h) = (Arc::clone(&ran), Arc::clone(&held));
        sched
            .spawn(Box::new(move || {
                let _h = h;
                r.store(true, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(Arc::strong_count(&held), 2);

        assert_eq!(sched.cancel_unstarted(), 1);
        assert_eq!(sched.live(), 0);
        assert_eq!(Arc::strong_count(&held), 1);
        assert_eq!(sched.run_ready(), 0);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_leaves_started_contexts() {
        let sched = Arc::new(FiberScheduler::new());
        let events = log();
        let (s, e) = (Arc::clone(&sched), Arc::clone(&events));
        sched
            .spawn(Box::new(move || {
                let tok = s.current().unwrap();
                let status = s.suspend(tok);
                e.lock().unwrap().push(format!("resumed {}", status));
            }))
            .unwrap();
        sched.run_ready();

        assert_eq!(sched.cancel_unstarted(), 0);
        assert_eq!(sched.live(), 1);
        sched.resume(ParkToken::new(ContextId::new(0)), 5);
        sched.run_ready();
        assert_eq!(sched.live(), 0);
        assert_eq!(*events.lock().unwrap(), vec!["resumed 5".to_string()]);
    }

    #[test]
    fn test_panicking_context_is_retired() {
        let sched = FiberScheduler::new();
        sched.spawn(Box::new(|| panic!("boom"))).unwrap();
        sched.run_ready();
        assert_eq!(sched.live(), 0);
    }
}
