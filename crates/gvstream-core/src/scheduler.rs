//! Execution context scheduler contract.
//!
//! A one-shot stream operation suspends the calling context at the point
//! the native operation is armed and the Completion Dispatcher resumes it
//! with the status. The scheduler carries that status: whatever is passed
//! to [`Scheduler::resume`] is what [`Scheduler::suspend`] returns.
//!
//! # Implementors
//!
//! - `FiberScheduler` (default): one parked OS thread per context with a
//!   baton handoff, so exactly one context or the loop runs at a time.

use crate::error::Result;
use crate::id::ContextId;

/// Token identifying one parked (or about to be parked) context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParkToken {
    pub ctx: ContextId,
}

impl ParkToken {
    #[inline]
    pub const fn new(ctx: ContextId) -> Self {
        Self { ctx }
    }
}

/// A unit of work run as its own execution context.
pub type ContextFn = Box<dyn FnOnce() + Send + 'static>;

/// Suspend/resume of cooperatively scheduled execution contexts.
///
/// **Contract:**
/// - `suspend()` is only called by the context named in the token.
/// - `resume()` may run before the matching `suspend()`; the status is
///   kept and `suspend()` then returns without yielding.
/// - a token is resumed at most once per suspension.
pub trait Scheduler: Send + Sync {
    /// Token for the calling context, `None` outside any context.
    fn current(&self) -> Option<ParkToken>;

    /// Park the calling context until resumed. Returns the resume status.
    fn suspend(&self, token: ParkToken) -> i64;

    /// Make a parked context runnable, handing it `status`.
    fn resume(&self, token: ParkToken, status: i64);

    /// Start a new context. It first runs on the next `run_ready()`.
    fn spawn(&self, f: ContextFn) -> Result<ContextId>;

    /// Run every context that is ready now until each suspends or finishes.
    /// Called by the loop driver only. Returns how many were run.
    fn run_ready(&self) -> usize;

    /// Contexts started and not yet finished.
    fn live(&self) -> usize;

    /// Contexts waiting in the ready queue.
    fn ready(&self) -> usize;

    /// Drop every context that has not run yet, without running it.
    /// Called by the loop driver only. Returns how many were dropped.
    fn cancel_unstarted(&self) -> usize;
}
