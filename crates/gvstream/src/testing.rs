//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gvstream_core::buffer::AllocPolicy;
use gvstream_core::error::Result;
use gvstream_core::id::{ContextId, HandleId, ReqId};
use gvstream_core::reactor::{Completion, StreamReactor};
use gvstream_core::scheduler::{ContextFn, ParkToken, Scheduler};

/// Scheduler that records suspends and resumes and never runs anything.
#[derive(Default)]
pub struct RecordingScheduler {
    pub current: Mutex<Option<ParkToken>>,
    pub suspended: Mutex<Vec<ParkToken>>,
    pub resumed: Mutex<Vec<(ParkToken, i64)>>,
}

impl RecordingScheduler {
    pub fn in_context(ctx: u32) -> Self {
        let s = Self::default();
        *s.current.lock().unwrap() = Some(ParkToken::new(ContextId::new(ctx)));
        s
    }

    pub fn suspended(&self) -> Vec<ParkToken> {
        self.suspended.lock().unwrap().clone()
    }

    pub fn resumed(&self) -> Vec<(ParkToken, i64)> {
        self.resumed.lock().unwrap().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn current(&self) -> Option<ParkToken> {
        *self.current.lock().unwrap()
    }

    /// Returns `0` as if resumed successfully.
    fn suspend(&self, token: ParkToken) -> i64 {
        self.suspended.lock().unwrap().push(token);
        0
    }

    fn resume(&self, token: ParkToken, status: i64) {
        self.resumed.lock().unwrap().push((token, status));
    }

    fn spawn(&self, _f: ContextFn) -> Result<ContextId> {
        Ok(ContextId::NONE)
    }

    fn run_ready(&self) -> usize {
        0
    }

    fn live(&self) -> usize {
        0
    }

    fn ready(&self) -> usize {
        0
    }

    fn cancel_unstarted(&self) -> usize {
        0
    }
}

/// Reactor state shared between the test and the bridge.
#[derive(Default)]
pub struct Script {
    /// Status every `arm_*` call returns.
    pub arm_status: i64,
    /// Status `try_write` returns.
    pub try_status: i64,
    pub readable: bool,
    pub calls: Vec<String>,
    pub queued: VecDeque<Completion>,
}

/// Reactor that records calls and replays queued completions.
#[derive(Clone, Default)]
pub struct ScriptReactor(pub Arc<Mutex<Script>>);

impl ScriptReactor {
    pub fn push(&self, c: Completion) {
        self.0.lock().unwrap().queued.push_back(c);
    }

    pub fn set_arm_status(&self, code: i64) {
        self.0.lock().unwrap().arm_status = code;
    }

    pub fn set_try_status(&self, code: i64) {
        self.0.lock().unwrap().try_status = code;
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) -> i64 {
        let mut s = self.0.lock().unwrap();
        s.calls.push(call);
        s.arm_status
    }
}

impl StreamReactor for ScriptReactor {
    fn open_fd(&mut self, _fd: OwnedFd) -> Result<HandleId> {
        Ok(HandleId::new(0))
    }

    fn open_empty(&mut self) -> HandleId {
        HandleId::new(1)
    }

    fn close(&mut self, handle: HandleId) -> i64 {
        self.record(format!("close {}", handle))
    }

    fn open_handles(&self) -> Vec<HandleId> {
        Vec::new()
    }

    fn arm_shutdown(&mut self, handle: HandleId, req: ReqId) -> i64 {
        self.record(format!("shutdown {} {}", handle, req))
    }

    fn arm_listen(&mut self, handle: HandleId, backlog: i32) -> i64 {
        self.record(format!("listen {} {}", handle, backlog))
    }

    fn arm_accept(&mut self, server: HandleId, client: HandleId) -> i64 {
        self.record(format!("accept {} {}", server, client))
    }

    fn arm_read(&mut self, handle: HandleId, _alloc: Arc<dyn AllocPolicy>) -> i64 {
        self.record(format!("read_start {}", handle))
    }

    fn stop_read(&mut self, handle: HandleId) -> i64 {
        self.record(format!("read_stop {}", handle));
        0
    }

    fn arm_write(
        &mut self,
        handle: HandleId,
        req: ReqId,
        bufs: &[&[u8]],
        send_handle: Option<HandleId>,
    ) -> i64 {
        let bytes: usize = bufs.iter().map(|b| b.len()).sum();
        match send_handle {
            Some(h) => self.record(format!("write2 {} {} {} {}", handle, req, bytes, h)),
            None => self.record(format!("write {} {} {}", handle, req, bytes)),
        }
    }

    fn try_write(&mut self, handle: HandleId, _bufs: &[&[u8]]) -> i64 {
        self.record(format!("try_write {}", handle));
        self.0.lock().unwrap().try_status
    }

    fn query_readable(&self, _handle: HandleId) -> bool {
        self.0.lock().unwrap().readable
    }

    fn query_writable(&self, _handle: HandleId) -> bool {
        false
    }

    fn set_blocking_mode(&mut self, handle: HandleId, blocking: bool) -> i64 {
        self.record(format!("blocking {} {}", handle, blocking))
    }

    fn write_queue_size(&self, _handle: HandleId) -> usize {
        0
    }

    fn has_active(&self) -> bool {
        !self.0.lock().unwrap().queued.is_empty()
    }

    fn run_once(&mut self, _timeout: Option<Duration>, out: &mut Vec<Completion>) -> usize {
        let mut s = self.0.lock().unwrap();
        let n = s.queued.len();
        out.extend(s.queued.drain(..));
        n
    }
}

/// A bridge over scripted collaborators plus the handles tests inspect.
pub struct Harness {
    pub bridge: Arc<crate::stream::StreamBridge>,
    pub reactor: ScriptReactor,
    pub sched: Arc<RecordingScheduler>,
    pub alloc: Arc<gvstream_module::HeapAlloc>,
    pub sink: Arc<gvstream_core::diag::MemorySink>,
    pub events: Arc<Mutex<Vec<(HandleId, crate::event::Event)>>>,
}

impl Harness {
    /// Bridge whose calling thread counts as context `ctx3`.
    pub fn new() -> Self {
        Self::with_scheduler(RecordingScheduler::in_context(3))
    }

    pub fn with_scheduler(sched: RecordingScheduler) -> Self {
        let reactor = ScriptReactor::default();
        let sched = Arc::new(sched);
        let alloc = Arc::new(gvstream_module::HeapAlloc::default());
        let sink = Arc::new(gvstream_core::diag::MemorySink::new());
        let bridge = crate::stream::StreamBridge::new(
            Box::new(reactor.clone()),
            sched.clone(),
            alloc.clone(),
        )
        .with_diag(sink.clone());
        let bridge = Arc::new(bridge);
        Self {
            bridge,
            reactor,
            sched,
            alloc,
            sink,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bind a listener that records every event on `handle`.
    pub fn record_events(&self, handle: HandleId) {
        let events = Arc::clone(&self.events);
        self.bridge.set_listener(
            handle,
            Arc::new(
                move |_: &Arc<crate::stream::StreamBridge>, h: HandleId, ev: crate::event::Event| {
                    events.lock().unwrap().push((h, ev));
                },
            ),
        );
    }

    pub fn events(&self) -> Vec<(HandleId, crate::event::Event)> {
        self.events.lock().unwrap().clone()
    }

    /// Deliver everything the script has queued.
    pub fn pump(&self) -> usize {
        let mut batch = Vec::new();
        self.bridge.poll(None, &mut batch);
        crate::dispatch::dispatch_all(&self.bridge, &mut batch)
    }

    /// A read completion carrying `data`, reported as `nread`.
    pub fn read_completion(&self, handle: HandleId, nread: i64, data: &[u8]) -> Completion {
        let mut buf = self.alloc.alloc(4096);
        buf.as_mut_slice()[..data.len()].copy_from_slice(data);
        Completion::Read { handle, nread, buf }
    }
}
