//! Loop driver
//!
//! Wires the default collaborators together and drives them on the
//! calling thread:
//!
//! ```text
//! loop {
//!     scheduler.run_ready()          contexts run until they park
//!     reactor.run_once(timeout)      zero timeout if a context is ready
//!     dispatch(completions)          resume contexts / emit events
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gvstream_core::buffer::AllocPolicy;
use gvstream_core::error::{Result, StreamError};
use gvstream_core::id::ContextId;
use gvstream_core::reactor::Completion;
use gvstream_core::scheduler::Scheduler;
use gvstream_core::{kdebug, kinfo, kwarn};
use gvstream_module::{FiberScheduler, HeapAlloc, PollReactor, PollReactorConfig, PooledAlloc};

use crate::config::StreamConfig;
use crate::dispatch::dispatch_all;
use crate::stream::StreamBridge;

/// Turns the teardown spends draining contexts before giving up.
const DRAIN_TURNS: usize = 64;

/// Owns the bridge and runs the loop.
///
/// Dropping the runtime closes every handle, resumes parked contexts
/// with `ECANCELED` and discards contexts that never ran.
pub struct Runtime {
    config: StreamConfig,
    bridge: Arc<StreamBridge>,
    batch: Vec<Completion>,
}

impl Runtime {
    /// Runtime over `PollReactor`, `FiberScheduler` and the allocation
    /// policy selected by `config.pool_buffers`.
    pub fn new(config: StreamConfig) -> Result<Self> {
        config.validate().map_err(StreamError::InvalidArgument)?;

        let reactor = PollReactor::with_config(PollReactorConfig {
            read_size: config.read_buf_size,
            max_writes_per_pass: config.write_batch,
        });
        let sched: Arc<dyn Scheduler> = Arc::new(FiberScheduler::with_stack_size(config.stack_size));
        let alloc: Arc<dyn AllocPolicy> = if config.pool_buffers > 0 {
            Arc::new(PooledAlloc::new(config.read_buf_size, config.pool_buffers))
        } else {
            Arc::new(HeapAlloc::new(config.read_buf_size))
        };

        kinfo!(
            "gvstream: read_buf={} pool={} poll_timeout={:?}",
            config.read_buf_size,
            config.pool_buffers,
            config.poll_timeout
        );
        let bridge = StreamBridge::new(Box::new(reactor), sched, alloc);
        Ok(Self::with_bridge(config, bridge))
    }

    /// Runtime over an already assembled bridge.
    pub fn with_bridge(config: StreamConfig, bridge: StreamBridge) -> Self {
        Self {
            config,
            bridge: Arc::new(bridge),
            batch: Vec::with_capacity(64),
        }
    }

    pub fn bridge(&self) -> Arc<StreamBridge> {
        Arc::clone(&self.bridge)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start `f` as a new execution context.
    pub fn spawn<F>(&self, f: F) -> Result<ContextId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.bridge.spawn(f)
    }

    /// Run `f` as an execution context and drive the loop until it returns.
    ///
    /// Other contexts keep their state and continue on the next
    /// `block_on` or `run`.
    pub fn block_on<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let result = Arc::new(Mutex::new(None));
        let finished = Arc::new(AtomicBool::new(false));

        let out = Arc::clone(&result);
        let guard = FinishGuard(Arc::clone(&finished));
        self.spawn(move || {
            let _guard = guard;
            let value = f();
            if let Ok(mut slot) = out.lock() {
                *slot = Some(value);
            }
        })?;

        loop {
            if finished.load(Ordering::Acquire) {
                let value = result.lock().ok().and_then(|mut slot| slot.take());
                return value
                    .ok_or_else(|| StreamError::Scheduler("main context panicked".into()));
            }
            self.turn()?;
        }
    }

    /// Drive the loop until no context is alive and the reactor is idle.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let sched = self.bridge.scheduler();
            if sched.live() == 0 && !self.bridge.has_active() {
                kdebug!("gvstream: loop idle, exiting");
                return Ok(());
            }
            self.turn()?;
        }
    }

    /// One loop iteration. Returns contexts run plus completions dispatched.
    pub fn turn(&mut self) -> Result<usize> {
        let sched = Arc::clone(self.bridge.scheduler());
        let ran = sched.run_ready();

        let timeout = if sched.ready() > 0 {
            Duration::ZERO
        } else {
            self.config.poll_timeout
        };
        self.bridge.poll(Some(timeout), &mut self.batch);
        let dispatched = dispatch_all(&self.bridge, &mut self.batch);

        if ran == 0
            && dispatched == 0
            && sched.ready() == 0
            && sched.live() > 0
            && !self.bridge.has_active()
        {
            return Err(StreamError::Scheduler(format!(
                "{} context(s) parked with no pending I/O",
                sched.live()
            )));
        }
        Ok(ran + dispatched)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let sched = Arc::clone(self.bridge.scheduler());
        for _ in 0..DRAIN_TURNS {
            let closed = self.bridge.close_all();
            self.bridge.poll(Some(Duration::ZERO), &mut self.batch);
            dispatch_all(&self.bridge, &mut self.batch);
            let cancelled = sched.cancel_unstarted();
            if closed > 0 || cancelled > 0 {
                kdebug!("gvstream: teardown closed {} handle(s), cancelled {} context(s)", closed, cancelled);
            }
            if sched.live() == 0 {
                return;
            }
            sched.run_ready();
        }
        kwarn!("gvstream: {} context(s) still live after teardown", sched.live());
    }
}

/// Marks the main context finished, including when it unwinds.
struct FinishGuard(Arc<AtomicBool>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use gvstream_core::errno::EBADF;
    use gvstream_core::id::HandleId;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::net::UnixStream;

    fn runtime() -> Runtime {
        let config = StreamConfig::builtin().poll_timeout(Duration::from_millis(10));
        Runtime::new(config).unwrap()
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    fn recorder(bridge: &StreamBridge, handle: HandleId) -> Log {
        let log: Log = Arc::default();
        let sink = Arc::clone(&log);
        bridge.set_listener(
            handle,
            Arc::new(move |_: &Arc<StreamBridge>, _: HandleId, ev: Event| {
                sink.lock().unwrap().push(ev);
            }),
        );
        log
    }

    fn turn_until(rt: &mut Runtime, mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            rt.turn().unwrap();
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_block_on_returns_value() {
        let mut rt = runtime();
        assert_eq!(rt.block_on(|| 6 * 7).unwrap(), 42);
    }

    #[test]
    fn test_block_on_reports_panic() {
        let mut rt = runtime();
        let err = rt.block_on(|| -> u32 { panic!("boom") }).unwrap_err();
        assert!(matches!(err, StreamError::Scheduler(_)));
    }

    #[test]
    fn test_write_round_trip_in_order() {
        let mut rt = runtime();
        let bridge = rt.bridge();
        let (a, b) = UnixStream::pair().unwrap();
        let tx = bridge.open(a).unwrap();
        let rx = bridge.open(b).unwrap();
        let log = recorder(&bridge, rx);
        bridge.read_start(rx).unwrap();

        let chunks: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 1000 + i as usize]).collect();
        let expected: Vec<u8> = chunks.concat();

        let b2 = Arc::clone(&bridge);
        rt.block_on(move || -> crate::Result<()> {
            for chunk in &chunks {
                b2.write(b2.write_req(), tx, chunk)?;
            }
            b2.shutdown(tx)
        })
        .unwrap()
        .unwrap();
        rt.run().unwrap();

        let events = log.lock().unwrap().clone();
        let (last, data) = events.split_last().unwrap();
        assert!(last.is_eof());
        let mut got = Vec::new();
        for ev in data {
            match ev {
                Event::Read { error: None, data: Some(d) } => {
                    assert!(!d.is_empty());
                    got.extend_from_slice(d);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(got, expected);
        assert_eq!(bridge.pending_requests(), 0);
        assert_eq!(bridge.buffers_in_use(), 0);
    }

    #[test]
    fn test_writes_from_two_contexts_keep_submission_order() {
        let mut rt = runtime();
        let bridge = rt.bridge();
        let (a, mut peer) = UnixStream::pair().unwrap();
        let tx = bridge.open(a).unwrap();

        let b2 = Arc::clone(&bridge);
        rt.block_on(move || {
            for msg in [&b"first,"[..], &b"second"[..]] {
                let b3 = Arc::clone(&b2);
                b2.spawn(move || {
                    b3.write(b3.write_req(), tx, msg).unwrap();
                })
                .unwrap();
            }
        })
        .unwrap();
        rt.run().unwrap();
        bridge.close(tx).unwrap();

        let mut got = Vec::new();
        peer.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"first,second");
    }

    #[test]
    fn test_write_on_closed_handle_fails_without_suspending() {
        let mut rt = runtime();
        let bridge = rt.bridge();
        let (a, _peer) = UnixStream::pair().unwrap();
        let tx = bridge.open(a).unwrap();
        bridge.close(tx).unwrap();

        let b2 = Arc::clone(&bridge);
        let res = rt
            .block_on(move || b2.write(b2.write_req(), tx, b"abc"))
            .unwrap();
        assert!(res.unwrap_err().is(EBADF));
        assert_eq!(bridge.pending_requests(), 0);
    }

    #[test]
    fn test_listen_connection_accept() {
        let mut rt = runtime();
        let bridge = rt.bridge();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = bridge.open(listener).unwrap();

        let accepted: Arc<Mutex<Vec<crate::Result<HandleId>>>> = Arc::default();
        let out = Arc::clone(&accepted);
        bridge.set_listener(
            server,
            Arc::new(move |b: &Arc<StreamBridge>, h: HandleId, ev: Event| {
                assert_eq!(ev, Event::Connection { error: None });
                let client = b.open_empty();
                out.lock().unwrap().push(b.accept(h, client).map(|_| client));
            }),
        );
        assert!(bridge.listen(server, 128).is_ok());

        let mut peer = TcpStream::connect(addr).unwrap();
        turn_until(&mut rt, || !accepted.lock().unwrap().is_empty());

        let client = accepted.lock().unwrap()[0].clone().unwrap();
        assert!(bridge.is_readable(client));
        assert!(bridge.is_writable(client));

        assert_eq!(bridge.try_write(client, b"ping").unwrap(), 4);
        let mut got = [0u8; 4];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"ping");
        assert_eq!(accepted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_read_start_then_stop_emits_nothing() {
        let mut rt = runtime();
        let bridge = rt.bridge();
        let (a, mut peer) = UnixStream::pair().unwrap();
        let rx = bridge.open(a).unwrap();
        let log = recorder(&bridge, rx);

        bridge.read_start(rx).unwrap();
        bridge.read_stop(rx).unwrap();
        peer.write_all(b"unseen").unwrap();
        drop(peer);
        for _ in 0..5 {
            rt.turn().unwrap();
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_releases_parked_and_unstarted_contexts() {
        const LEN: usize = 8 << 20;
        let mut rt = runtime();
        let bridge = rt.bridge();
        let (a, mut peer) = UnixStream::pair().unwrap();
        let tx = bridge.open(a).unwrap();

        let b2 = Arc::clone(&bridge);
        rt.spawn(move || {
            let _ = b2.write(b2.write_req(), tx, &vec![7u8; LEN]);
        })
        .unwrap();
        for _ in 0..5 {
            rt.turn().unwrap();
        }
        assert!(bridge.pending_requests() > 0);

        let ran = Arc::new(AtomicBool::new(false));
        let (b3, flag) = (Arc::clone(&bridge), Arc::clone(&ran));
        rt.spawn(move || {
            flag.store(true, Ordering::SeqCst);
            b3.close(tx).unwrap();
        })
        .unwrap();

        let weak = Arc::downgrade(&bridge);
        drop(bridge);
        drop(rt);
        assert!(weak.upgrade().is_none());
        assert!(!ran.load(Ordering::SeqCst));

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut got = Vec::new();
        peer.read_to_end(&mut got).unwrap();
        assert!(got.len() < LEN);
        assert!(got.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_echo_through_contexts() {
        let mut rt = runtime();
        let bridge = rt.bridge();
        let (a, mut peer) = UnixStream::pair().unwrap();
        let h = bridge.open(a).unwrap();

        bridge.set_listener(
            h,
            Arc::new(|b: &Arc<StreamBridge>, h: HandleId, ev: Event| {
                let b2 = Arc::clone(b);
                let res = match ev {
                    Event::Read { data: Some(d), .. } => {
                        b.spawn(move || b2.write(b2.write_req(), h, &d).unwrap())
                    }
                    _ => b.spawn(move || b2.shutdown(h).unwrap()),
                };
                res.unwrap();
            }),
        );
        bridge.read_start(h).unwrap();

        peer.write_all(b"hello").unwrap();
        peer.shutdown(std::net::Shutdown::Write).unwrap();
        rt.run().unwrap();

        let mut got = Vec::new();
        peer.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"hello");
    }
}
