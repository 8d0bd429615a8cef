//! `PollReactor` — default `StreamReactor` implementation.
//!
//! A single-threaded reactor over non-blocking Unix descriptors using
//! level-triggered `poll(2)`. It never calls back into the bridge: every
//! outcome is appended to the completion list handed to `run_once()`.
//!
//! Per handle it keeps a FIFO write queue, an optional pending shutdown
//! (performed once the queue drains), continuous-read state with the
//! registered allocation policy, and for listeners at most one accepted
//! connection waiting to be moved out by `arm_accept`.

use gvstream_core::buffer::AllocPolicy;
use gvstream_core::errno::{
    last_os_code, EAGAIN, EALREADY, EBADF, ECANCELED, EINTR, EINVAL, EISCONN, ENOBUFS, ENOTCONN,
    ENOTSOCK, EOF, EPIPE,
};
use gvstream_core::error::{Result, StreamError};
use gvstream_core::id::{HandleId, ReqId};
use gvstream_core::reactor::{Completion, StreamReactor};
use gvstream_core::{kdebug, kerror, ktrace};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};

use std::collections::{BTreeMap, VecDeque};
use std::io::IoSlice;
use std::os::fd::{IntoRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

        fn suppress_sigpipe(_fd: RawFd) {}
    } else {
        const SEND_FLAGS: libc::c_int = 0;

        fn suppress_sigpipe(fd: RawFd) {
            let opt: libc::c_int = 1;
            // Not a socket (pipe, tty): nothing to do, the call just fails.
            unsafe {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_NOSIGPIPE,
                    &opt as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
            }
        }
    }
}

/// Default read size hint passed to the allocation policy.
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Reactor configuration.
#[derive(Debug, Clone)]
pub struct PollReactorConfig {
    /// Size hint for each read buffer.
    pub read_size: usize,
    /// Write attempts per handle per `run_once()` before yielding to others.
    pub max_writes_per_pass: usize,
}

impl Default for PollReactorConfig {
    fn default() -> Self {
        Self {
            read_size: DEFAULT_READ_SIZE,
            max_writes_per_pass: 64,
        }
    }
}

struct PendingWrite {
    req: ReqId,
    data: Vec<u8>,
    offset: usize,
    /// Duplicated descriptor to pass with the first chunk (write2).
    send_fd: Option<RawFd>,
}

impl PendingWrite {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn release_send_fd(&mut self) {
        if let Some(fd) = self.send_fd.take() {
            close_fd(fd);
        }
    }
}

struct Slot {
    /// `-1` for a handle that has no descriptor yet.
    fd: RawFd,
    readable: bool,
    writable: bool,
    listening: bool,
    reading: bool,
    alloc: Option<Arc<dyn AllocPolicy>>,
    /// Connection accepted by the reactor, waiting for `arm_accept`.
    accepted: Option<RawFd>,
    writes: VecDeque<PendingWrite>,
    queued_bytes: usize,
    shutdown: Option<ReqId>,
}

impl Slot {
    fn new(fd: RawFd) -> Self {
        Self {
            fd,
            readable: fd >= 0,
            writable: fd >= 0,
            listening: false,
            reading: false,
            alloc: None,
            accepted: None,
            writes: VecDeque::new(),
            queued_bytes: 0,
            shutdown: None,
        }
    }

    fn is_active(&self) -> bool {
        self.listening || self.reading || !self.writes.is_empty() || self.shutdown.is_some()
    }

    fn poll_events(&self) -> libc::c_short {
        let mut events = 0;
        if (self.listening && self.accepted.is_none()) || self.reading {
            events |= libc::POLLIN;
        }
        if !self.writes.is_empty() || self.shutdown.is_some() {
            events |= libc::POLLOUT;
        }
        events
    }

    fn stop_reading(&mut self) {
        self.reading = false;
        self.alloc = None;
    }
}

/// Single-threaded poll(2) reactor.
pub struct PollReactor {
    config: PollReactorConfig,
    slots: BTreeMap<HandleId, Slot>,
    next_handle: u32,
    /// Completions produced outside I/O (close), delivered first.
    deferred: VecDeque<Completion>,
    pollfds: Vec<libc::pollfd>,
    poll_ids: Vec<HandleId>,
}

impl PollReactor {
    pub fn new() -> Self {
        Self::with_config(PollReactorConfig::default())
    }

    pub fn with_config(config: PollReactorConfig) -> Self {
        Self {
            config,
            slots: BTreeMap::new(),
            next_handle: 0,
            deferred: VecDeque::new(),
            pollfds: Vec::new(),
            poll_ids: Vec::new(),
        }
    }

    /// Native descriptor of `handle`, if it has one.
    pub fn fd(&self, handle: HandleId) -> Option<RawFd> {
        self.slots.get(&handle).map(|s| s.fd).filter(|fd| *fd >= 0)
    }

    /// Number of open handles.
    pub fn handles(&self) -> usize {
        self.slots.len()
    }

    /// Next free id. Wraps around, skipping `HandleId::NONE` and ids
    /// still open.
    fn insert(&mut self, fd: RawFd) -> HandleId {
        let id = loop {
            let id = HandleId::new(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1);
            if !id.is_none() && !self.slots.contains_key(&id) {
                break id;
            }
        };
        self.slots.insert(id, Slot::new(fd));
        id
    }

    fn accept_pending(&mut self, id: HandleId, out: &mut Vec<Completion>) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        let fd = unsafe { libc::accept(slot.fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if fd < 0 {
            let code = last_os_code();
            if code != EAGAIN && code != EINTR {
                out.push(Completion::Connection { server: id, status: code });
            }
            return;
        }
        if let Err(code) = set_nonblocking(fd, true).and_then(|_| set_cloexec(fd)) {
            close_fd(fd);
            out.push(Completion::Connection { server: id, status: code });
            return;
        }
        suppress_sigpipe(fd);
        slot.accepted = Some(fd);
        ktrace!("reactor: {} accepted fd {}", id, fd);
        out.push(Completion::Connection { server: id, status: 0 });
    }

    fn read_ready(&mut self, id: HandleId, out: &mut Vec<Completion>) {
        let read_size = self.config.read_size;
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        let Some(alloc) = slot.alloc.clone() else {
            return;
        };

        let mut buf = alloc.alloc(read_size);
        if buf.is_empty() {
            slot.stop_reading();
            out.push(Completion::Read { handle: id, nread: ENOBUFS, buf });
            return;
        }

        let dst = buf.as_mut_slice();
        let n = unsafe { libc::read(slot.fd, dst.as_mut_ptr() as *mut libc::c_void, dst.len()) };
        let nread = if n > 0 {
            n as i64
        } else if n == 0 {
            slot.stop_reading();
            slot.readable = false;
            EOF
        } else {
            let code = last_os_code();
            if code == EAGAIN || code == EINTR {
                0
            } else {
                slot.stop_reading();
                code
            }
        };
        out.push(Completion::Read { handle: id, nread, buf });
    }

    fn write_ready(&mut self, id: HandleId, out: &mut Vec<Completion>) {
        let budget = self.config.max_writes_per_pass;
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };

        for _ in 0..budget {
            let fd = slot.fd;
            let Some(w) = slot.writes.front_mut() else {
                break;
            };
            let rest = &w.data[w.offset..];
            let rc = match w.send_fd {
                Some(send_fd) => send_with_fd(fd, rest, send_fd),
                None => send_bytes(fd, rest),
            };

            if rc >= 0 {
                w.release_send_fd();
                let n = rc as usize;
                w.offset += n;
                slot.queued_bytes -= n;
                if w.remaining() == 0 {
                    let req = w.req;
                    slot.writes.pop_front();
                    out.push(Completion::Write { req, status: 0 });
                    continue;
                }
                if n == 0 {
                    break;
                }
            } else if rc == EAGAIN || rc == EINTR {
                break;
            } else if let Some(mut failed) = slot.writes.pop_front() {
                failed.release_send_fd();
                slot.queued_bytes -= failed.remaining();
                out.push(Completion::Write { req: failed.req, status: rc });
            }
        }

        if slot.writes.is_empty() {
            if let Some(req) = slot.shutdown.take() {
                let rc = unsafe { libc::shutdown(slot.fd, libc::SHUT_WR) };
                let status = if rc == 0 { 0 } else { last_os_code() };
                out.push(Completion::Shutdown { req, status });
            }
        }
    }
}

impl Default for PollReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReactor for PollReactor {
    fn open_fd(&mut self, fd: OwnedFd) -> Result<HandleId> {
        let raw = fd.into_raw_fd();
        if let Err(code) = set_nonblocking(raw, true) {
            close_fd(raw);
            return Err(StreamError::os(code));
        }
        suppress_sigpipe(raw);
        let id = self.insert(raw);
        kdebug!("reactor: opened {} on fd {}", id, raw);
        Ok(id)
    }

    fn open_empty(&mut self) -> HandleId {
        self.insert(-1)
    }

    fn close(&mut self, handle: HandleId) -> i64 {
        let Some(mut slot) = self.slots.remove(&handle) else {
            return EBADF;
        };
        for mut w in slot.writes.drain(..) {
            w.release_send_fd();
            self.deferred.push_back(Completion::Write { req: w.req, status: ECANCELED });
        }
        if let Some(req) = slot.shutdown.take() {
            self.deferred.push_back(Completion::Shutdown { req, status: ECANCELED });
        }
        if let Some(fd) = slot.accepted.take() {
            close_fd(fd);
        }
        if slot.fd >= 0 {
            close_fd(slot.fd);
        }
        kdebug!("reactor: closed {}", handle);
        0
    }

    fn open_handles(&self) -> Vec<HandleId> {
        self.slots.keys().copied().collect()
    }

    fn arm_shutdown(&mut self, handle: HandleId, req: ReqId) -> i64 {
        let Some(slot) = self.slots.get_mut(&handle) else {
            return EBADF;
        };
        if slot.fd < 0 || !slot.writable || slot.shutdown.is_some() {
            return ENOTCONN;
        }
        slot.writable = false;
        slot.shutdown = Some(req);
        0
    }

    fn arm_listen(&mut self, handle: HandleId, backlog: i32) -> i64 {
        let Some(slot) = self.slots.get_mut(&handle) else {
            return EBADF;
        };
        if slot.fd < 0 {
            return EBADF;
        }
        if unsafe { libc::listen(slot.fd, backlog) } < 0 {
            return last_os_code();
        }
        slot.listening = true;
        slot.readable = false;
        slot.writable = false;
        0
    }

    fn arm_accept(&mut self, server: HandleId, client: HandleId) -> i64 {
        let fd = match self.slots.get_mut(&server) {
            None => return EBADF,
            Some(srv) if !srv.listening => return EINVAL,
            Some(srv) => match srv.accepted.take() {
                None => return EAGAIN,
                Some(fd) => fd,
            },
        };

        let status = match self.slots.get_mut(&client) {
            None => EBADF,
            Some(cli) if cli.fd >= 0 => EISCONN,
            Some(cli) => {
                cli.fd = fd;
                cli.readable = true;
                cli.writable = true;
                0
            }
        };
        if status < 0 {
            if let Some(srv) = self.slots.get_mut(&server) {
                srv.accepted = Some(fd);
            }
        }
        status
    }

    fn arm_read(&mut self, handle: HandleId, alloc: Arc<dyn AllocPolicy>) -> i64 {
        let Some(slot) = self.slots.get_mut(&handle) else {
            return EBADF;
        };
        if slot.reading {
            return EALREADY;
        }
        if slot.fd < 0 || !slot.readable {
            return ENOTCONN;
        }
        slot.reading = true;
        slot.alloc = Some(alloc);
        0
    }

    fn stop_read(&mut self, handle: HandleId) -> i64 {
        match self.slots.get_mut(&handle) {
            Some(slot) => {
                slot.stop_reading();
                0
            }
            None => EBADF,
        }
    }

    fn arm_write(
        &mut self,
        handle: HandleId,
        req: ReqId,
        bufs: &[&[u8]],
        send_handle: Option<HandleId>,
    ) -> i64 {
        match self.slots.get(&handle) {
            None => return EBADF,
            Some(slot) if slot.fd < 0 => return EBADF,
            Some(slot) if !slot.writable => return EPIPE,
            Some(_) => {}
        }
        // SCM_RIGHTS rides on data; an empty stream write carries nothing.
        if send_handle.is_some() && bufs.iter().all(|b| b.is_empty()) {
            return EINVAL;
        }

        let send_fd = match send_handle {
            None => None,
            Some(h) => {
                let Some(src) = self.fd(h) else {
                    return EBADF;
                };
                let dup = unsafe { libc::dup(src) };
                if dup < 0 {
                    return last_os_code();
                }
                Some(dup)
            }
        };

        let data = bufs.concat();
        let Some(slot) = self.slots.get_mut(&handle) else {
            return EBADF;
        };
        slot.queued_bytes += data.len();
        slot.writes.push_back(PendingWrite {
            req,
            data,
            offset: 0,
            send_fd,
        });
        0
    }

    fn try_write(&mut self, handle: HandleId, bufs: &[&[u8]]) -> i64 {
        let Some(slot) = self.slots.get(&handle) else {
            return EBADF;
        };
        if slot.fd < 0 {
            return EBADF;
        }
        if !slot.writable {
            return EPIPE;
        }
        if !slot.writes.is_empty() {
            return EAGAIN;
        }
        let data = bufs.concat();
        if data.is_empty() {
            return 0;
        }
        send_bytes(slot.fd, &data)
    }

    fn query_readable(&self, handle: HandleId) -> bool {
        self.slots.get(&handle).is_some_and(|s| s.fd >= 0 && s.readable)
    }

    fn query_writable(&self, handle: HandleId) -> bool {
        self.slots.get(&handle).is_some_and(|s| s.fd >= 0 && s.writable)
    }

    fn set_blocking_mode(&mut self, handle: HandleId, blocking: bool) -> i64 {
        let Some(fd) = self.fd(handle) else {
            return EBADF;
        };
        match set_nonblocking(fd, !blocking) {
            Ok(()) => 0,
            Err(code) => code,
        }
    }

    fn write_queue_size(&self, handle: HandleId) -> usize {
        self.slots.get(&handle).map_or(0, |s| s.queued_bytes)
    }

    fn has_active(&self) -> bool {
        !self.deferred.is_empty() || self.slots.values().any(Slot::is_active)
    }

    fn run_once(&mut self, timeout: Option<Duration>, out: &mut Vec<Completion>) -> usize {
        let start = out.len();
        out.extend(self.deferred.drain(..));

        self.pollfds.clear();
        self.poll_ids.clear();
        for (id, slot) in &self.slots {
            let events = slot.poll_events();
            if events != 0 && slot.fd >= 0 {
                self.pollfds.push(libc::pollfd { fd: slot.fd, events, revents: 0 });
                self.poll_ids.push(*id);
            }
        }
        if self.pollfds.is_empty() {
            return out.len() - start;
        }

        let timeout_ms = if out.len() > start {
            0
        } else {
            match timeout {
                Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
                None => -1,
            }
        };

        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let code = last_os_code();
            if code != EINTR {
                kerror!("reactor: poll failed: {}", StreamError::os(code));
            }
            return out.len() - start;
        }

        let ready: Vec<(HandleId, libc::c_short)> = self
            .poll_ids
            .iter()
            .zip(self.pollfds.iter())
            .filter(|(_, p)| p.revents != 0)
            .map(|(id, p)| (*id, p.revents))
            .collect();

        for (id, revents) in ready {
            let hangup = revents & (libc::POLLHUP | libc::POLLERR) != 0;
            let (listening, reading) = match self.slots.get(&id) {
                Some(s) => (s.listening, s.reading),
                None => continue,
            };
            if revents & libc::POLLIN != 0 || hangup {
                if listening {
                    self.accept_pending(id, out);
                } else if reading {
                    self.read_ready(id, out);
                }
            }
            if revents & libc::POLLOUT != 0 || hangup {
                self.write_ready(id, out);
            }
        }

        out.len() - start
    }
}

impl Drop for PollReactor {
    fn drop(&mut self) {
        for (_, mut slot) in std::mem::take(&mut self.slots) {
            for mut w in slot.writes.drain(..) {
                w.release_send_fd();
            }
            if let Some(fd) = slot.accepted.take() {
                close_fd(fd);
            }
            if slot.fd >= 0 {
                close_fd(slot.fd);
            }
        }
    }
}

// ── Descriptor helpers ──

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> std::result::Result<(), i64> {
    let bits = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| -(e as i64))?;
    let mut flags = OFlag::from_bits_truncate(bits);
    flags.set(OFlag::O_NONBLOCK, nonblocking);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| -(e as i64))?;
    Ok(())
}

fn set_cloexec(fd: RawFd) -> std::result::Result<(), i64> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|e| -(e as i64))?;
    Ok(())
}

/// Write without raising SIGPIPE. Falls back to write(2) for non-sockets.
fn send_bytes(fd: RawFd, data: &[u8]) -> i64 {
    let n = unsafe {
        libc::send(fd, data.as_ptr() as *const libc::c_void, data.len(), SEND_FLAGS)
    };
    if n >= 0 {
        return n as i64;
    }
    let code = last_os_code();
    if code != ENOTSOCK {
        return code;
    }
    let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    if n >= 0 {
        n as i64
    } else {
        last_os_code()
    }
}

/// sendmsg(2) carrying `send_fd` as SCM_RIGHTS ancillary data.
fn send_with_fd(fd: RawFd, data: &[u8], send_fd: RawFd) -> i64 {
    let iov = [IoSlice::new(data)];
    let fds = [send_fd];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    match sendmsg::<()>(fd, &iov, &cmsg, MsgFlags::from_bits_truncate(SEND_FLAGS), None) {
        Ok(n) => n as i64,
        Err(e) => -(e as i64),
    }
}
