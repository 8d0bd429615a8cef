//! Completion Dispatcher
//!
//! Runs on the loop thread for every completion the reactor reports.
//! One-shot completions go to the Request Lifecycle Manager; connection and
//! read completions become events for the handle's listener.
//!
//! Read path outcomes:
//!
//! | `nread`        | event                        |
//! |----------------|------------------------------|
//! | `> 0`          | `onread(nil, data[..nread])` |
//! | `0`            | none                         |
//! | `EOF`          | `onread(nil, nil)`           |
//! | other `< 0`    | `onread(error, nil)`, logged |
//!
//! The buffer always goes back to the allocation policy before the
//! listener runs.

use std::sync::Arc;

use gvstream_core::buffer::ReadBuf;
use gvstream_core::diag::LogLevel;
use gvstream_core::errno::{translate_status, EOF};
use gvstream_core::error::StreamError;
use gvstream_core::id::HandleId;
use gvstream_core::kdebug;
use gvstream_core::reactor::Completion;

use crate::event::Event;
use crate::stream::StreamBridge;

/// Route one completion.
pub fn dispatch(bridge: &Arc<StreamBridge>, completion: Completion) {
    match completion {
        Completion::Shutdown { req, status } | Completion::Write { req, status } => {
            bridge.requests().complete(req, status);
        }
        Completion::Connection { server, status } => on_connection(bridge, server, status),
        Completion::Read { handle, nread, buf } => on_read(bridge, handle, nread, buf),
    }
}

/// Route every completion in `batch`, in order.
pub fn dispatch_all(bridge: &Arc<StreamBridge>, batch: &mut Vec<Completion>) -> usize {
    let n = batch.len();
    for completion in batch.drain(..) {
        dispatch(bridge, completion);
    }
    n
}

fn on_connection(bridge: &Arc<StreamBridge>, server: HandleId, status: i64) {
    let error = translate_status(status);
    if let Some(err) = &error {
        report(bridge, err);
    }
    emit(bridge, server, Event::Connection { error });
}

fn on_read(bridge: &Arc<StreamBridge>, handle: HandleId, nread: i64, buf: ReadBuf) {
    let data = (nread > 0).then(|| buf.copy_prefix(nread as usize));
    bridge.alloc().release(buf);

    // Completions already batched when read_stop ran are dropped.
    if !bridge.registry().is_reading(handle) {
        kdebug!("{}: read completion ({}) after read_stop dropped", handle, nread);
        return;
    }

    let event = match nread {
        0 => return,
        n if n > 0 => Event::Read { error: None, data },
        EOF => {
            bridge.registry().set_reading(handle, false);
            Event::Read { error: None, data: None }
        }
        code => {
            bridge.registry().set_reading(handle, false);
            let err = StreamError::os(code);
            report(bridge, &err);
            Event::Read { error: Some(err), data: None }
        }
    };
    emit(bridge, handle, event);
}

/// Stream errors always reach the bridge sink, whatever the log level.
fn report(bridge: &Arc<StreamBridge>, err: &StreamError) {
    bridge.diag().write_line(LogLevel::Error, &err.to_string());
}

fn emit(bridge: &Arc<StreamBridge>, handle: HandleId, event: Event) {
    match bridge.registry().find_owner(handle) {
        Some(listener) => listener.on_event(bridge, handle, event),
        None => kdebug!("{}: {} with no listener dropped", handle, event.name()),
    }
}
