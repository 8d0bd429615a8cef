//! # gvstream — stream I/O for cooperatively scheduled contexts
//!
//! Execution contexts issue stream operations against duplex byte-stream
//! handles driven by a single-threaded reactor. One-shot operations
//! (shutdown, write, write2) park the calling context until the reactor
//! reports completion; continuous operations (listen, read_start) emit
//! `onconnection` / `onread` events to the handle's listener for as long
//! as they stay armed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Execution contexts            Listeners              │
//! │  bridge.write(req, h, b"..")   on_event(h, Event)     │
//! └───────────┬───────────────────────────▲──────────────┘
//!             │ arm + suspend             │ onconnection / onread
//! ┌───────────▼───────────────────────────┴──────────────┐
//! │  StreamBridge (facade)   RequestTable   HandleRegistry│
//! │                  dispatch(Completion)                 │
//! └───────────┬───────────────────────────▲──────────────┘
//!             │ arm_*                     │ run_once
//! ┌───────────▼───────────────────────────┴──────────────┐
//! │  StreamReactor (PollReactor)                          │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use gvstream::{Event, Runtime, StreamConfig, DEFAULT_BACKLOG};
//!
//! let mut rt = Runtime::new(StreamConfig::from_env())?;
//! let bridge = rt.bridge();
//! let server = bridge.open(std::net::TcpListener::bind("127.0.0.1:7000")?)?;
//! bridge.set_listener(server, Arc::new(|b: &Arc<StreamBridge>, h, ev: Event| {
//!     let client = b.open_empty();
//!     if b.accept(h, client).is_ok() { /* read_start, spawn writer ... */ }
//! }));
//! bridge.listen(server, DEFAULT_BACKLOG)?;
//! rt.run()?;
//! ```

pub mod config;
pub mod dispatch;
pub mod event;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod stream;

#[cfg(test)]
mod testing;

pub use config::StreamConfig;
pub use dispatch::{dispatch, dispatch_all};
pub use event::{Event, Listener};
pub use registry::{HandleEntry, HandleRegistry, MapRegistry};
pub use request::{Request, RequestKind, RequestTable, ShutdownReq, WriteReq};
pub use runtime::Runtime;
pub use stream::{StreamBridge, DEFAULT_BACKLOG};

pub use gvstream_core::{
    translate, translate_unit, HandleId, ReqId, Result, StreamError, EOF,
};
