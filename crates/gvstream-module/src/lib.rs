//! # gvstream-module — default collaborators
//!
//! - [`PollReactor`]: single-threaded poll(2) reactor over non-blocking descriptors
//! - [`FiberScheduler`]: cooperative execution contexts with baton handoff
//! - [`HeapAlloc`] / [`PooledAlloc`]: read buffer allocation policies

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod poll_reactor;
    } else {
        compile_error!("gvstream-module: unsupported platform (poll(2) reactor needs unix)");
    }
}

pub mod fiber;
pub mod heap_alloc;

pub use fiber::FiberScheduler;
pub use heap_alloc::{HeapAlloc, PooledAlloc};
pub use poll_reactor::{PollReactor, PollReactorConfig};
