//! # gvstream-core
//!
//! Types and collaborator traits for the gvstream asynchronous stream
//! I/O bridge. Nothing in this crate performs I/O; the default
//! implementations live in `gvstream-module` and the bridge itself in
//! `gvstream`.
//!
//! ## Modules
//!
//! - `id` - handle, request and context identifiers
//! - `errno` - native result codes and their translation
//! - `error` - `StreamError` and the crate `Result`
//! - `reactor` - the reactor contract and completion variants
//! - `scheduler` - suspend/resume contract for execution contexts
//! - `buffer` - read buffer allocation policy
//! - `diag` - leveled diagnostics with an injectable sink
//! - `env` - environment variable helpers

pub mod id;
pub mod errno;
pub mod error;
pub mod reactor;
pub mod scheduler;
pub mod buffer;
pub mod diag;
pub mod env;

// Re-exports for convenience
pub use id::{ContextId, HandleId, ReqId};
pub use error::{Result, StreamError};
pub use errno::{translate, translate_status, translate_unit, EOF};
pub use reactor::{Completion, StreamReactor};
pub use scheduler::{ContextFn, ParkToken, Scheduler};
pub use buffer::{AllocPolicy, ReadBuf};
pub use diag::{DiagSink, LogLevel, MemorySink, StderrSink};
pub use env::{env_get, env_get_bool, env_get_opt};
