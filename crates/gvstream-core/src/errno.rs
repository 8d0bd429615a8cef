//! Native result codes and their translation.
//!
//! Every reactor primitive reports its outcome as an `i64`: `>= 0` is
//! success (sometimes carrying a count), `< 0` is a negated errno. The
//! one exception is [`EOF`], a sentinel outside the errno range that
//! marks the end of an inbound stream.
//!
//! Symbolic names are a stable table: a code always maps to the same
//! name, and unknown codes map to `"errno_<N>"` so they stay debuggable.

use std::borrow::Cow;

use crate::error::{Result, StreamError};

/// End-of-stream sentinel. Not an errno.
pub const EOF: i64 = -4095;

// ── Process / permission ──────────────────────────────────────────

pub const EPERM: i64 = -(libc::EPERM as i64);
pub const ENOENT: i64 = -(libc::ENOENT as i64);
pub const EINTR: i64 = -(libc::EINTR as i64);
pub const EIO: i64 = -(libc::EIO as i64);
pub const EACCES: i64 = -(libc::EACCES as i64);

// ── Memory / resources ────────────────────────────────────────────

pub const EAGAIN: i64 = -(libc::EAGAIN as i64);
pub const ENOMEM: i64 = -(libc::ENOMEM as i64);
pub const EMFILE: i64 = -(libc::EMFILE as i64);
pub const ENFILE: i64 = -(libc::ENFILE as i64);
pub const EBUSY: i64 = -(libc::EBUSY as i64);

// ── I/O ───────────────────────────────────────────────────────────

pub const EBADF: i64 = -(libc::EBADF as i64);
pub const EINVAL: i64 = -(libc::EINVAL as i64);
pub const EPIPE: i64 = -(libc::EPIPE as i64);
pub const ENOTSOCK: i64 = -(libc::ENOTSOCK as i64);
pub const ENOTSUP: i64 = -(libc::ENOTSUP as i64);
pub const ECANCELED: i64 = -(libc::ECANCELED as i64);

// ── Networking ────────────────────────────────────────────────────

pub const EADDRINUSE: i64 = -(libc::EADDRINUSE as i64);
pub const EADDRNOTAVAIL: i64 = -(libc::EADDRNOTAVAIL as i64);
pub const ECONNABORTED: i64 = -(libc::ECONNABORTED as i64);
pub const ECONNRESET: i64 = -(libc::ECONNRESET as i64);
pub const ECONNREFUSED: i64 = -(libc::ECONNREFUSED as i64);
pub const ENOBUFS: i64 = -(libc::ENOBUFS as i64);
pub const EISCONN: i64 = -(libc::EISCONN as i64);
pub const ENOTCONN: i64 = -(libc::ENOTCONN as i64);
pub const ETIMEDOUT: i64 = -(libc::ETIMEDOUT as i64);
pub const EALREADY: i64 = -(libc::EALREADY as i64);

/// Symbolic name of a negative result code.
///
/// ```
/// use gvstream_core::errno::{err_name, ECONNRESET, EOF};
///
/// assert_eq!(err_name(ECONNRESET), "ECONNRESET");
/// assert_eq!(err_name(EOF), "EOF");
/// ```
pub fn err_name(code: i64) -> Cow<'static, str> {
    let name = match code {
        EOF => "EOF",
        EPERM => "EPERM",
        ENOENT => "ENOENT",
        EINTR => "EINTR",
        EIO => "EIO",
        EACCES => "EACCES",
        EAGAIN => "EAGAIN",
        ENOMEM => "ENOMEM",
        EMFILE => "EMFILE",
        ENFILE => "ENFILE",
        EBUSY => "EBUSY",
        EBADF => "EBADF",
        EINVAL => "EINVAL",
        EPIPE => "EPIPE",
        ENOTSOCK => "ENOTSOCK",
        ENOTSUP => "ENOTSUP",
        ECANCELED => "ECANCELED",
        EADDRINUSE => "EADDRINUSE",
        EADDRNOTAVAIL => "EADDRNOTAVAIL",
        ECONNABORTED => "ECONNABORTED",
        ECONNRESET => "ECONNRESET",
        ECONNREFUSED => "ECONNREFUSED",
        ENOBUFS => "ENOBUFS",
        EISCONN => "EISCONN",
        ENOTCONN => "ENOTCONN",
        ETIMEDOUT => "ETIMEDOUT",
        EALREADY => "EALREADY",
        _ => return Cow::Owned(format!("errno_{}", code.unsigned_abs())),
    };
    Cow::Borrowed(name)
}

/// Human-readable description of a negative result code.
pub fn err_message(code: i64) -> &'static str {
    if code == EOF {
        return "end of file";
    }
    if code >= 0 || code < i32::MIN as i64 {
        return "unknown error";
    }
    nix::errno::Errno::from_raw((-code) as i32).desc()
}

/// Translate a native result code.
///
/// Non-negative codes are success and carry the code as a count
/// (bytes accepted by `try_write`, for instance). Negative codes become
/// a [`StreamError::Os`].
#[inline]
pub fn translate(code: i64) -> Result<usize> {
    if code >= 0 {
        Ok(code as usize)
    } else {
        Err(StreamError::Os { code })
    }
}

/// Translate a status code where the success value carries nothing.
#[inline]
pub fn translate_unit(code: i64) -> Result<()> {
    translate(code).map(drop)
}

/// Translate to an optional error: the payload shape used by events.
#[inline]
pub fn translate_status(code: i64) -> Option<StreamError> {
    translate(code).err()
}

/// The current thread's errno as a negative result code.
#[inline]
pub fn last_os_code() -> i64 {
    -(nix::errno::Errno::last_raw() as i64)
}
