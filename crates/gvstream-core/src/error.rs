//! Error types for stream operations

use std::borrow::Cow;
use std::fmt;

use crate::errno::{err_message, err_name, EINVAL};

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced by the stream bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Native negative result code, synchronous or from a completion.
    Os { code: i64 },

    /// Argument rejected before any native call was attempted.
    InvalidArgument(&'static str),

    /// A suspending operation was called outside an execution context.
    NoContext,

    /// The scheduler could not start a new execution context.
    Scheduler(String),
}

impl StreamError {
    #[inline]
    pub fn os(code: i64) -> Self {
        StreamError::Os { code }
    }

    /// Stable symbolic name (`"ECONNRESET"`, `"EOF"`, ...).
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            StreamError::Os { code } => err_name(*code),
            StreamError::InvalidArgument(_) => Cow::Borrowed("EINVAL"),
            StreamError::NoContext => Cow::Borrowed("ENOCTX"),
            StreamError::Scheduler(_) => Cow::Borrowed("ESCHED"),
        }
    }

    /// Descriptive message.
    pub fn message(&self) -> Cow<'static, str> {
        match self {
            StreamError::Os { code } => Cow::Borrowed(err_message(*code)),
            StreamError::InvalidArgument(what) => Cow::Borrowed(*what),
            StreamError::NoContext => Cow::Borrowed("operation must run inside an execution context"),
            StreamError::Scheduler(msg) => Cow::Owned(msg.clone()),
        }
    }

    /// Native result code, where one exists.
    pub fn code(&self) -> Option<i64> {
        match self {
            StreamError::Os { code } => Some(*code),
            StreamError::InvalidArgument(_) => Some(EINVAL),
            StreamError::NoContext | StreamError::Scheduler(_) => None,
        }
    }

    /// True if this is the given native code.
    #[inline]
    pub fn is(&self, code: i64) -> bool {
        self.code() == Some(code)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

impl std::error::Error for StreamError {}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Os { code } if code < 0 && code > i32::MIN as i64 && code != crate::errno::EOF => {
                std::io::Error::from_raw_os_error((-code) as i32)
            }
            StreamError::Os { .. } => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err),
            StreamError::InvalidArgument(_) => std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno::{ECONNRESET, EOF};

    #[test]
    fn test_error_display() {
        let e = StreamError::os(EOF);
        assert_eq!(format!("{}", e), "EOF: end of file");

        let e = StreamError::InvalidArgument("backlog must be non-negative");
        assert_eq!(format!("{}", e), "EINVAL: backlog must be non-negative");
    }

    #[test]
    fn test_error_code() {
        assert!(StreamError::os(ECONNRESET).is(ECONNRESET));
        assert_eq!(StreamError::NoContext.code(), None);
        assert_eq!(StreamError::NoContext.name(), "ENOCTX");
    }

    #[test]
    fn test_into_io_error() {
        let io: std::io::Error = StreamError::os(ECONNRESET).into();
        assert_eq!(io.kind(), std::io::ErrorKind::ConnectionReset);
    }
}
