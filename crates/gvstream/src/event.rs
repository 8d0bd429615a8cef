//! Continuous events and the listener surface.

use std::sync::Arc;

use gvstream_core::error::StreamError;
use gvstream_core::id::HandleId;

use crate::stream::StreamBridge;

/// A continuous-mode event delivered to the listener bound to a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `onconnection(error|nil)`: a connection is pending on a listener.
    Connection { error: Option<StreamError> },
    /// `onread(error|nil, data|nil)`.
    ///
    /// Exactly one of: data (`error: None, data: Some`), EOF (both `None`),
    /// error (`error: Some, data: None`).
    Read {
        error: Option<StreamError>,
        data: Option<Vec<u8>>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connection { .. } => "onconnection",
            Event::Read { .. } => "onread",
        }
    }

    /// `true` for the terminal `onread(nil, nil)`.
    pub fn is_eof(&self) -> bool {
        matches!(self, Event::Read { error: None, data: None })
    }
}

/// Receiver of continuous events for one or more handles.
///
/// Called on the loop thread, outside any execution context. A listener
/// may call non-suspending bridge operations (`accept`, `read_stop`,
/// `try_write`, ...) directly; suspending ones must run in a context
/// started with [`StreamBridge::spawn`]; clone the bridge `Arc` into it.
pub trait Listener: Send + Sync {
    fn on_event(&self, bridge: &Arc<StreamBridge>, handle: HandleId, event: Event);
}

impl<F> Listener for F
where
    F: Fn(&Arc<StreamBridge>, HandleId, Event) + Send + Sync,
{
    fn on_event(&self, bridge: &Arc<StreamBridge>, handle: HandleId, event: Event) {
        self(bridge, handle, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gvstream_core::errno::ECONNRESET;

    #[test]
    fn test_event_names() {
        assert_eq!(Event::Connection { error: None }.name(), "onconnection");
        let eof = Event::Read { error: None, data: None };
        assert_eq!(eof.name(), "onread");
        assert!(eof.is_eof());

        let err = Event::Read {
            error: Some(StreamError::os(ECONNRESET)),
            data: None,
        };
        assert!(!err.is_eof());
        assert!(!Event::Read { error: None, data: Some(vec![1]) }.is_eof());
    }
}
