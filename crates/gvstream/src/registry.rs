//! Handle Registry
//!
//! Maps a `HandleId` to the listener that owns its continuous events and
//! to the continuous modes currently armed on it. The Completion
//! Dispatcher uses it to find who a raw completion belongs to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use gvstream_core::id::HandleId;

use crate::event::Listener;

/// Per-handle registry entry.
#[derive(Clone, Default)]
pub struct HandleEntry {
    pub listener: Option<Arc<dyn Listener>>,
    pub reading: bool,
    pub listening: bool,
}

/// Identity-keyed handle to owner mapping.
pub trait HandleRegistry: Send + Sync {
    /// Bind `listener` to `handle`, replacing any previous one.
    fn setup(&self, handle: HandleId, listener: Arc<dyn Listener>);

    /// Listener bound to `handle`.
    fn find_owner(&self, handle: HandleId) -> Option<Arc<dyn Listener>>;

    /// Forget `handle` entirely. Returns whether it was known.
    fn cleanup(&self, handle: HandleId) -> bool;

    fn set_reading(&self, handle: HandleId, reading: bool);
    fn is_reading(&self, handle: HandleId) -> bool;
    fn set_listening(&self, handle: HandleId, listening: bool);
    fn is_listening(&self, handle: HandleId) -> bool;
}

/// Default registry: a mutex-protected `HashMap`.
#[derive(Default)]
pub struct MapRegistry {
    entries: Mutex<HashMap<HandleId, HandleEntry>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HandleId, HandleEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HandleRegistry for MapRegistry {
    fn setup(&self, handle: HandleId, listener: Arc<dyn Listener>) {
        self.lock().entry(handle).or_default().listener = Some(listener);
    }

    fn find_owner(&self, handle: HandleId) -> Option<Arc<dyn Listener>> {
        self.lock().get(&handle).and_then(|e| e.listener.clone())
    }

    fn cleanup(&self, handle: HandleId) -> bool {
        self.lock().remove(&handle).is_some()
    }

    fn set_reading(&self, handle: HandleId, reading: bool) {
        let mut map = self.lock();
        if reading {
            map.entry(handle).or_default().reading = true;
        } else if let Some(e) = map.get_mut(&handle) {
            e.reading = false;
        }
    }

    fn is_reading(&self, handle: HandleId) -> bool {
        self.lock().get(&handle).is_some_and(|e| e.reading)
    }

    fn set_listening(&self, handle: HandleId, listening: bool) {
        let mut map = self.lock();
        if listening {
            map.entry(handle).or_default().listening = true;
        } else if let Some(e) = map.get_mut(&handle) {
            e.listening = false;
        }
    }

    fn is_listening(&self, handle: HandleId) -> bool {
        self.lock().get(&handle).is_some_and(|e| e.listening)
    }
}
