//! Identifier types
//!
//! Handles, requests and execution contexts are all referred to by small
//! copyable ids. Collaborators key their tables by these ids instead of
//! holding pointers into each other's memory.

use core::fmt;

/// Identifier of one duplex stream handle owned by the reactor.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HandleId(u32);

impl HandleId {
    /// Sentinel value indicating no handle
    pub const NONE: HandleId = HandleId(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        HandleId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "HandleId(NONE)")
        } else {
            write!(f, "HandleId({})", self.0)
        }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "h{}", self.0)
        }
    }
}

/// Identifier of one in-flight one-shot request.
///
/// Allocated from a monotonic counter; an id is never handed out twice
/// within one request table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ReqId(pub u64);

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Identifier of one cooperatively scheduled execution context.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ContextId(u32);

impl ContextId {
    pub const NONE: ContextId = ContextId(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        ContextId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn to_option(self) -> Option<ContextId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "ContextId(NONE)")
        } else {
            write!(f, "ContextId({})", self.0)
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "ctx{}", self.0)
        }
    }
}

impl Default for ContextId {
    fn default() -> Self {
        ContextId::NONE
    }
}
