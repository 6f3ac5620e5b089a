//! Tunables for a synchronization context.

use kwait_common::MAX_WAIT_OBJECTS;
use static_assertions::const_assert;

/// Default maximum number of waiters queued on a single object.
pub const DEFAULT_MAX_WAITERS: usize = 100;

/// Default capacity of the handle table.
pub const DEFAULT_MAX_HANDLES: usize = 4096;

/// Wait sets up to this size keep their per-call arrays inline.
pub const INLINE_WAIT_OBJECTS: usize = MAX_WAIT_OBJECTS / 4;

const_assert!(INLINE_WAIT_OBJECTS > 0);
const_assert!(INLINE_WAIT_OBJECTS <= MAX_WAIT_OBJECTS);
// Handles encode `slot + 1` in 32 bits.
const_assert!(DEFAULT_MAX_HANDLES < u32::MAX as usize);

/// Configuration for a [`Pal`](crate::Pal) context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchConfig {
    /// Waiter records one object may hold before registration fails with
    /// `OutOfMemory`.
    pub max_waiters_per_object: usize,
    /// Number of simultaneously open handles.
    pub max_handles: usize,
}

impl Default for SynchConfig {
    fn default() -> Self {
        Self {
            max_waiters_per_object: DEFAULT_MAX_WAITERS,
            max_handles: DEFAULT_MAX_HANDLES,
        }
    }
}

impl SynchConfig {
    /// Set the per-object waiter limit.
    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters_per_object = max_waiters;
        self
    }

    /// Set the handle table capacity, clamped to what a handle can encode.
    pub fn with_max_handles(mut self, max_handles: usize) -> Self {
        self.max_handles = max_handles.min(u32::MAX as usize - 1);
        self
    }
}
