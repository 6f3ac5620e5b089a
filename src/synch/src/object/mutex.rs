//! Owned, recursive mutex state.

use kwait_common::{Result, ThreadId, WaitError};

/// Outcome of handing a mutex to a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAcquire {
    /// The previous owner terminated while holding the mutex.
    pub abandoned: bool,
    /// Ownership moved to the thread (as opposed to a recursive re-entry).
    pub newly_owned: bool,
}

/// Mutex state.
///
/// `owner` is `Some` exactly while the mutex is held; `recursion` counts
/// nested acquisitions by the owner and is zero when unowned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexState {
    owner: Option<ThreadId>,
    recursion: u32,
    abandoned: bool,
}

impl MutexState {
    /// Create a mutex, optionally already held by `initial_owner`.
    pub fn new(initial_owner: Option<ThreadId>) -> Self {
        Self {
            owner: initial_owner,
            recursion: u32::from(initial_owner.is_some()),
            abandoned: false,
        }
    }

    /// Current owner, if held.
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Whether the mutex is free.
    pub fn is_signaled(&self) -> bool {
        self.owner.is_none()
    }

    /// Free, or already held by `thread`.
    pub fn is_available_to(&self, thread: ThreadId) -> bool {
        self.owner.map_or(true, |owner| owner == thread)
    }

    /// Set when the last owner terminated without releasing; cleared by the
    /// next acquisition.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Hand the mutex to `thread`. The caller has checked availability.
    pub fn acquire(&mut self, thread: ThreadId) -> MutexAcquire {
        debug_assert!(self.is_available_to(thread));
        let newly_owned = self.owner.is_none();
        self.owner = Some(thread);
        self.recursion = self.recursion.saturating_add(1);
        let abandoned = core::mem::take(&mut self.abandoned);
        MutexAcquire {
            abandoned,
            newly_owned,
        }
    }

    /// Undo one acquisition by `thread`.
    ///
    /// Returns `true` once the mutex became free.
    pub fn release(&mut self, thread: ThreadId) -> Result<bool> {
        if self.owner != Some(thread) {
            return Err(WaitError::NotOwner);
        }
        self.recursion -= 1;
        if self.recursion == 0 {
            self.owner = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop ownership on behalf of a terminated owner.
    pub fn abandon(&mut self) {
        self.owner = None;
        self.recursion = 0;
        self.abandoned = true;
    }
}
