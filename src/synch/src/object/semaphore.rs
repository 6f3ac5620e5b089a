//! Counting semaphore state.

use kwait_common::{Result, WaitError};

/// A counting semaphore.
///
/// The semaphore maintains a count between zero and `max_count`. Each
/// satisfied wait takes one unit; `release` returns units and fails rather
/// than exceed the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreState {
    /// Current number of available units.
    count: u32,
    /// Upper bound for `count`.
    max_count: u32,
}

impl SemaphoreState {
    /// Create a semaphore with separate initial and maximum counts.
    pub fn new(initial: u32, max_count: u32) -> Result<Self> {
        if max_count == 0 || initial > max_count {
            return Err(WaitError::InvalidParameter);
        }
        Ok(Self {
            count: initial,
            max_count,
        })
    }

    /// Get the current number of available units.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Whether a waiter could take a unit now.
    pub fn is_signaled(&self) -> bool {
        self.count > 0
    }

    /// Take one unit. Returns `false` if none is available.
    pub fn try_acquire(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }

    /// Return `units` to the semaphore, yielding the previous count.
    pub fn release(&mut self, units: u32) -> Result<u32> {
        if units == 0 {
            return Err(WaitError::InvalidParameter);
        }
        let previous = self.count;
        match previous.checked_add(units) {
            Some(count) if count <= self.max_count => {
                self.count = count;
                Ok(previous)
            }
            _ => Err(WaitError::TooManyPosts),
        }
    }
}
