//! Manual- and auto-reset event state.

/// Event state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventState {
    /// Stays signaled after releasing waiters until explicitly reset.
    pub manual_reset: bool,
    /// Whether the event is set.
    pub signaled: bool,
}

impl EventState {
    /// Create an event with the given reset mode and initial state.
    pub fn new(manual_reset: bool, signaled: bool) -> Self {
        Self {
            manual_reset,
            signaled,
        }
    }

    /// Set the event.
    pub fn set(&mut self) {
        self.signaled = true;
    }

    /// Clear the event.
    pub fn reset(&mut self) {
        self.signaled = false;
    }

    /// Account for one released waiter. Auto-reset events clear themselves.
    pub fn consume(&mut self) {
        if !self.manual_reset {
            self.signaled = false;
        }
    }
}
