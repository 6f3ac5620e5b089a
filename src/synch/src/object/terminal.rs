//! Process and thread objects: signaled once, when they finish.

/// Lifetime state of a process or thread object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalState {
    exit_code: Option<u32>,
}

impl TerminalState {
    /// A running process or thread.
    pub fn running() -> Self {
        Self::default()
    }

    /// Record termination. The first exit code wins.
    pub fn exit(&mut self, exit_code: u32) {
        self.exit_code.get_or_insert(exit_code);
    }

    /// Exit code, `None` while still running.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Signaled once terminated.
    pub fn is_signaled(&self) -> bool {
        self.exit_code.is_some()
    }
}
