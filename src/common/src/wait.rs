//! Outcome of a wait and its numeric encoding.

/// Maximum number of handles in one wait set.
pub const MAX_WAIT_OBJECTS: usize = 64;

/// Timeout value that never expires.
pub const INFINITE: u32 = 0xFFFF_FFFF;

/// Base value of a satisfied wait.
pub const WAIT_OBJECT_0: u32 = 0;
/// Base value of a wait satisfied by an abandoned mutex.
pub const WAIT_ABANDONED_0: u32 = 0x80;
/// The timeout expired.
pub const WAIT_TIMEOUT: u32 = 258;
/// The wait failed.
pub const WAIT_FAILED: u32 = 0xFFFF_FFFF;

/// Terminal outcome of a wait.
///
/// The index is present for single-object and wait-any requests and
/// absent for wait-all requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaitResult {
    /// The wait was satisfied.
    ObjectSignaled(Option<usize>),
    /// The wait was satisfied by a mutex whose owner terminated.
    Abandoned(Option<usize>),
    /// The timeout expired first.
    Timeout,
    /// The wait failed; the reason is in the caller's last error.
    Failed,
}

impl WaitResult {
    /// Encodes the result as `WAIT_OBJECT_0 + i`, `WAIT_ABANDONED_0 + i`,
    /// `WAIT_TIMEOUT` or `WAIT_FAILED`.
    pub const fn to_raw(&self) -> u32 {
        match *self {
            WaitResult::ObjectSignaled(index) => WAIT_OBJECT_0 + offset(index),
            WaitResult::Abandoned(index) => WAIT_ABANDONED_0 + offset(index),
            WaitResult::Timeout => WAIT_TIMEOUT,
            WaitResult::Failed => WAIT_FAILED,
        }
    }

    /// Decodes a raw value. `wait_all` selects whether offsets are expected.
    pub const fn from_raw(raw: u32, wait_all: bool) -> Option<Self> {
        let max = MAX_WAIT_OBJECTS as u32;
        if raw == WAIT_TIMEOUT {
            Some(WaitResult::Timeout)
        } else if raw == WAIT_FAILED {
            Some(WaitResult::Failed)
        } else if wait_all {
            match raw {
                WAIT_OBJECT_0 => Some(WaitResult::ObjectSignaled(None)),
                WAIT_ABANDONED_0 => Some(WaitResult::Abandoned(None)),
                _ => None,
            }
        } else if raw < WAIT_OBJECT_0 + max {
            Some(WaitResult::ObjectSignaled(Some((raw - WAIT_OBJECT_0) as usize)))
        } else if raw >= WAIT_ABANDONED_0 && raw < WAIT_ABANDONED_0 + max {
            Some(WaitResult::Abandoned(Some((raw - WAIT_ABANDONED_0) as usize)))
        } else {
            None
        }
    }

    /// True for `ObjectSignaled` and `Abandoned`.
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, WaitResult::ObjectSignaled(_) | WaitResult::Abandoned(_))
    }
}

const fn offset(index: Option<usize>) -> u32 {
    match index {
        Some(i) => i as u32,
        None => 0,
    }
}
