//! Error taxonomy shared by the object table and the wait machinery.

use thiserror::Error;

/// Win32-compatible error codes reported through the last-error slot.
#[allow(missing_docs)]
pub mod code {
    pub const NO_ERROR: u32 = 0;
    pub const ERROR_INVALID_HANDLE: u32 = 6;
    pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
    pub const ERROR_NOT_SUPPORTED: u32 = 50;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_NOT_OWNER: u32 = 288;
    pub const ERROR_TOO_MANY_POSTS: u32 = 298;
    pub const ERROR_INTERNAL_ERROR: u32 = 1359;
}

/// Errors surfaced by synchronization operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum WaitError {
    /// Bad argument: empty or oversized wait set, duplicate handles in a
    /// wait-all, or an out-of-range count.
    #[error("invalid parameter")]
    InvalidParameter,

    /// A handle does not name a live object.
    #[error("invalid handle")]
    InvalidHandle,

    /// A handle names a live object whose type is not accepted here.
    #[error("handle refers to an object of the wrong type")]
    WrongType,

    /// Multi-object wait over a type limited to single-object waits.
    #[error("operation not supported for this object type")]
    NotSupported,

    /// Allocation failed or a fixed capacity was exhausted.
    #[error("out of memory")]
    OutOfMemory,

    /// Invariant violation, including any alertable wait request.
    #[error("internal error")]
    InternalError,

    /// Mutex released by a thread that does not own it.
    #[error("calling thread does not own the mutex")]
    NotOwner,

    /// Semaphore released past its maximum count.
    #[error("too many posts to semaphore")]
    TooManyPosts,
}

impl WaitError {
    /// Win32 error code stored as the calling thread's last error.
    pub const fn code(&self) -> u32 {
        match self {
            WaitError::InvalidParameter => code::ERROR_INVALID_PARAMETER,
            WaitError::InvalidHandle | WaitError::WrongType => code::ERROR_INVALID_HANDLE,
            WaitError::NotSupported => code::ERROR_NOT_SUPPORTED,
            WaitError::OutOfMemory => code::ERROR_NOT_ENOUGH_MEMORY,
            WaitError::InternalError => code::ERROR_INTERNAL_ERROR,
            WaitError::NotOwner => code::ERROR_NOT_OWNER,
            WaitError::TooManyPosts => code::ERROR_TOO_MANY_POSTS,
        }
    }
}

/// Result alias used throughout the synchronization core.
pub type Result<T> = core::result::Result<T, WaitError>;
