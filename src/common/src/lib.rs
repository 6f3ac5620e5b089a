//! Shared vocabulary for the kwait synchronization core.
//!
//! Handles, thread identities, the object type taxonomy, wait results and
//! the error taxonomy live here so that callers can name them without
//! depending on the synchronization machinery itself.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod error;
pub mod handle;
pub mod wait;

pub use error::{Result, WaitError};
pub use handle::{Handle, ObjectType, ObjectTypeSet, ThreadId};
pub use wait::{WaitResult, INFINITE, MAX_WAIT_OBJECTS};
