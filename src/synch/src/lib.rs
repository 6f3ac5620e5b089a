//! kwait synchronization core
//!
//! Kernel-style waitable objects (mutexes, events, semaphores, process and
//! thread objects) behind opaque handles, with wait-one, wait-any and
//! wait-all semantics, timeouts and abandoned-mutex detection.
//!
//! # Architecture
//!
//! - `table`: generation-checked handles mapping to reference-counted objects
//! - `object`: per-type signal state and pending waiter lists
//! - `controller`: the per-object check / claim / register capability
//! - `manager`: the synchronization lock and the block/wake machinery
//! - `wait`: the multi-object wait entry points on [`Pal`]
//!
//! # Example
//!
//! ```
//! use kwait_synch::{Pal, WaitResult};
//!
//! let pal = Pal::default();
//! let event = pal.create_event(false, true).unwrap();
//! assert_eq!(pal.wait_for_single_object(event, 0), WaitResult::ObjectSignaled(Some(0)));
//! assert_eq!(pal.wait_for_single_object(event, 0), WaitResult::Timeout);
//! pal.close_handle(event).unwrap();
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod controller;
pub mod last_error;
pub mod manager;
pub mod object;
pub mod table;
pub mod thread;
pub mod wait;

pub use config::SynchConfig;
pub use context::Pal;
pub use last_error::{get_last_error, set_last_error};
pub use thread::ThreadGuard;

pub use kwait_common::{
    Handle, ObjectType, ObjectTypeSet, Result, ThreadId, WaitError, WaitResult, INFINITE,
    MAX_WAIT_OBJECTS,
};
