//! Per-thread wait state and the block/wake primitive.

use std::sync::Arc;
use std::time::Instant;

use kwait_common::ThreadId;
use parking_lot::{Condvar, Mutex};

use crate::object::KernelObject;

/// Shape of the wait a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// One object.
    Single,
    /// Several objects, released by whichever becomes available first.
    Any,
    /// Several objects, released once all are available together.
    All,
}

impl WaitKind {
    /// Classify a wait over `count` objects.
    pub fn for_wait(count: usize, wait_all: bool) -> Self {
        match (count, wait_all) {
            (1, _) => WaitKind::Single,
            (_, true) => WaitKind::All,
            (_, false) => WaitKind::Any,
        }
    }
}

/// Why a blocked thread resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WakeupReason {
    /// A registered wait was satisfied.
    Succeeded,
    /// A registered wait was satisfied by an abandoned mutex.
    Abandoned,
    /// The timeout expired.
    Timeout,
    /// The wait could not complete.
    Failed,
}

/// Delivered to a thread when it resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wakeup {
    /// Wakeup reason.
    pub reason: WakeupReason,
    /// Index of the resolving object for single and wait-any waits.
    pub index: Option<usize>,
}

impl Wakeup {
    /// Timed out.
    pub const TIMEOUT: Wakeup = Wakeup {
        reason: WakeupReason::Timeout,
        index: None,
    };
}

struct WaitSlot {
    kind: WaitKind,
    registered: Vec<Arc<KernelObject>>,
    outcome: Option<Wakeup>,
}

/// Wait state of one OS thread.
///
/// `registered` lists the objects holding a waiter record for this thread.
/// Signalers complete a wait under the synchronization manager's lock; the
/// completion empties `registered` and stores the outcome in one step, so a
/// wait is resolved at most once.
pub struct ThreadBlocker {
    thread: ThreadId,
    slot: Mutex<WaitSlot>,
    wake: Condvar,
}

impl ThreadBlocker {
    pub(crate) fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            slot: Mutex::new(WaitSlot {
                kind: WaitKind::Single,
                registered: Vec::new(),
                outcome: None,
            }),
            wake: Condvar::new(),
        }
    }

    /// Identity of the owning thread.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Start a new wait of the given kind.
    pub(crate) fn begin_wait(&self, kind: WaitKind) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.registered.is_empty(), "previous wait left registrations");
        slot.kind = kind;
        slot.registered.clear();
        slot.outcome = None;
    }

    pub(crate) fn add_registration(&self, object: Arc<KernelObject>) {
        self.slot.lock().registered.push(object);
    }

    /// Objects currently holding a record for this thread.
    pub(crate) fn registrations(&self) -> Vec<Arc<KernelObject>> {
        self.slot.lock().registered.clone()
    }

    /// Kind of the wait in progress.
    pub fn wait_kind(&self) -> WaitKind {
        self.slot.lock().kind
    }

    /// Take back the registration list without resolving the wait.
    pub(crate) fn take_registrations(&self) -> Vec<Arc<KernelObject>> {
        core::mem::take(&mut self.slot.lock().registered)
    }

    /// Resolve the wait and wake the thread.
    ///
    /// Returns the objects the thread was registered on; the caller removes
    /// the remaining records from them.
    pub(crate) fn complete(&self, wakeup: Wakeup) -> Vec<Arc<KernelObject>> {
        let mut slot = self.slot.lock();
        debug_assert!(slot.outcome.is_none(), "wait resolved twice");
        slot.outcome = Some(wakeup);
        let registered = core::mem::take(&mut slot.registered);
        self.wake.notify_one();
        registered
    }

    /// Sleep until the wait is resolved or `deadline` passes.
    ///
    /// Returns `None` on timeout; the caller must then withdraw under the
    /// synchronization lock, since a signaler may still resolve the wait.
    pub(crate) fn sleep_until(&self, deadline: Option<Instant>) -> Option<Wakeup> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(wakeup) = slot.outcome.take() {
                return Some(wakeup);
            }
            match deadline {
                None => self.wake.wait(&mut slot),
                Some(deadline) => {
                    if self.wake.wait_until(&mut slot, deadline).timed_out() {
                        return slot.outcome.take();
                    }
                }
            }
        }
    }

    /// Called with the synchronization lock held after a timeout.
    ///
    /// Either returns the outcome a signaler delivered in the meantime, or
    /// the objects to withdraw from.
    pub(crate) fn withdraw(&self) -> Result<Wakeup, Vec<Arc<KernelObject>>> {
        let mut slot = self.slot.lock();
        match slot.outcome.take() {
            Some(wakeup) => Ok(wakeup),
            None => Err(core::mem::take(&mut slot.registered)),
        }
    }
}

impl core::fmt::Debug for ThreadBlocker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadBlocker")
            .field("thread", &self.thread)
            .finish()
    }
}
