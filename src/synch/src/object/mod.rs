//! Kernel objects: the waitable entities behind handles.
//!
//! Every object carries a type tag, a type-specific signal state, a
//! logical reference count and an ordered list of pending waiter records.
//! The type-specific behaviour is one flat enumeration, [`SignalState`],
//! dispatched by tag so that the fast path and the wake path of the
//! synchronization manager go through the same three questions: can this
//! thread proceed, was the object abandoned, and what does claiming it
//! consume.
//!
//! Object state is guarded by a spin lock that is only ever held briefly.
//! Locks of two different objects are only nested while the caller holds
//! the synchronization manager's lock.

mod event;
mod mutex;
mod semaphore;
mod terminal;

pub use event::EventState;
pub use mutex::{MutexAcquire, MutexState};
pub use semaphore::SemaphoreState;
pub use terminal::TerminalState;

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;

use kwait_common::{ObjectType, ThreadId};

use crate::manager::{ThreadBlocker, WaitKind};

/// Unique identity of a kernel object, independent of the handles naming it.
pub type ObjectId = u64;

fn next_object_id() -> ObjectId {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Type-specific signal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalState {
    /// Mutex ownership.
    Mutex(MutexState),
    /// Manual- or auto-reset event.
    Event(EventState),
    /// Counting semaphore.
    Semaphore(SemaphoreState),
    /// Process or thread lifetime; `thread` tells the two apart.
    Terminal {
        /// Exit state.
        state: TerminalState,
        /// Thread object rather than process object.
        thread: bool,
    },
}

/// What claiming an object did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Claim {
    /// The claim consumed an abandoned mutex.
    pub abandoned: bool,
    /// The claiming thread became the owner of a mutex.
    pub took_ownership: bool,
}

impl SignalState {
    /// Type tag of this state.
    pub fn object_type(&self) -> ObjectType {
        match self {
            SignalState::Mutex(_) => ObjectType::Mutex,
            SignalState::Event(e) if e.manual_reset => ObjectType::ManualResetEvent,
            SignalState::Event(_) => ObjectType::AutoResetEvent,
            SignalState::Semaphore(_) => ObjectType::Semaphore,
            SignalState::Terminal { thread: true, .. } => ObjectType::Thread,
            SignalState::Terminal { thread: false, .. } => ObjectType::Process,
        }
    }

    /// Whether `thread` could be released by this object right now.
    pub fn is_satisfiable_for(&self, thread: ThreadId) -> bool {
        match self {
            SignalState::Mutex(m) => m.is_available_to(thread),
            SignalState::Event(e) => e.signaled,
            SignalState::Semaphore(s) => s.is_signaled(),
            SignalState::Terminal { state, .. } => state.is_signaled(),
        }
    }

    /// Thread-independent signaled state.
    pub fn is_signaled(&self) -> bool {
        match self {
            SignalState::Mutex(m) => m.is_signaled(),
            SignalState::Event(e) => e.signaled,
            SignalState::Semaphore(s) => s.is_signaled(),
            SignalState::Terminal { state, .. } => state.is_signaled(),
        }
    }

    /// Mutex abandoned by a terminated owner and not yet re-acquired.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, SignalState::Mutex(m) if m.is_abandoned())
    }

    /// Consume the object on behalf of `thread`.
    ///
    /// The caller has checked [`is_satisfiable_for`](Self::is_satisfiable_for).
    /// Reading the state never consumes it; only this does.
    pub fn claim(&mut self, thread: ThreadId) -> Claim {
        match self {
            SignalState::Mutex(m) => {
                let MutexAcquire {
                    abandoned,
                    newly_owned,
                } = m.acquire(thread);
                Claim {
                    abandoned,
                    took_ownership: newly_owned,
                }
            }
            SignalState::Event(e) => {
                e.consume();
                Claim::default()
            }
            SignalState::Semaphore(s) => {
                let taken = s.try_acquire();
                debug_assert!(taken, "claimed an empty semaphore");
                Claim::default()
            }
            SignalState::Terminal { .. } => Claim::default(),
        }
    }
}

/// A thread's registration on one object of its wait set.
#[derive(Clone)]
pub struct WaiterRecord {
    /// The waiting thread.
    pub blocker: Arc<ThreadBlocker>,
    /// Position of this object in the caller's wait set.
    pub index: usize,
    /// Single, wait-any or wait-all.
    pub kind: WaitKind,
    /// Alertable wait.
    pub alertable: bool,
    /// Queued ahead of non-prioritized waiters.
    pub prioritized: bool,
}

impl WaiterRecord {
    fn belongs_to(&self, blocker: &Arc<ThreadBlocker>) -> bool {
        Arc::ptr_eq(&self.blocker, blocker)
    }
}

/// Lock-protected part of a kernel object.
pub struct ObjectCore {
    /// Type-specific state.
    pub signal: SignalState,
    /// Pending waiters in wake order.
    pub waiters: VecDeque<WaiterRecord>,
    /// Set once the last reference was dropped.
    pub destroyed: bool,
}

impl ObjectCore {
    /// Queue a waiter. Prioritized waiters go ahead of everyone else.
    pub fn push_waiter(&mut self, record: WaiterRecord) {
        if record.prioritized {
            self.waiters.push_front(record);
        } else {
            self.waiters.push_back(record);
        }
    }

    /// Remove every record of `blocker`, returning how many were removed.
    pub fn remove_waiter(&mut self, blocker: &Arc<ThreadBlocker>) -> usize {
        let before = self.waiters.len();
        self.waiters.retain(|w| !w.belongs_to(blocker));
        before - self.waiters.len()
    }
}

/// A reference-counted kernel object.
pub struct KernelObject {
    id: ObjectId,
    object_type: ObjectType,
    refs: AtomicUsize,
    core: spin::Mutex<ObjectCore>,
}

impl KernelObject {
    /// Create an unreferenced object; the handle table takes the first
    /// reference when it issues a handle.
    pub fn new(signal: SignalState) -> Self {
        Self {
            id: next_object_id(),
            object_type: signal.object_type(),
            refs: AtomicUsize::new(0),
            core: spin::Mutex::new(ObjectCore {
                signal,
                waiters: VecDeque::new(),
                destroyed: false,
            }),
        }
    }

    /// Unique object id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Type tag.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Outstanding handle and wait references.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference. Returns `true` when it was the last.
    pub(crate) fn release_ref(&self) -> bool {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "object {} over-released", self.id);
        previous == 1
    }

    /// Lock the object state.
    pub fn core(&self) -> spin::MutexGuard<'_, ObjectCore> {
        self.core.lock()
    }

    /// Withdraw `blocker` from this object's waiter list.
    pub(crate) fn remove_waiter(&self, blocker: &Arc<ThreadBlocker>) -> usize {
        self.core().remove_waiter(blocker)
    }

    /// Number of pending waiter records.
    pub fn waiter_count(&self) -> usize {
        self.core().waiters.len()
    }
}

impl core::fmt::Debug for KernelObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelObject")
            .field("id", &self.id)
            .field("type", &self.object_type)
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        let event = SignalState::Event(EventState::new(false, false));
        assert_eq!(event.object_type(), ObjectType::AutoResetEvent);
        let process = SignalState::Terminal {
            state: TerminalState::running(),
            thread: false,
        };
        assert_eq!(process.object_type(), ObjectType::Process);
    }

    #[test]
    fn test_query_does_not_consume() {
        let me = ThreadId::next();
        let state = SignalState::Event(EventState::new(false, true));
        assert!(state.is_satisfiable_for(me));
        assert!(state.is_satisfiable_for(me));
        assert!(state.is_signaled());
    }

    #[test]
    fn test_claim_consumes_by_type() {
        let me = ThreadId::next();

        let mut event = SignalState::Event(EventState::new(false, true));
        event.claim(me);
        assert!(!event.is_signaled());

        let mut sem = SignalState::Semaphore(SemaphoreState::new(1, 1).unwrap());
        sem.claim(me);
        assert!(!sem.is_signaled());

        let mut mutex = SignalState::Mutex(MutexState::new(None));
        assert!(mutex.claim(me).took_ownership);
        assert!(!mutex.is_signaled());
        assert!(mutex.is_satisfiable_for(me));
        assert!(!mutex.is_satisfiable_for(ThreadId::next()));
    }

    #[test]
    fn test_refcount() {
        let object = KernelObject::new(SignalState::Event(EventState::new(true, false)));
        object.add_ref();
        object.add_ref();
        assert_eq!(object.ref_count(), 2);
        assert!(!object.release_ref());
        assert!(object.release_ref());
    }
}
