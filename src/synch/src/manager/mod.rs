//! Synchronization manager: the block/wake machinery.
//!
//! One lock per manager serializes every signal, every fast-path check and
//! every waiter registration. A waiting thread holds it from the moment it
//! inspects its objects until it is either satisfied or registered on all
//! of them, so no signal can fall between the check and the registration.
//! The lock is never held while a thread sleeps.
//!
//! Lock order: manager lock, then object state, then a thread's wait slot.

mod blocker;

pub use blocker::{ThreadBlocker, WaitKind, Wakeup, WakeupReason};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kwait_common::{ObjectType, Result, ThreadId, WaitError, INFINITE};
use log::{trace, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::config::SynchConfig;
use crate::object::{Claim, KernelObject, SignalState, WaiterRecord};

/// State protected by the manager lock.
pub struct SynchState {
    /// Mutexes each thread currently owns, for abandonment on termination.
    owned_mutexes: HashMap<ThreadId, Vec<Arc<KernelObject>>>,
    /// Per-object waiter limit.
    max_waiters: usize,
}

/// Guard over the manager lock.
pub type SynchGuard<'a> = MutexGuard<'a, SynchState>;

impl SynchState {
    /// Waiter records one object may hold.
    pub fn max_waiters(&self) -> usize {
        self.max_waiters
    }

    /// Consume `object` for `thread`, tracking mutex ownership.
    pub(crate) fn claim(&mut self, object: &Arc<KernelObject>, thread: ThreadId) -> Claim {
        let claim = object.core().signal.claim(thread);
        if claim.took_ownership {
            self.owned_mutexes
                .entry(thread)
                .or_default()
                .push(object.clone());
        }
        claim
    }

    fn forget_ownership(&mut self, object: &Arc<KernelObject>, thread: ThreadId) {
        if let Some(owned) = self.owned_mutexes.get_mut(&thread) {
            owned.retain(|o| !Arc::ptr_eq(o, object));
            if owned.is_empty() {
                self.owned_mutexes.remove(&thread);
            }
        }
    }

    /// Release every waiter `object` can currently satisfy, in queue order.
    ///
    /// Returns the number of threads woken.
    pub(crate) fn signal_waiters(&mut self, object: &Arc<KernelObject>) -> usize {
        let mut woken = 0;
        'scan: loop {
            let candidates: Vec<WaiterRecord> = object.core().waiters.iter().cloned().collect();
            for record in &candidates {
                if self.try_release(object, record) {
                    woken += 1;
                    continue 'scan;
                }
            }
            return woken;
        }
    }

    fn try_release(&mut self, object: &Arc<KernelObject>, record: &WaiterRecord) -> bool {
        let thread = record.blocker.thread();
        let (claim, index) = match record.kind {
            WaitKind::Single | WaitKind::Any => {
                if !object.core().signal.is_satisfiable_for(thread) {
                    return false;
                }
                (self.claim(object, thread), Some(record.index))
            }
            WaitKind::All => {
                let wait_set = record.blocker.registrations();
                let ready = wait_set
                    .iter()
                    .all(|o| o.core().signal.is_satisfiable_for(thread));
                if !ready {
                    return false;
                }
                let mut claim = Claim::default();
                for o in &wait_set {
                    claim.abandoned |= self.claim(o, thread).abandoned;
                }
                (claim, None)
            }
        };

        let reason = if claim.abandoned {
            WakeupReason::Abandoned
        } else {
            WakeupReason::Succeeded
        };
        trace!(
            "object {} releases thread {:?} ({:?}, index {:?})",
            object.id(),
            thread,
            reason,
            index
        );
        self.complete_wait(&record.blocker, Wakeup { reason, index });
        true
    }

    /// Resolve a wait and withdraw it from every object it was registered on.
    fn complete_wait(&mut self, blocker: &Arc<ThreadBlocker>, wakeup: Wakeup) {
        for object in blocker.complete(wakeup) {
            object.remove_waiter(blocker);
        }
    }

    /// Set an event and release its waiters.
    pub(crate) fn set_event(&mut self, object: &Arc<KernelObject>) -> Result<()> {
        match &mut object.core().signal {
            SignalState::Event(event) => event.set(),
            _ => return Err(WaitError::WrongType),
        }
        self.signal_waiters(object);
        Ok(())
    }

    /// Clear an event.
    pub(crate) fn reset_event(&mut self, object: &Arc<KernelObject>) -> Result<()> {
        match &mut object.core().signal {
            SignalState::Event(event) => event.reset(),
            _ => return Err(WaitError::WrongType),
        }
        Ok(())
    }

    /// Undo one acquisition of a mutex by `thread`; hands it to the next
    /// eligible waiter once it becomes free.
    pub(crate) fn release_mutex(
        &mut self,
        object: &Arc<KernelObject>,
        thread: ThreadId,
    ) -> Result<()> {
        let freed = match &mut object.core().signal {
            SignalState::Mutex(mutex) => mutex.release(thread)?,
            _ => return Err(WaitError::WrongType),
        };
        if freed {
            self.forget_ownership(object, thread);
            self.signal_waiters(object);
        }
        Ok(())
    }

    /// Return units to a semaphore, yielding the previous count.
    pub(crate) fn release_semaphore(
        &mut self,
        object: &Arc<KernelObject>,
        units: u32,
    ) -> Result<u32> {
        let previous = match &mut object.core().signal {
            SignalState::Semaphore(sem) => sem.release(units)?,
            _ => return Err(WaitError::WrongType),
        };
        self.signal_waiters(object);
        Ok(previous)
    }

    /// Mark a process or thread object terminated.
    pub(crate) fn exit_terminal(
        &mut self,
        object: &Arc<KernelObject>,
        exit_code: u32,
    ) -> Result<()> {
        match &mut object.core().signal {
            SignalState::Terminal { state, .. } => state.exit(exit_code),
            _ => return Err(WaitError::WrongType),
        }
        self.signal_waiters(object);
        Ok(())
    }

    /// Signal any signalable object the way `signal_object_and_wait` does:
    /// set an event, release a mutex once, release a semaphore by one.
    pub(crate) fn signal_object(
        &mut self,
        object: &Arc<KernelObject>,
        thread: ThreadId,
    ) -> Result<()> {
        match object.object_type() {
            ObjectType::ManualResetEvent | ObjectType::AutoResetEvent => self.set_event(object),
            ObjectType::Mutex => self.release_mutex(object, thread),
            ObjectType::Semaphore => self.release_semaphore(object, 1).map(|_| ()),
            ObjectType::Process | ObjectType::Thread => Err(WaitError::WrongType),
        }
    }

    /// Abandon every mutex `thread` still owns.
    fn abandon_owned(&mut self, thread: ThreadId) -> usize {
        let owned = self.owned_mutexes.remove(&thread).unwrap_or_default();
        let mut count = 0;
        for object in owned {
            {
                let mut core = object.core();
                match &mut core.signal {
                    SignalState::Mutex(mutex) if mutex.owner() == Some(thread) => mutex.abandon(),
                    _ => continue,
                }
            }
            warn!("thread {:?} terminated holding mutex {}", thread, object.id());
            count += 1;
            self.signal_waiters(&object);
        }
        count
    }
}

/// Owns the blocking and waking machinery for one context.
pub struct SynchManager {
    state: Mutex<SynchState>,
}

impl SynchManager {
    /// Create a manager.
    pub fn new(config: &SynchConfig) -> Self {
        Self {
            state: Mutex::new(SynchState {
                owned_mutexes: HashMap::new(),
                max_waiters: config.max_waiters_per_object,
            }),
        }
    }

    /// Take the manager lock.
    pub fn lock(&self) -> SynchGuard<'_> {
        self.state.lock()
    }

    /// Suspend the calling thread until its registered wait resolves or
    /// `timeout_ms` elapses.
    ///
    /// The caller has registered `blocker` on every object of its wait set
    /// (possibly none, for a plain sleep) and released the manager lock. On
    /// timeout the thread withdraws from all of them; a signaler that
    /// resolved the wait first wins.
    ///
    /// Alertable blocking is not supported and fails with `InternalError`.
    pub fn block(
        &self,
        blocker: &Arc<ThreadBlocker>,
        timeout_ms: u32,
        alertable: bool,
    ) -> Result<Wakeup> {
        if alertable {
            warn!("alertable block requested by thread {:?}", blocker.thread());
            return Err(WaitError::InternalError);
        }

        let deadline = if timeout_ms == INFINITE {
            None
        } else {
            Instant::now().checked_add(Duration::from_millis(u64::from(timeout_ms)))
        };

        if let Some(wakeup) = blocker.sleep_until(deadline) {
            return Ok(wakeup);
        }

        let _state = self.state.lock();
        match blocker.withdraw() {
            Ok(wakeup) => Ok(wakeup),
            Err(registered) => {
                for object in &registered {
                    object.remove_waiter(blocker);
                }
                trace!("thread {:?} timed out", blocker.thread());
                Ok(Wakeup::TIMEOUT)
            }
        }
    }

    /// Abandon the mutexes a terminated thread still owns, handing each to
    /// its next eligible waiter. Returns how many were abandoned.
    pub fn thread_terminated(&self, thread: ThreadId) -> usize {
        self.state.lock().abandon_owned(thread)
    }
}
