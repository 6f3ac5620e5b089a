//! Wait controllers: the per-object capability the wait orchestrator uses.
//!
//! A [`ControllerSet`] is obtained for all objects of one wait call and
//! holds the synchronization manager's lock until it is released. While it
//! is held, [`ObjectController`]s answer whether the calling thread can
//! proceed, consume objects on the fast path, and register waiter records.

use std::sync::Arc;

use kwait_common::{Result, WaitError};
use log::trace;
use smallvec::SmallVec;

use crate::config::INLINE_WAIT_OBJECTS;
use crate::manager::{SynchGuard, SynchManager, SynchState, ThreadBlocker, WaitKind};
use crate::object::{Claim, KernelObject, WaiterRecord};
use crate::table::ObjectRef;

/// Result of a non-blocking satisfiability check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// The calling thread could claim the object now.
    pub satisfiable: bool,
    /// The object is a mutex abandoned by its previous owner.
    pub abandoned: bool,
}

/// Wait protocol every waitable object supports.
pub trait WaitController {
    /// Pure query; never consumes the object.
    fn can_proceed_without_blocking(&self) -> Result<Readiness>;

    /// Consume the object for the calling thread. Only valid after
    /// `can_proceed_without_blocking` reported it satisfiable.
    fn claim_without_blocking(&mut self) -> Result<Claim>;

    /// Append a waiter record for the calling thread.
    fn register_waiter(&mut self, kind: WaitKind, alertable: bool, prioritized: bool) -> Result<()>;
}

/// Controller for one object of a wait set.
pub struct ObjectController<'c> {
    state: &'c mut SynchState,
    object: &'c Arc<KernelObject>,
    blocker: &'c Arc<ThreadBlocker>,
    index: usize,
}

impl WaitController for ObjectController<'_> {
    fn can_proceed_without_blocking(&self) -> Result<Readiness> {
        let core = self.object.core();
        Ok(Readiness {
            satisfiable: core.signal.is_satisfiable_for(self.blocker.thread()),
            abandoned: core.signal.is_abandoned(),
        })
    }

    fn claim_without_blocking(&mut self) -> Result<Claim> {
        let thread = self.blocker.thread();
        if !self.object.core().signal.is_satisfiable_for(thread) {
            return Err(WaitError::InternalError);
        }
        Ok(self.state.claim(self.object, thread))
    }

    fn register_waiter(
        &mut self,
        kind: WaitKind,
        alertable: bool,
        prioritized: bool,
    ) -> Result<()> {
        let mut core = self.object.core();
        if core.waiters.len() >= self.state.max_waiters() {
            return Err(WaitError::OutOfMemory);
        }
        core.waiters
            .try_reserve(1)
            .map_err(|_| WaitError::OutOfMemory)?;
        core.push_waiter(WaiterRecord {
            blocker: self.blocker.clone(),
            index: self.index,
            kind,
            alertable,
            prioritized,
        });
        drop(core);
        self.blocker.add_registration(self.object.clone());
        trace!(
            "thread {:?} registered on object {} at index {}",
            self.blocker.thread(),
            self.object.id(),
            self.index
        );
        Ok(())
    }
}

/// Controllers for every object of one wait call.
///
/// Dropping the set (or calling [`release_controllers`](Self::release_controllers))
/// releases the manager lock.
pub struct ControllerSet<'m> {
    state: SynchGuard<'m>,
    objects: SmallVec<[Arc<KernelObject>; INLINE_WAIT_OBJECTS]>,
    blocker: Arc<ThreadBlocker>,
}

impl<'m> ControllerSet<'m> {
    /// Lock `manager` and build controllers for `objects` on behalf of
    /// `blocker`'s thread.
    pub fn acquire(
        manager: &'m SynchManager,
        objects: &[ObjectRef<'_>],
        blocker: Arc<ThreadBlocker>,
    ) -> Result<Self> {
        Self::with_guard(manager.lock(), objects, blocker)
    }

    /// Build controllers under a lock the caller already holds.
    pub fn with_guard(
        state: SynchGuard<'m>,
        objects: &[ObjectRef<'_>],
        blocker: Arc<ThreadBlocker>,
    ) -> Result<Self> {
        let mut held = SmallVec::new();
        held.try_reserve(objects.len())
            .map_err(|_| WaitError::OutOfMemory)?;
        held.extend(objects.iter().map(|o| o.object().clone()));
        Ok(Self {
            state,
            objects: held,
            blocker,
        })
    }

    /// Number of controllers.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Controller for the object at `index` of the wait set.
    pub fn controller(&mut self, index: usize) -> ObjectController<'_> {
        ObjectController {
            state: &mut *self.state,
            object: &self.objects[index],
            blocker: &self.blocker,
            index,
        }
    }

    /// Remove every waiter record registered through this set.
    pub fn unregister_all(&mut self) {
        for object in self.blocker.take_registrations() {
            object.remove_waiter(&self.blocker);
        }
    }

    /// Release the manager lock.
    pub fn release_controllers(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynchConfig;
    use crate::object::{EventState, MutexState, SignalState};
    use crate::table::ObjectTable;
    use kwait_common::{ObjectTypeSet, ThreadId};

    fn setup(config: SynchConfig) -> (ObjectTable, SynchManager) {
        (ObjectTable::new(config.max_handles), SynchManager::new(&config))
    }

    #[test]
    fn test_query_then_claim() {
        let (table, manager) = setup(SynchConfig::default());
        let h = table
            .insert(KernelObject::new(SignalState::Event(EventState::new(false, true))))
            .unwrap();
        let objects = table.resolve(&[h], ObjectTypeSet::WAITABLE).unwrap();
        let blocker = Arc::new(ThreadBlocker::new(ThreadId::next()));
        let mut set = ControllerSet::acquire(&manager, &objects, blocker).unwrap();

        let mut controller = set.controller(0);
        let readiness = controller.can_proceed_without_blocking().unwrap();
        assert!(readiness.satisfiable);
        assert!(!readiness.abandoned);
        assert!(controller.can_proceed_without_blocking().unwrap().satisfiable);

        controller.claim_without_blocking().unwrap();
        assert!(!controller.can_proceed_without_blocking().unwrap().satisfiable);
        assert_eq!(controller.claim_without_blocking(), Err(WaitError::InternalError));
    }

    #[test]
    fn test_claim_mutex_records_owner() {
        let (table, manager) = setup(SynchConfig::default());
        let h = table
            .insert(KernelObject::new(SignalState::Mutex(MutexState::new(None))))
            .unwrap();
        let objects = table.resolve(&[h], ObjectTypeSet::WAITABLE).unwrap();
        let blocker = Arc::new(ThreadBlocker::new(ThreadId::next()));
        let thread = blocker.thread();
        let mut set = ControllerSet::acquire(&manager, &objects, blocker).unwrap();

        assert!(set.controller(0).claim_without_blocking().unwrap().took_ownership);
        set.release_controllers();

        match &objects[0].core().signal {
            SignalState::Mutex(m) => assert_eq!(m.owner(), Some(thread)),
            _ => unreachable!(),
        }
        assert_eq!(manager.thread_terminated(thread), 1);
    }

    #[test]
    fn test_register_respects_waiter_limit() {
        let (table, manager) = setup(SynchConfig::default().with_max_waiters(1));
        let h = table
            .insert(KernelObject::new(SignalState::Event(EventState::new(true, false))))
            .unwrap();
        let objects = table.resolve(&[h], ObjectTypeSet::WAITABLE).unwrap();

        let first = Arc::new(ThreadBlocker::new(ThreadId::next()));
        first.begin_wait(WaitKind::Single);
        let mut set = ControllerSet::acquire(&manager, &objects, first.clone()).unwrap();
        set.controller(0).register_waiter(WaitKind::Single, false, false).unwrap();
        set.release_controllers();

        let second = Arc::new(ThreadBlocker::new(ThreadId::next()));
        second.begin_wait(WaitKind::Single);
        let mut set = ControllerSet::acquire(&manager, &objects, second).unwrap();
        assert_eq!(
            set.controller(0).register_waiter(WaitKind::Single, false, false),
            Err(WaitError::OutOfMemory)
        );
        set.release_controllers();

        let mut set = ControllerSet::acquire(&manager, &objects, first).unwrap();
        set.unregister_all();
        set.release_controllers();
        assert_eq!(objects[0].waiter_count(), 0);
    }

    #[test]
    fn test_prioritized_waiter_goes_first() {
        let (table, manager) = setup(SynchConfig::default());
        let h = table
            .insert(KernelObject::new(SignalState::Event(EventState::new(false, false))))
            .unwrap();
        let objects = table.resolve(&[h], ObjectTypeSet::WAITABLE).unwrap();

        let normal = Arc::new(ThreadBlocker::new(ThreadId::next()));
        let urgent = Arc::new(ThreadBlocker::new(ThreadId::next()));
        for (blocker, prioritized) in [(&normal, false), (&urgent, true)] {
            blocker.begin_wait(WaitKind::Single);
            let mut set = ControllerSet::acquire(&manager, &objects, blocker.clone()).unwrap();
            set.controller(0)
                .register_waiter(WaitKind::Single, false, prioritized)
                .unwrap();
        }

        manager.lock().set_event(objects[0].object()).unwrap();
        assert!(urgent.registrations().is_empty());
        assert_eq!(normal.registrations().len(), 1);
    }
}
