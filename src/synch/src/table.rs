//! Handle table mapping opaque handles to reference-counted kernel objects.
//!
//! Handles are generation-checked slots in an arena. Closing a handle bumps
//! the slot generation before the slot is reused, so a stale handle is
//! reported as invalid instead of reaching another object.
//!
//! Every handle holds one reference on its object, and so does every
//! [`ObjectRef`] handed out by [`ObjectTable::resolve`]. The object is
//! destroyed when the last reference goes away.

use core::ops::Deref;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kwait_common::{Handle, ObjectTypeSet, Result, WaitError};
use log::{debug, trace};
use smallvec::SmallVec;

use crate::config::INLINE_WAIT_OBJECTS;
use crate::object::KernelObject;

struct Slot {
    generation: u32,
    object: Option<Arc<KernelObject>>,
}

struct Slots {
    entries: Vec<Slot>,
    free: Vec<u32>,
}

impl Slots {
    fn lookup(&self, handle: Handle) -> Result<&Arc<KernelObject>> {
        let slot = handle.slot().ok_or(WaitError::InvalidHandle)?;
        match self.entries.get(slot as usize) {
            Some(Slot {
                generation,
                object: Some(object),
            }) if *generation == handle.generation() => Ok(object),
            _ => Err(WaitError::InvalidHandle),
        }
    }
}

/// A counted reference to a kernel object, released when dropped.
pub struct ObjectRef<'t> {
    table: &'t ObjectTable,
    object: Arc<KernelObject>,
}

impl<'t> ObjectRef<'t> {
    fn new(table: &'t ObjectTable, object: &Arc<KernelObject>) -> Self {
        object.add_ref();
        Self {
            table,
            object: object.clone(),
        }
    }

    /// The referenced object.
    pub fn object(&self) -> &Arc<KernelObject> {
        &self.object
    }

    /// Whether both references point at the same kernel object.
    pub fn same_object(&self, other: &ObjectRef<'_>) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl Deref for ObjectRef<'_> {
    type Target = KernelObject;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl Drop for ObjectRef<'_> {
    fn drop(&mut self) {
        self.table.drop_ref(&self.object);
    }
}

/// Objects resolved for one wait call; inline up to `INLINE_WAIT_OBJECTS`.
pub type ResolvedObjects<'t> = SmallVec<[ObjectRef<'t>; INLINE_WAIT_OBJECTS]>;

/// Reference-counted store mapping handles to kernel objects.
pub struct ObjectTable {
    slots: spin::Mutex<Slots>,
    max_handles: usize,
    live: AtomicUsize,
}

impl ObjectTable {
    /// Create an empty table holding at most `max_handles` open handles.
    pub fn new(max_handles: usize) -> Self {
        Self {
            slots: spin::Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
            }),
            max_handles,
            live: AtomicUsize::new(0),
        }
    }

    /// Store a new object and return the first handle to it.
    pub fn insert(&self, object: KernelObject) -> Result<Handle> {
        let object = Arc::new(object);
        let handle = self.attach(&object)?;
        self.live.fetch_add(1, Ordering::AcqRel);
        debug!("created {:?} as {:?}", object, handle);
        Ok(handle)
    }

    /// Issue another handle to the object `handle` names.
    pub fn duplicate(&self, handle: Handle) -> Result<Handle> {
        let mut slots = self.slots.lock();
        let object = slots.lookup(handle)?.clone();
        self.attach_locked(&mut slots, &object)
    }

    fn attach(&self, object: &Arc<KernelObject>) -> Result<Handle> {
        self.attach_locked(&mut self.slots.lock(), object)
    }

    /// Take a handle reference on `object`. The caller holds the slots lock
    /// from the moment it found `object` alive, so no close can drop the
    /// last reference in between.
    fn attach_locked(&self, slots: &mut Slots, object: &Arc<KernelObject>) -> Result<Handle> {
        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                if slots.entries.len() >= self.max_handles {
                    return Err(WaitError::OutOfMemory);
                }
                slots
                    .entries
                    .try_reserve(1)
                    .map_err(|_| WaitError::OutOfMemory)?;
                slots.entries.push(Slot {
                    generation: 0,
                    object: None,
                });
                (slots.entries.len() - 1) as u32
            }
        };
        let slot = &mut slots.entries[index as usize];
        object.add_ref();
        slot.object = Some(object.clone());
        Ok(Handle::new(index, slot.generation))
    }

    /// Close a handle, dropping its reference.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let object = {
            let mut slots = self.slots.lock();
            slots.lookup(handle)?;
            let index = handle.slot().ok_or(WaitError::InvalidHandle)?;
            let slot = &mut slots.entries[index as usize];
            let object = slot.object.take();
            // A slot whose generation is exhausted is retired rather than
            // reused, so a stale handle can never alias a newer object.
            match slot.generation.checked_add(1) {
                Some(generation) => {
                    slot.generation = generation;
                    slots.free.push(index);
                }
                None => debug!("retiring handle slot {}", index),
            }
            object
        };
        if let Some(object) = object {
            self.drop_ref(&object);
        }
        Ok(())
    }

    /// Reference every object named by `handles`.
    ///
    /// All-or-nothing: on failure no reference taken by this call survives.
    /// Handles of a type outside `allowed` fail with `WrongType`.
    pub fn resolve(
        &self,
        handles: &[Handle],
        allowed: ObjectTypeSet,
    ) -> Result<ResolvedObjects<'_>> {
        let mut resolved = ResolvedObjects::new();
        resolved
            .try_reserve(handles.len())
            .map_err(|_| WaitError::OutOfMemory)?;

        let slots = self.slots.lock();
        for handle in handles {
            let object = slots.lookup(*handle)?;
            if !allowed.allows(object.object_type()) {
                return Err(WaitError::WrongType);
            }
            resolved.push(ObjectRef::new(self, object));
        }
        Ok(resolved)
    }

    /// Reference the single object named by `handle`.
    pub fn resolve_one(&self, handle: Handle, allowed: ObjectTypeSet) -> Result<ObjectRef<'_>> {
        let slots = self.slots.lock();
        let object = slots.lookup(handle)?;
        if !allowed.allows(object.object_type()) {
            return Err(WaitError::WrongType);
        }
        Ok(ObjectRef::new(self, object))
    }

    /// Give back a reference obtained from `resolve`.
    pub fn release(&self, object: ObjectRef<'_>) {
        drop(object);
    }

    /// Objects created and not yet destroyed.
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Open handles.
    pub fn open_handles(&self) -> usize {
        let slots = self.slots.lock();
        slots.entries.iter().filter(|s| s.object.is_some()).count()
    }

    fn drop_ref(&self, object: &Arc<KernelObject>) {
        if object.release_ref() {
            self.destroy(object);
        }
    }

    fn destroy(&self, object: &KernelObject) {
        let mut core = object.core();
        debug_assert!(
            core.waiters.is_empty(),
            "object {} destroyed with pending waiters",
            object.id()
        );
        core.destroyed = true;
        self.live.fetch_sub(1, Ordering::AcqRel);
        trace!("destroyed object {}", object.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{EventState, SignalState, TerminalState};
    use kwait_common::MAX_WAIT_OBJECTS;

    fn event() -> KernelObject {
        KernelObject::new(SignalState::Event(EventState::new(false, false)))
    }

    #[test]
    fn test_handle_lifecycle() {
        let table = ObjectTable::new(16);
        let h = table.insert(event()).unwrap();
        assert_eq!(table.live_objects(), 1);
        assert_eq!(table.open_handles(), 1);

        table.close(h).unwrap();
        assert_eq!(table.live_objects(), 0);
        assert_eq!(table.close(h), Err(WaitError::InvalidHandle));
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let table = ObjectTable::new(16);
        let old = table.insert(event()).unwrap();
        table.close(old).unwrap();
        let new = table.insert(event()).unwrap();

        assert_eq!(old.slot(), new.slot());
        assert_ne!(old, new);
        assert!(table.resolve_one(old, ObjectTypeSet::WAITABLE).is_err());
        assert!(table.resolve_one(new, ObjectTypeSet::WAITABLE).is_ok());
    }

    #[test]
    fn test_resolve_release_round_trip() {
        let table = ObjectTable::new(128);
        let handles: Vec<Handle> = (0..MAX_WAIT_OBJECTS)
            .map(|_| table.insert(event()).unwrap())
            .collect();

        for n in 1..=MAX_WAIT_OBJECTS {
            let resolved = table.resolve(&handles[..n], ObjectTypeSet::WAITABLE).unwrap();
            assert_eq!(resolved.len(), n);
            assert!(resolved.iter().all(|r| r.ref_count() == 2));
            for r in resolved {
                table.release(r);
            }
            for h in &handles {
                let r = table.resolve_one(*h, ObjectTypeSet::WAITABLE).unwrap();
                assert_eq!(r.ref_count(), 2);
            }
        }
    }

    #[test]
    fn test_resolve_is_all_or_nothing() {
        let table = ObjectTable::new(16);
        let a = table.insert(event()).unwrap();
        let b = table.insert(event()).unwrap();
        let closed = table.insert(event()).unwrap();
        table.close(closed).unwrap();

        let err = table.resolve(&[a, b, closed], ObjectTypeSet::WAITABLE);
        assert_eq!(err.err(), Some(WaitError::InvalidHandle));
        let a_ref = table.resolve_one(a, ObjectTypeSet::WAITABLE).unwrap();
        assert_eq!(a_ref.ref_count(), 2);
    }

    #[test]
    fn test_resolve_checks_type() {
        let table = ObjectTable::new(16);
        let process = table
            .insert(KernelObject::new(SignalState::Terminal {
                state: TerminalState::running(),
                thread: false,
            }))
            .unwrap();
        assert_eq!(
            table.resolve_one(process, ObjectTypeSet::EVENT).err(),
            Some(WaitError::WrongType)
        );
    }

    #[test]
    fn test_object_outlives_handle_while_referenced() {
        let table = ObjectTable::new(16);
        let h = table.insert(event()).unwrap();
        let r = table.resolve_one(h, ObjectTypeSet::WAITABLE).unwrap();

        table.close(h).unwrap();
        assert_eq!(table.live_objects(), 1);
        assert!(!r.core().destroyed);

        let object = r.object().clone();
        table.release(r);
        assert_eq!(table.live_objects(), 0);
        assert!(object.core().destroyed);
    }

    #[test]
    fn test_duplicate_shares_object() {
        let table = ObjectTable::new(16);
        let h = table.insert(event()).unwrap();
        let dup = table.duplicate(h).unwrap();
        assert_ne!(h, dup);

        let a = table.resolve_one(h, ObjectTypeSet::WAITABLE).unwrap();
        let b = table.resolve_one(dup, ObjectTypeSet::WAITABLE).unwrap();
        assert!(a.same_object(&b));
        assert_eq!(a.ref_count(), 4);
    }

    #[test]
    fn test_duplicate_races_close() {
        let table = ObjectTable::new(16);
        for _ in 0..500 {
            let h = table.insert(event()).unwrap();
            let dup = std::thread::scope(|s| {
                let dup = s.spawn(|| table.duplicate(h));
                table.close(h).unwrap();
                dup.join().unwrap()
            });
            match dup {
                Ok(dup) => {
                    assert_eq!(table.live_objects(), 1);
                    table.close(dup).unwrap();
                }
                Err(err) => assert_eq!(err, WaitError::InvalidHandle),
            }
            assert_eq!(table.live_objects(), 0);
            assert_eq!(table.open_handles(), 0);
        }
    }

    #[test]
    fn test_exhausted_generation_retires_slot() {
        let table = ObjectTable::new(16);
        let first = table.insert(event()).unwrap();
        table.close(first).unwrap();
        table.slots.lock().entries[0].generation = u32::MAX;

        let last = table.insert(event()).unwrap();
        assert_eq!(last.slot(), Some(0));
        assert_eq!(last.generation(), u32::MAX);
        table.close(last).unwrap();

        let next = table.insert(event()).unwrap();
        assert_eq!(next.slot(), Some(1));
        assert_eq!(table.close(last), Err(WaitError::InvalidHandle));
        assert_eq!(table.close(first), Err(WaitError::InvalidHandle));
        assert_eq!(table.open_handles(), 1);
    }

    #[test]
    fn test_capacity_exhaustion() {
        let table = ObjectTable::new(1);
        table.insert(event()).unwrap();
        assert_eq!(table.insert(event()), Err(WaitError::OutOfMemory));
    }
}
