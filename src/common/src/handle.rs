//! Opaque handles, thread identities and the waitable object taxonomy.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

/// Opaque reference to a kernel object.
///
/// The low 32 bits carry `slot + 1` in the owning handle table and the
/// high 32 bits carry the slot generation, so a handle that outlived its
/// table entry never aliases a newer one. The raw value `0` is never handed
/// out.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Null handle.
    pub const INVALID: Handle = Handle(0);

    /// Builds a handle from a table slot and its generation.
    pub const fn new(slot: u32, generation: u32) -> Self {
        Handle(((generation as u64) << 32) | (slot as u64 + 1))
    }

    /// Reinterprets a raw value received from a caller.
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// Returns the raw handle value.
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Table slot this handle points at, `None` for the null handle.
    pub const fn slot(&self) -> Option<u32> {
        let low = self.0 as u32;
        if low == 0 {
            None
        } else {
            Some(low - 1)
        }
    }

    /// Generation of the slot at the time the handle was issued.
    pub const fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Checks that this is not the null handle.
    pub const fn is_valid(&self) -> bool {
        self.slot().is_some()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

/// Identity of an OS thread participating in waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreadId(u64);

impl ThreadId {
    /// Generate the next unique ThreadId.
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ThreadId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric identity.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Type tag of a kernel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectType {
    /// Owned, recursive mutual-exclusion lock.
    Mutex,
    /// Event that stays signaled until reset.
    ManualResetEvent,
    /// Event that resets itself when it releases one waiter.
    AutoResetEvent,
    /// Counting semaphore.
    Semaphore,
    /// Process, signaled once it exits.
    Process,
    /// Thread, signaled once it terminates.
    Thread,
}

impl ObjectType {
    /// The single-bit set matching this type.
    pub const fn as_set(self) -> ObjectTypeSet {
        match self {
            ObjectType::Mutex => ObjectTypeSet::MUTEX,
            ObjectType::ManualResetEvent => ObjectTypeSet::MANUAL_RESET_EVENT,
            ObjectType::AutoResetEvent => ObjectTypeSet::AUTO_RESET_EVENT,
            ObjectType::Semaphore => ObjectTypeSet::SEMAPHORE,
            ObjectType::Process => ObjectTypeSet::PROCESS,
            ObjectType::Thread => ObjectTypeSet::THREAD,
        }
    }

    /// Largest wait set an object of this type may take part in.
    ///
    /// Process and thread objects only support single-object waits.
    pub const fn max_wait_set(self) -> usize {
        match self {
            ObjectType::Process | ObjectType::Thread => 1,
            _ => crate::MAX_WAIT_OBJECTS,
        }
    }
}

bitflags! {
    /// Set of object types accepted by a handle lookup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ObjectTypeSet: u32 {
        const MUTEX              = 1 << 0;
        const MANUAL_RESET_EVENT = 1 << 1;
        const AUTO_RESET_EVENT   = 1 << 2;
        const SEMAPHORE          = 1 << 3;
        const PROCESS            = 1 << 4;
        const THREAD             = 1 << 5;

        const EVENT = Self::MANUAL_RESET_EVENT.bits() | Self::AUTO_RESET_EVENT.bits();
        const WAITABLE = Self::MUTEX.bits()
            | Self::EVENT.bits()
            | Self::SEMAPHORE.bits()
            | Self::PROCESS.bits()
            | Self::THREAD.bits();
        /// Objects `signal_object_and_wait` knows how to signal.
        const SIGNALABLE = Self::MUTEX.bits() | Self::EVENT.bits() | Self::SEMAPHORE.bits();
    }
}

impl ObjectTypeSet {
    /// Checks whether `ty` is a member of this set.
    pub fn allows(&self, ty: ObjectType) -> bool {
        self.contains(ty.as_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_slot_and_generation() {
        let h = Handle::new(7, 3);
        assert_eq!(h.slot(), Some(7));
        assert_eq!(h.generation(), 3);
        assert!(h.is_valid());
        assert_eq!(Handle::from_raw(h.raw()), h);
    }

    #[test]
    fn test_invalid_handle() {
        assert!(!Handle::INVALID.is_valid());
        assert_eq!(Handle::INVALID.slot(), None);
        assert_ne!(Handle::new(0, 0), Handle::INVALID);
    }

    #[test]
    fn test_type_sets() {
        assert!(ObjectTypeSet::WAITABLE.allows(ObjectType::Thread));
        assert!(ObjectTypeSet::EVENT.allows(ObjectType::AutoResetEvent));
        assert!(!ObjectTypeSet::SIGNALABLE.allows(ObjectType::Process));
        assert_eq!(ObjectType::Process.max_wait_set(), 1);
        assert_eq!(ObjectType::Mutex.max_wait_set(), crate::MAX_WAIT_OBJECTS);
    }

    #[test]
    fn test_thread_ids_unique() {
        let a = ThreadId::next();
        let b = ThreadId::next();
        assert_ne!(a, b);
    }
}
