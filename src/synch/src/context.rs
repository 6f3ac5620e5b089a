//! The synchronization context and its object-management API.
//!
//! A [`Pal`] owns one handle table and one synchronization manager. It is
//! built once at process start and passed to whoever needs to create,
//! signal or wait on objects. The wait entry points live in
//! [`wait`](crate::wait).

use kwait_common::{Handle, ObjectTypeSet, Result};
use log::debug;

use crate::config::SynchConfig;
use crate::manager::SynchManager;
use crate::object::{
    EventState, KernelObject, MutexState, SemaphoreState, SignalState, TerminalState,
};
use crate::table::ObjectTable;
use crate::thread::{current_thread_id, ThreadGuard};

/// Process-wide synchronization context.
pub struct Pal {
    table: ObjectTable,
    synch: SynchManager,
    config: SynchConfig,
}

impl Pal {
    /// Create a context with the given limits.
    pub fn new(config: SynchConfig) -> Self {
        debug!("synchronization context: {:?}", config);
        Self {
            table: ObjectTable::new(config.max_handles),
            synch: SynchManager::new(&config),
            config,
        }
    }

    /// The handle table.
    pub fn table(&self) -> &ObjectTable {
        &self.table
    }

    /// The synchronization manager.
    pub fn synch(&self) -> &SynchManager {
        &self.synch
    }

    /// Limits this context was built with.
    pub fn config(&self) -> &SynchConfig {
        &self.config
    }

    // Events

    /// Create an event, initially signaled if `initial_state` is set.
    pub fn create_event(&self, manual_reset: bool, initial_state: bool) -> Result<Handle> {
        self.table
            .insert(KernelObject::new(SignalState::Event(EventState::new(
                manual_reset,
                initial_state,
            ))))
    }

    /// Signal an event. A manual-reset event releases every waiter, an
    /// auto-reset event exactly one.
    pub fn set_event(&self, handle: Handle) -> Result<()> {
        let event = self.table.resolve_one(handle, ObjectTypeSet::EVENT)?;
        self.synch.lock().set_event(event.object())
    }

    /// Return an event to the non-signaled state.
    pub fn reset_event(&self, handle: Handle) -> Result<()> {
        let event = self.table.resolve_one(handle, ObjectTypeSet::EVENT)?;
        self.synch.lock().reset_event(event.object())
    }

    // Mutexes

    /// Create a mutex, owned by the calling thread if `initial_owner` is set.
    pub fn create_mutex(&self, initial_owner: bool) -> Result<Handle> {
        // Held across publication so nobody can take the mutex before its
        // initial owner does.
        let mut state = self.synch.lock();
        let handle = self
            .table
            .insert(KernelObject::new(SignalState::Mutex(MutexState::new(None))))?;
        if initial_owner {
            let mutex = self.table.resolve_one(handle, ObjectTypeSet::MUTEX)?;
            state.claim(mutex.object(), current_thread_id());
        }
        Ok(handle)
    }

    /// Undo one acquisition of a mutex owned by the calling thread.
    pub fn release_mutex(&self, handle: Handle) -> Result<()> {
        let mutex = self.table.resolve_one(handle, ObjectTypeSet::MUTEX)?;
        self.synch
            .lock()
            .release_mutex(mutex.object(), current_thread_id())
    }

    // Semaphores

    /// Create a counting semaphore.
    pub fn create_semaphore(&self, initial: u32, maximum: u32) -> Result<Handle> {
        let state = SemaphoreState::new(initial, maximum)?;
        self.table
            .insert(KernelObject::new(SignalState::Semaphore(state)))
    }

    /// Add `count` units to a semaphore; returns the previous count.
    pub fn release_semaphore(&self, handle: Handle, count: u32) -> Result<u32> {
        let sem = self.table.resolve_one(handle, ObjectTypeSet::SEMAPHORE)?;
        self.synch.lock().release_semaphore(sem.object(), count)
    }

    // Processes and threads

    /// Create a waitable object standing for a running process.
    pub fn create_process_object(&self) -> Result<Handle> {
        self.table.insert(KernelObject::new(SignalState::Terminal {
            state: TerminalState::running(),
            thread: false,
        }))
    }

    /// Mark a process exited. The first exit code sticks.
    pub fn set_process_exited(&self, handle: Handle, exit_code: u32) -> Result<()> {
        let process = self.table.resolve_one(handle, ObjectTypeSet::PROCESS)?;
        self.synch.lock().exit_terminal(process.object(), exit_code)
    }

    /// Exit code of a process or thread, `None` while it still runs.
    pub fn get_exit_code(&self, handle: Handle) -> Result<Option<u32>> {
        let object = self
            .table
            .resolve_one(handle, ObjectTypeSet::PROCESS | ObjectTypeSet::THREAD)?;
        let core = object.core();
        Ok(match &core.signal {
            SignalState::Terminal { state, .. } => state.exit_code(),
            _ => None,
        })
    }

    /// Create the calling thread's Thread object.
    ///
    /// Dropping the returned guard terminates the thread as far as this
    /// context is concerned.
    pub fn attach_current_thread(&self) -> Result<ThreadGuard<'_>> {
        let handle = self.table.insert(KernelObject::new(SignalState::Terminal {
            state: TerminalState::running(),
            thread: true,
        }))?;
        Ok(ThreadGuard::new(self, handle))
    }

    pub(crate) fn exit_thread_object(&self, handle: Handle, exit_code: u32) -> Result<()> {
        let thread = self.table.resolve_one(handle, ObjectTypeSet::THREAD)?;
        self.synch.lock().exit_terminal(thread.object(), exit_code)
    }

    // Handles

    /// Close a handle. The object lives on while other handles or
    /// in-flight waits reference it.
    pub fn close_handle(&self, handle: Handle) -> Result<()> {
        self.table.close(handle)
    }

    /// Open a second handle to the same object.
    pub fn duplicate_handle(&self, handle: Handle) -> Result<Handle> {
        self.table.duplicate(handle)
    }

    // Introspection

    /// References held on the object behind `handle`, not counting this
    /// query's own.
    pub fn ref_count(&self, handle: Handle) -> Result<usize> {
        let object = self.table.resolve_one(handle, ObjectTypeSet::all())?;
        Ok(object.ref_count() - 1)
    }

    /// Objects created and not yet destroyed.
    pub fn live_objects(&self) -> usize {
        self.table.live_objects()
    }

    /// Threads queued on the object behind `handle`.
    pub fn waiter_count(&self, handle: Handle) -> Result<usize> {
        let object = self.table.resolve_one(handle, ObjectTypeSet::all())?;
        Ok(object.waiter_count())
    }

    /// Thread-independent signaled state of the object behind `handle`.
    pub fn is_signaled(&self, handle: Handle) -> Result<bool> {
        let object = self.table.resolve_one(handle, ObjectTypeSet::all())?;
        let signaled = object.core().signal.is_signaled();
        Ok(signaled)
    }
}

impl Default for Pal {
    fn default() -> Self {
        Self::new(SynchConfig::default())
    }
}
