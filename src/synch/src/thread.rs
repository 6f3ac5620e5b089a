//! Thread identity and attachment.

use std::sync::Arc;

use kwait_common::{Handle, ThreadId};
use log::{debug, warn};

use crate::context::Pal;
use crate::manager::ThreadBlocker;

thread_local! {
    static CURRENT: Arc<ThreadBlocker> = Arc::new(ThreadBlocker::new(ThreadId::next()));
}

/// Wait state of the calling OS thread.
pub fn current_blocker() -> Arc<ThreadBlocker> {
    CURRENT.with(Arc::clone)
}

/// Identity of the calling OS thread.
pub fn current_thread_id() -> ThreadId {
    CURRENT.with(|blocker| blocker.thread())
}

/// Marks the calling thread as attached to a [`Pal`] context.
///
/// The guard owns a handle to the thread's waitable Thread object. Dropping
/// it models the thread terminating: mutexes the thread still owns are
/// abandoned and the Thread object becomes signaled.
pub struct ThreadGuard<'p> {
    pal: &'p Pal,
    thread: ThreadId,
    handle: Handle,
}

impl<'p> ThreadGuard<'p> {
    pub(crate) fn new(pal: &'p Pal, handle: Handle) -> Self {
        Self {
            pal,
            thread: current_thread_id(),
            handle,
        }
    }

    /// Handle to this thread's Thread object.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Identity of the attached thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }
}

impl Drop for ThreadGuard<'_> {
    fn drop(&mut self) {
        let abandoned = self.pal.synch().thread_terminated(self.thread);
        if let Err(err) = self.pal.exit_thread_object(self.handle, 0) {
            warn!("thread {:?}: cannot signal thread object: {}", self.thread, err);
        }
        if let Err(err) = self.pal.close_handle(self.handle) {
            warn!("thread {:?}: cannot close thread handle: {}", self.thread, err);
        }
        debug!(
            "thread {:?} detached, {} mutex(es) abandoned",
            self.thread, abandoned
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable_per_thread() {
        let here = current_thread_id();
        assert_eq!(here, current_thread_id());
        assert!(Arc::ptr_eq(&current_blocker(), &current_blocker()));

        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }
}
