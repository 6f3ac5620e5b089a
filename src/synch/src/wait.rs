//! Multi-object wait orchestration.
//!
//! Every wait goes through the same sequence: validate and resolve the
//! handles, take the controllers (the synchronization lock), try to finish
//! without blocking, and otherwise register on every object, drop the lock
//! and block. Object references are held by [`ObjectRef`]s for the whole
//! call, so each is released exactly once on every exit path.

use std::sync::Arc;

use kwait_common::{Handle, ObjectTypeSet, Result, WaitError, WaitResult, MAX_WAIT_OBJECTS};
use log::{trace, warn};

use crate::context::Pal;
use crate::controller::{ControllerSet, WaitController};
use crate::last_error::set_last_error;
use crate::manager::{ThreadBlocker, WaitKind, Wakeup, WakeupReason};
use crate::table::{ObjectRef, ResolvedObjects};
use crate::thread::current_blocker;

impl Pal {
    /// Wait on one object.
    pub fn wait_for_single_object(&self, handle: Handle, timeout_ms: u32) -> WaitResult {
        self.wait_for_multiple_objects_ex(&[handle], false, timeout_ms, false, false)
    }

    /// Wait until any (or, with `wait_all`, every) object is signaled.
    pub fn wait_for_multiple_objects(
        &self,
        handles: &[Handle],
        wait_all: bool,
        timeout_ms: u32,
    ) -> WaitResult {
        self.wait_for_multiple_objects_ex(handles, wait_all, timeout_ms, false, false)
    }

    /// Wait on up to [`MAX_WAIT_OBJECTS`] objects.
    ///
    /// Returns the index of the releasing object for single and wait-any
    /// requests, no index for wait-all. `timeout_ms == 0` polls and
    /// [`INFINITE`](kwait_common::INFINITE) never times out. `prioritize`
    /// queues the caller ahead of other waiters.
    ///
    /// On [`WaitResult::Failed`] the calling thread's last error holds the
    /// reason. Alertable waits are not supported and always fail.
    pub fn wait_for_multiple_objects_ex(
        &self,
        handles: &[Handle],
        wait_all: bool,
        timeout_ms: u32,
        alertable: bool,
        prioritize: bool,
    ) -> WaitResult {
        report(self.wait_multiple(handles, wait_all, timeout_ms, alertable, prioritize))
    }

    /// Signal `signal` and wait on `wait` without letting another thread
    /// observe the state in between.
    ///
    /// `signal` may be an event (set), a mutex (released once) or a
    /// semaphore (released by one).
    pub fn signal_object_and_wait(
        &self,
        signal: Handle,
        wait: Handle,
        timeout_ms: u32,
        alertable: bool,
    ) -> WaitResult {
        report(self.signal_and_wait(signal, wait, timeout_ms, alertable))
    }

    /// Suspend the calling thread for `timeout_ms`.
    pub fn sleep(&self, timeout_ms: u32) {
        self.sleep_ex(timeout_ms, false);
    }

    /// Suspend the calling thread for `timeout_ms`. Returns
    /// [`WaitResult::Timeout`] once the time has passed.
    pub fn sleep_ex(&self, timeout_ms: u32, alertable: bool) -> WaitResult {
        let blocker = current_blocker();
        blocker.begin_wait(WaitKind::Single);
        report(self.synch().block(&blocker, timeout_ms, alertable).map(|_| WaitResult::Timeout))
    }

    fn wait_multiple(
        &self,
        handles: &[Handle],
        wait_all: bool,
        timeout_ms: u32,
        alertable: bool,
        prioritize: bool,
    ) -> Result<WaitResult> {
        if handles.is_empty() || handles.len() > MAX_WAIT_OBJECTS {
            warn!("wait on {} handles rejected", handles.len());
            return Err(WaitError::InvalidParameter);
        }
        let wait_all = wait_all && handles.len() > 1;

        let objects = self.resolve_waitable(handles)?;
        check_capability(&objects)?;
        if wait_all {
            check_duplicates(handles, &objects)?;
        }

        let blocker = current_blocker();
        let set = ControllerSet::acquire(self.synch(), &objects, blocker.clone())?;
        self.wait_with_controllers(set, &blocker, wait_all, timeout_ms, alertable, prioritize)
    }

    fn signal_and_wait(
        &self,
        signal: Handle,
        wait: Handle,
        timeout_ms: u32,
        alertable: bool,
    ) -> Result<WaitResult> {
        // Nothing is signaled for a wait that is bound to fail.
        if alertable {
            warn!("alertable signal-and-wait on {:?} rejected", wait);
            return Err(WaitError::InternalError);
        }

        let target = self
            .table()
            .resolve_one(signal, ObjectTypeSet::SIGNALABLE)
            .map_err(|err| {
                warn!("cannot signal {:?}: {}", signal, err);
                as_invalid_handle(err)
            })?;
        let objects = self.resolve_waitable(&[wait])?;

        let blocker = current_blocker();
        let mut state = self.synch().lock();
        if let Err(err) = state.signal_object(target.object(), blocker.thread()) {
            warn!("signaling {:?} failed: {}", signal, err);
            return Err(err);
        }
        let set = ControllerSet::with_guard(state, &objects, blocker.clone())?;
        self.wait_with_controllers(set, &blocker, false, timeout_ms, alertable, false)
    }

    fn resolve_waitable(&self, handles: &[Handle]) -> Result<ResolvedObjects<'_>> {
        self.table()
            .resolve(handles, ObjectTypeSet::WAITABLE)
            .map_err(|err| {
                warn!("cannot resolve wait handles {:?}: {}", handles, err);
                as_invalid_handle(err)
            })
    }

    /// Fast path, then register and block. Consumes the controllers, so
    /// the synchronization lock is gone by the time this returns or blocks.
    fn wait_with_controllers(
        &self,
        mut set: ControllerSet<'_>,
        blocker: &Arc<ThreadBlocker>,
        wait_all: bool,
        timeout_ms: u32,
        alertable: bool,
        prioritize: bool,
    ) -> Result<WaitResult> {
        if alertable {
            warn!("alertable wait by thread {:?} rejected", blocker.thread());
            return Err(WaitError::InternalError);
        }

        let count = set.len();
        let mut satisfied = 0;
        let mut winner = None;
        let mut abandoned = false;
        for index in 0..count {
            let readiness = set.controller(index).can_proceed_without_blocking()?;
            if !readiness.satisfiable {
                continue;
            }
            satisfied += 1;
            abandoned |= readiness.abandoned;
            if !wait_all {
                winner = Some(index);
                break;
            }
        }

        let need_to_block = if wait_all {
            satisfied < count
        } else {
            winner.is_none()
        };

        if !need_to_block {
            let index = if wait_all {
                for i in 0..count {
                    abandoned |= set.controller(i).claim_without_blocking()?.abandoned;
                }
                None
            } else {
                let i = winner.ok_or(WaitError::InternalError)?;
                abandoned |= set.controller(i).claim_without_blocking()?.abandoned;
                Some(i)
            };
            trace!(
                "thread {:?} satisfied without blocking (index {:?})",
                blocker.thread(),
                index
            );
            return Ok(if abandoned {
                WaitResult::Abandoned(index)
            } else {
                WaitResult::ObjectSignaled(index)
            });
        }

        if timeout_ms == 0 {
            return Ok(WaitResult::Timeout);
        }

        let kind = WaitKind::for_wait(count, wait_all);
        blocker.begin_wait(kind);
        for index in 0..count {
            let registered = set
                .controller(index)
                .register_waiter(kind, alertable, prioritize);
            if let Err(err) = registered {
                warn!("registering on wait object {} failed: {}", index, err);
                set.unregister_all();
                return Err(err);
            }
        }
        set.release_controllers();

        let wakeup = self.synch().block(blocker, timeout_ms, alertable)?;
        map_wakeup(wakeup, kind, count)
    }
}

fn check_capability(objects: &[ObjectRef<'_>]) -> Result<()> {
    for (index, object) in objects.iter().enumerate() {
        if objects.len() > object.object_type().max_wait_set() {
            warn!(
                "{:?} at index {} cannot join a wait on {} objects",
                object.object_type(),
                index,
                objects.len()
            );
            return Err(WaitError::NotSupported);
        }
    }
    Ok(())
}

fn check_duplicates(handles: &[Handle], objects: &[ObjectRef<'_>]) -> Result<()> {
    for i in 0..objects.len() {
        for j in i + 1..objects.len() {
            if objects[i].same_object(&objects[j]) {
                warn!(
                    "wait-all names one object twice: {:?} and {:?}",
                    handles[i], handles[j]
                );
                return Err(WaitError::InvalidParameter);
            }
        }
    }
    Ok(())
}

fn map_wakeup(wakeup: Wakeup, kind: WaitKind, count: usize) -> Result<WaitResult> {
    let index = || match (kind, wakeup.index) {
        (WaitKind::All, _) => Ok(None),
        (_, Some(i)) if i < count => Ok(Some(i)),
        (_, other) => {
            warn!("wakeup carries bad index {:?} for {} objects", other, count);
            Err(WaitError::InternalError)
        }
    };
    match wakeup.reason {
        WakeupReason::Succeeded => Ok(WaitResult::ObjectSignaled(index()?)),
        WakeupReason::Abandoned => Ok(WaitResult::Abandoned(index()?)),
        WakeupReason::Timeout => Ok(WaitResult::Timeout),
        WakeupReason::Failed => Err(WaitError::InternalError),
    }
}

fn as_invalid_handle(err: WaitError) -> WaitError {
    match err {
        WaitError::WrongType => WaitError::InvalidHandle,
        other => other,
    }
}

fn report(result: Result<WaitResult>) -> WaitResult {
    match result {
        Ok(result) => result,
        Err(err) => {
            set_last_error(err.code());
            WaitResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::last_error::get_last_error;
    use kwait_common::error::code;

    #[test]
    fn test_handle_count_bounds() {
        let pal = Pal::default();
        assert_eq!(pal.wait_for_multiple_objects(&[], false, 0), WaitResult::Failed);
        assert_eq!(get_last_error(), code::ERROR_INVALID_PARAMETER);

        let h = pal.create_event(true, true).unwrap();
        let too_many = vec![h; MAX_WAIT_OBJECTS + 1];
        assert_eq!(pal.wait_for_multiple_objects(&too_many, false, 0), WaitResult::Failed);
        assert_eq!(get_last_error(), code::ERROR_INVALID_PARAMETER);
    }

    #[test]
    fn test_wait_any_reports_first_signaled() {
        let pal = Pal::default();
        let a = pal.create_event(true, false).unwrap();
        let b = pal.create_event(true, true).unwrap();
        let c = pal.create_event(true, true).unwrap();
        assert_eq!(
            pal.wait_for_multiple_objects(&[a, b, c], false, 0),
            WaitResult::ObjectSignaled(Some(1))
        );
    }

    #[test]
    fn test_wait_any_consumes_only_winner() {
        let pal = Pal::default();
        let a = pal.create_event(false, true).unwrap();
        let b = pal.create_event(false, true).unwrap();
        assert_eq!(
            pal.wait_for_multiple_objects(&[a, b], false, 0),
            WaitResult::ObjectSignaled(Some(0))
        );
        assert!(!pal.is_signaled(a).unwrap());
        assert!(pal.is_signaled(b).unwrap());
    }

    #[test]
    fn test_wait_all_fast_path_consumes_everything() {
        let pal = Pal::default();
        let event = pal.create_event(false, true).unwrap();
        let sem = pal.create_semaphore(1, 1).unwrap();
        let mutex = pal.create_mutex(false).unwrap();
        assert_eq!(
            pal.wait_for_multiple_objects(&[event, sem, mutex], true, 0),
            WaitResult::ObjectSignaled(None)
        );
        assert!(!pal.is_signaled(event).unwrap());
        assert!(!pal.is_signaled(sem).unwrap());
        assert!(!pal.is_signaled(mutex).unwrap());
        pal.release_mutex(mutex).unwrap();
    }

    #[test]
    fn test_wait_all_partial_does_not_consume() {
        let pal = Pal::default();
        let set = pal.create_event(false, true).unwrap();
        let unset = pal.create_event(false, false).unwrap();
        assert_eq!(
            pal.wait_for_multiple_objects(&[set, unset], true, 0),
            WaitResult::Timeout
        );
        assert!(pal.is_signaled(set).unwrap());
        assert_eq!(pal.waiter_count(set), Ok(0));
    }

    #[test]
    fn test_single_handle_wait_all_is_single_wait() {
        let pal = Pal::default();
        let h = pal.create_event(true, true).unwrap();
        assert_eq!(
            pal.wait_for_multiple_objects(&[h], true, 0),
            WaitResult::ObjectSignaled(Some(0))
        );
    }

    #[test]
    fn test_duplicates_allowed_for_wait_any() {
        let pal = Pal::default();
        let h = pal.create_event(true, true).unwrap();
        assert_eq!(
            pal.wait_for_multiple_objects(&[h, h], false, 0),
            WaitResult::ObjectSignaled(Some(0))
        );
        assert_eq!(pal.wait_for_multiple_objects(&[h, h], true, 0), WaitResult::Failed);
        assert_eq!(get_last_error(), code::ERROR_INVALID_PARAMETER);
    }

    #[test]
    fn test_timeout_withdraws_registrations() {
        let pal = Pal::default();
        let a = pal.create_event(true, false).unwrap();
        let b = pal.create_event(true, false).unwrap();
        assert_eq!(pal.wait_for_multiple_objects(&[a, b], false, 20), WaitResult::Timeout);
        assert_eq!(pal.waiter_count(a), Ok(0));
        assert_eq!(pal.waiter_count(b), Ok(0));
        assert_eq!(pal.ref_count(a), Ok(1));
    }

    #[test]
    fn test_recursive_mutex_wait() {
        let pal = Pal::default();
        let h = pal.create_mutex(true).unwrap();
        assert_eq!(pal.wait_for_single_object(h, 0), WaitResult::ObjectSignaled(Some(0)));
        pal.release_mutex(h).unwrap();
        assert!(!pal.is_signaled(h).unwrap());
        pal.release_mutex(h).unwrap();
        assert!(pal.is_signaled(h).unwrap());
    }

    #[test]
    fn test_signal_object_and_wait_rejects_unsignalable() {
        let pal = Pal::default();
        let process = pal.create_process_object().unwrap();
        let event = pal.create_event(true, true).unwrap();
        assert_eq!(pal.signal_object_and_wait(process, event, 0, false), WaitResult::Failed);
        assert_eq!(get_last_error(), code::ERROR_INVALID_HANDLE);
    }

    #[test]
    fn test_signal_object_and_wait_on_same_event() {
        let pal = Pal::default();
        let event = pal.create_event(false, false).unwrap();
        assert_eq!(
            pal.signal_object_and_wait(event, event, 0, false),
            WaitResult::ObjectSignaled(Some(0))
        );
        assert!(!pal.is_signaled(event).unwrap());
    }

    #[test]
    fn test_sleep() {
        let pal = Pal::default();
        pal.sleep(0);
        assert_eq!(pal.sleep_ex(1, false), WaitResult::Timeout);
        assert_eq!(pal.sleep_ex(1, true), WaitResult::Failed);
        assert_eq!(get_last_error(), code::ERROR_INTERNAL_ERROR);
    }

    #[test]
    fn test_map_wakeup() {
        let signaled = Wakeup {
            reason: WakeupReason::Succeeded,
            index: Some(2),
        };
        assert_eq!(
            map_wakeup(signaled, WaitKind::Any, 3),
            Ok(WaitResult::ObjectSignaled(Some(2)))
        );
        assert_eq!(
            map_wakeup(signaled, WaitKind::All, 3),
            Ok(WaitResult::ObjectSignaled(None))
        );
        assert_eq!(map_wakeup(signaled, WaitKind::Any, 2), Err(WaitError::InternalError));

        let failed = Wakeup {
            reason: WakeupReason::Failed,
            index: None,
        };
        assert_eq!(map_wakeup(failed, WaitKind::Single, 1), Err(WaitError::InternalError));
    }
}
