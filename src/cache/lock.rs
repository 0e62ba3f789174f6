use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::warn;

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                hint = "entries may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                hint = "entries may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

/// Waits on `condvar` while `blocked` holds.
///
/// With `timeout` set, returns the guard together with `true` when the wait
/// gave up before `blocked` turned false.
pub(crate) fn condvar_wait_while<'a, T, F>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Option<Duration>,
    target: &'static str,
    mut blocked: F,
) -> (MutexGuard<'a, T>, bool)
where
    F: FnMut(&mut T) -> bool,
{
    match timeout {
        Some(timeout) => match condvar.wait_timeout_while(guard, timeout, &mut blocked) {
            Ok((guard, result)) => (guard, result.timed_out()),
            Err(poisoned) => {
                warn_poisoned_wait(target);
                let (guard, result) = poisoned.into_inner();
                (guard, result.timed_out())
            }
        },
        None => match condvar.wait_while(guard, &mut blocked) {
            Ok(guard) => (guard, false),
            Err(poisoned) => {
                warn_poisoned_wait(target);
                (poisoned.into_inner(), false)
            }
        },
    }
}

fn warn_poisoned_wait(target: &'static str) {
    warn!(
        op = "wait",
        target_module = target,
        lock_kind = "condvar.wait",
        result = "poisoned_recovered",
        hint = "latch holder panicked while signalling",
        "Recovered from poisoned cache lock"
    );
}
