//!
//! Signal for greaper
//!
//! A condition variable bound to a [`Mutex`](crate::Mutex) at each call
//! site: waiting consumes the guard, re-acquires the lock on wakeup and
//! hands the guard back. Spurious wakeups are possible, so callers either
//! use the predicate variants or re-check their condition in a loop.
//!
//! A signal only accepts exclusive mutex guards of matching enabledness;
//! pairing with the shared mode of an [`RwMutex`](crate::RwMutex) does not
//! type-check.
//!

use std::sync;
use std::time::Duration;

use crate::fatal;
use crate::mutex::MutexGuard;

pub struct Signal<const ENABLED: bool = true> {
    cv: sync::Condvar,
}

impl<const ENABLED: bool> Signal<ENABLED> {
    pub fn new() -> Self {
        Self {
            cv: sync::Condvar::new(),
        }
    }

    /// Whether this primitive actually synchronizes.
    pub const fn is_enabled(&self) -> bool {
        ENABLED
    }

    /// Release the lock, block until notified, re-acquire and return the guard.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T, ENABLED>) -> MutexGuard<'a, T, ENABLED> {
        if !ENABLED {
            return guard;
        }
        match self.cv.wait(guard.inner) {
            Ok(inner) => MutexGuard { inner },
            Err(_) => fatal("wait on a poisoned mutex"),
        }
    }

    /// Wait while `pred` returns `true`, re-checking on every wakeup.
    pub fn wait_while<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T, ENABLED>,
        pred: F,
    ) -> MutexGuard<'a, T, ENABLED>
    where
        F: FnMut(&mut T) -> bool,
    {
        if !ENABLED {
            return guard;
        }
        match self.cv.wait_while(guard.inner, pred) {
            Ok(inner) => MutexGuard { inner },
            Err(_) => fatal("wait on a poisoned mutex"),
        }
    }

    /// Wait until notified or `timeout` elapses. The boolean is `true` when
    /// the wait timed out.
    pub fn wait_for<'a, T>(
        &self,
        guard: MutexGuard<'a, T, ENABLED>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T, ENABLED>, bool) {
        if !ENABLED {
            return (guard, false);
        }
        match self.cv.wait_timeout(guard.inner, timeout) {
            Ok((inner, result)) => (MutexGuard { inner }, result.timed_out()),
            Err(_) => fatal("wait on a poisoned mutex"),
        }
    }

    /// Wait while `pred` returns `true`, up to `timeout`. The boolean is
    /// `true` when the wait ended by timeout with the predicate still held.
    pub fn wait_for_while<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T, ENABLED>,
        timeout: Duration,
        pred: F,
    ) -> (MutexGuard<'a, T, ENABLED>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        if !ENABLED {
            return (guard, false);
        }
        match self.cv.wait_timeout_while(guard.inner, timeout, pred) {
            Ok((inner, result)) => (MutexGuard { inner }, result.timed_out()),
            Err(_) => fatal("wait on a poisoned mutex"),
        }
    }

    /// Wake one waiter.
    pub fn notify_one(&self) {
        if ENABLED {
            self.cv.notify_one();
        }
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        if ENABLED {
            self.cv.notify_all();
        }
    }
}

impl<const ENABLED: bool> Default for Signal<ENABLED> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ENABLED: bool> std::fmt::Debug for Signal<ENABLED> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("enabled", &ENABLED).finish()
    }
}
