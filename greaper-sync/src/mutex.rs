//!
//! Mutex for greaper
//!
//! A mutual-exclusion primitive protecting a value of type `T`. Acquiring
//! returns a [`MutexGuard`] token whose destruction releases the lock on
//! every exit path.
//!
//! The `ENABLED = false` variant never blocks: in a single-threaded build
//! acquisition always succeeds immediately, and observed contention is a
//! contract violation that aborts via [`fatal`](crate::fatal).
//!

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{self, TryLockError};

use crate::fatal;

pub struct Mutex<T, const ENABLED: bool = true> {
    inner: sync::Mutex<T>,
}

/// Scoped-acquisition token for [`Mutex`]. Releases the lock on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct MutexGuard<'a, T, const ENABLED: bool = true> {
    pub(crate) inner: sync::MutexGuard<'a, T>,
}

impl<T, const ENABLED: bool> Mutex<T, ENABLED> {
    pub fn new(value: T) -> Self {
        Self {
            inner: sync::Mutex::new(value),
        }
    }

    /// Whether this primitive actually synchronizes.
    pub const fn is_enabled(&self) -> bool {
        ENABLED
    }

    /// Acquire the lock, blocking until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T, ENABLED> {
        let inner = if ENABLED {
            match self.inner.lock() {
                Ok(guard) => guard,
                Err(_) => fatal("lock of a poisoned mutex"),
            }
        } else {
            match self.inner.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => fatal("disabled mutex contended"),
                Err(TryLockError::Poisoned(_)) => fatal("lock of a poisoned mutex"),
            }
        };
        MutexGuard { inner }
    }

    /// Acquire the lock if it is free, returning `None` otherwise.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, ENABLED>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(MutexGuard { inner: guard }),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => fatal("try_lock of a poisoned mutex"),
        }
    }

    /// Consume the mutex and return the protected value.
    pub fn into_inner(self) -> T {
        match self.inner.into_inner() {
            Ok(value) => value,
            Err(_) => fatal("into_inner of a poisoned mutex"),
        }
    }
}

impl<T: Default, const ENABLED: bool> Default for Mutex<T, ENABLED> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug, const ENABLED: bool> fmt::Debug for Mutex<T, ENABLED> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("enabled", &ENABLED)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T, const ENABLED: bool> Deref for MutexGuard<'_, T, ENABLED> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T, const ENABLED: bool> DerefMut for MutexGuard<'_, T, ENABLED> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
