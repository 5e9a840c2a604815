//!
//! RwMutex for greaper
//!
//! A reader-writer lock: any number of concurrent shared (read) holders,
//! or one exclusive (write) holder. Shared acquisition maps to `read`,
//! exclusive acquisition to `write`, each returning an RAII guard.
//!
//! A [`Signal`](crate::Signal) cannot be paired with this lock. Condition
//! variables on the shared mode of a reader-writer lock are not portable
//! across OS threading APIs, so the pairing is made inexpressible: a
//! signal only accepts a [`MutexGuard`](crate::MutexGuard).
//!

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{self, TryLockError};

use crate::fatal;

pub struct RwMutex<T, const ENABLED: bool = true> {
    inner: sync::RwLock<T>,
}

/// Shared-acquisition token for [`RwMutex`]. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RwReadGuard<'a, T, const ENABLED: bool = true> {
    inner: sync::RwLockReadGuard<'a, T>,
}

/// Exclusive-acquisition token for [`RwMutex`]. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RwWriteGuard<'a, T, const ENABLED: bool = true> {
    inner: sync::RwLockWriteGuard<'a, T>,
}

impl<T, const ENABLED: bool> RwMutex<T, ENABLED> {
    pub fn new(value: T) -> Self {
        Self {
            inner: sync::RwLock::new(value),
        }
    }

    /// Whether this primitive actually synchronizes.
    pub const fn is_enabled(&self) -> bool {
        ENABLED
    }

    /// Acquire the lock in shared mode, blocking while a writer holds it.
    pub fn read(&self) -> RwReadGuard<'_, T, ENABLED> {
        let inner = if ENABLED {
            match self.inner.read() {
                Ok(guard) => guard,
                Err(_) => fatal("shared lock of a poisoned rwmutex"),
            }
        } else {
            match self.inner.try_read() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => fatal("disabled rwmutex contended"),
                Err(TryLockError::Poisoned(_)) => fatal("shared lock of a poisoned rwmutex"),
            }
        };
        RwReadGuard { inner }
    }

    /// Acquire the lock exclusively, blocking until no other holder remains.
    pub fn write(&self) -> RwWriteGuard<'_, T, ENABLED> {
        let inner = if ENABLED {
            match self.inner.write() {
                Ok(guard) => guard,
                Err(_) => fatal("exclusive lock of a poisoned rwmutex"),
            }
        } else {
            match self.inner.try_write() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => fatal("disabled rwmutex contended"),
                Err(TryLockError::Poisoned(_)) => fatal("exclusive lock of a poisoned rwmutex"),
            }
        };
        RwWriteGuard { inner }
    }

    /// Shared acquisition without blocking.
    pub fn try_read(&self) -> Option<RwReadGuard<'_, T, ENABLED>> {
        match self.inner.try_read() {
            Ok(guard) => Some(RwReadGuard { inner: guard }),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => fatal("try_read of a poisoned rwmutex"),
        }
    }

    /// Exclusive acquisition without blocking.
    pub fn try_write(&self) -> Option<RwWriteGuard<'_, T, ENABLED>> {
        match self.inner.try_write() {
            Ok(guard) => Some(RwWriteGuard { inner: guard }),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(_)) => fatal("try_write of a poisoned rwmutex"),
        }
    }
}

impl<T: Default, const ENABLED: bool> Default for RwMutex<T, ENABLED> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug, const ENABLED: bool> fmt::Debug for RwMutex<T, ENABLED> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwMutex")
            .field("enabled", &ENABLED)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T, const ENABLED: bool> Deref for RwReadGuard<'_, T, ENABLED> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T, const ENABLED: bool> Deref for RwWriteGuard<'_, T, ENABLED> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T, const ENABLED: bool> DerefMut for RwWriteGuard<'_, T, ENABLED> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
