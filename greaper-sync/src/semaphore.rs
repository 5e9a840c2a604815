//!
//! Semaphore for greaper
//!
//! A counting semaphore bounded by a fixed maximum established at
//! construction. `wait` takes a permit (blocking while none remain),
//! `try_wait` takes one without blocking, `notify` returns one. Returning
//! more permits than the maximum indicates unbalanced wait/notify calls
//! and aborts.
//!
//! Composed from [`Mutex`] and [`Signal`], so the permit count inherits
//! their enabledness: a disabled semaphore is a no-op.
//!

use crate::fatal;
use crate::mutex::Mutex;
use crate::signal::Signal;

pub struct Semaphore<const ENABLED: bool = true> {
    permits: Mutex<usize, ENABLED>,
    available: Signal<ENABLED>,
    max: usize,
}

impl<const ENABLED: bool> Semaphore<ENABLED> {
    /// Create a semaphore with `max` permits, all initially available.
    pub fn new(max: usize) -> Self {
        Self {
            permits: Mutex::new(max),
            available: Signal::new(),
            max,
        }
    }

    /// Whether this primitive actually synchronizes.
    pub const fn is_enabled(&self) -> bool {
        ENABLED
    }

    pub fn max_count(&self) -> usize {
        self.max
    }

    /// Take a permit, blocking until one is available.
    pub fn wait(&self) {
        if !ENABLED {
            return;
        }
        let mut permits = self
            .available
            .wait_while(self.permits.lock(), |count| *count == 0);
        *permits -= 1;
    }

    /// Take a permit without blocking. Returns `false` if none remain.
    pub fn try_wait(&self) -> bool {
        if !ENABLED {
            return true;
        }
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Return a permit, waking one waiter.
    pub fn notify(&self) {
        if !ENABLED {
            return;
        }
        {
            let mut permits = self.permits.lock();
            if *permits == self.max {
                fatal("semaphore notified past its maximum count");
            }
            *permits += 1;
        }
        self.available.notify_one();
    }
}

impl<const ENABLED: bool> std::fmt::Debug for Semaphore<ENABLED> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("enabled", &ENABLED)
            .field("max", &self.max)
            .finish()
    }
}
