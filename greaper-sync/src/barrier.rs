//!
//! Barrier for greaper
//!
//! Makes N callers rendezvous: each call to `sync()` blocks until all N
//! have arrived, then releases everyone and resets for the next round.
//! A generation counter distinguishes successive rounds so a fast thread
//! re-entering the barrier cannot race the release of the previous one.
//!
//! Composed from [`Mutex`] and [`Signal`], so the arrival state inherits
//! their enabledness: a disabled barrier never blocks.
//!

use crate::fatal;
use crate::mutex::Mutex;
use crate::signal::Signal;

struct BarrierState {
    arrived: usize,
    generation: u64,
}

pub struct Barrier<const ENABLED: bool = true> {
    state: Mutex<BarrierState, ENABLED>,
    released: Signal<ENABLED>,
    total: usize,
}

impl<const ENABLED: bool> Barrier<ENABLED> {
    /// Create a barrier for `total` participants. `total` of zero is a
    /// programming error.
    pub fn new(total: usize) -> Self {
        if total == 0 {
            fatal("barrier created with zero participants");
        }
        Self {
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            released: Signal::new(),
            total,
        }
    }

    /// Whether this primitive actually synchronizes.
    pub const fn is_enabled(&self) -> bool {
        ENABLED
    }

    pub fn participants(&self) -> usize {
        self.total
    }

    /// Block until all participants have arrived, then release everyone.
    /// Returns `true` for exactly one caller per round, the last arrival.
    pub fn sync(&self) -> bool {
        if !ENABLED {
            return true;
        }
        let mut state = self.state.lock();
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.total {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            drop(state);
            self.released.notify_all();
            return true;
        }

        let _state = self
            .released
            .wait_while(state, |s| s.generation == generation);
        false
    }
}

impl<const ENABLED: bool> std::fmt::Debug for Barrier<ENABLED> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("enabled", &ENABLED)
            .field("total", &self.total)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_rendezvous() {
        let barrier = Arc::new(Barrier::<true>::new(4));
        let before = Arc::new(AtomicUsize::new(0));
        let leaders = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let before = Arc::clone(&before);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    before.fetch_add(1, Ordering::SeqCst);
                    if barrier.sync() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                    // Everyone arrived before anyone was released.
                    assert_eq!(before.load(Ordering::SeqCst), 4);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reusable_across_generations() {
        let barrier = Arc::new(Barrier::<true>::new(2));
        let rounds = 50;

        let partner = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                for _ in 0..rounds {
                    barrier.sync();
                }
            })
        };

        for _ in 0..rounds {
            barrier.sync();
        }
        partner.join().unwrap();
    }

    #[test]
    fn test_disabled_barrier_never_blocks() {
        let barrier: Barrier<false> = Barrier::new(8);
        assert!(!barrier.is_enabled());
        assert!(barrier.sync());
        assert!(barrier.sync());
    }
}
