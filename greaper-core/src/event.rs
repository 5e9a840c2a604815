//!
//! Observer events for greaper
//!
//! An `Event<T>` is a clonable, shared stream of `T` notifications.
//! `subscribe` registers a handler and returns a [`Subscription`] that
//! unsubscribes when dropped, tying handler lifetime to the subscriber
//! instead of manual connect/disconnect bookkeeping.
//!
//! `emit` snapshots the handler list under the lock and invokes handlers
//! outside it, so a handler may subscribe, unsubscribe or emit again
//! without deadlocking. Handlers run on the emitting thread.
//!

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use greaper_sync::Mutex;
use smallvec::SmallVec;

type HandlerFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registered<T> {
    token: u64,
    handler: HandlerFn<T>,
}

struct EventInner<T> {
    handlers: Mutex<Vec<Registered<T>>>,
    next_token: AtomicU64,
}

pub struct Event<T> {
    inner: Arc<EventInner<T>>,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                handlers: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for every future `emit`. Dropping the returned
    /// [`Subscription`] unregisters it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: 'static,
    {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.lock().push(Registered {
            token,
            handler: Arc::new(handler),
        });

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.handlers.lock().retain(|r| r.token != token);
                }
            })),
        }
    }

    /// Deliver `value` to every currently registered handler.
    pub fn emit(&self, value: &T) {
        let snapshot: SmallVec<[HandlerFn<T>; 4]> = self
            .inner
            .handlers
            .lock()
            .iter()
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in snapshot {
            handler(value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// RAII registration token returned by [`Event::subscribe`].
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Keep the handler registered for the lifetime of the event.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}
