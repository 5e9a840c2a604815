//!
//! ThreadManager - the thread registry interface
//!
//! Single source of truth for what OS threads exist under the runtime.
//! Threads are registered under both name and id; lookups return weak
//! handles so the registry stays the owner. Finished threads are pruned
//! lazily by the manager's own destruction-event handler.
//!
//! ## Hot-swap hand-off
//!
//! On activation with a predecessor, the predecessor's entire registry is
//! drained into this instance and every adopted thread's destruction event
//! is re-targeted, so in-flight threads are never orphaned by a manager
//! swap. On first-ever activation the manager synthesizes an entry for the
//! calling ("main") thread instead.
//!

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread as os;

use greaper_core::{Error, Event, Interface, InterfaceKind, Result, Subscription};
use greaper_sync::{Mutex, RwMutex};
use indexmap::IndexMap;

use crate::config::ThreadConfig;
use crate::thread::{Thread, ThreadId};

/// Fired after a thread is spawned and registered.
#[derive(Clone)]
pub struct ThreadCreated {
    pub thread: Arc<Thread>,
}

/// Fired from the thread's own body right after its closure returns.
#[derive(Debug, Clone)]
pub struct ThreadFinished {
    pub id: ThreadId,
    pub name: String,
}

/// Slots are emptied, never compacted, so indices held by the name and id
/// maps stay stable while readers iterate under the lock.
#[derive(Default)]
struct Registry {
    slots: Vec<Option<Arc<Thread>>>,
    by_name: IndexMap<String, usize>,
    by_id: HashMap<ThreadId, usize>,
}

enum PruneOutcome {
    ById { name_mismatch: bool },
    ByNameFallback,
    Missing,
}

impl Registry {
    fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn insert(&mut self, thread: Arc<Thread>) -> Result<()> {
        if self.contains_name(thread.name()) {
            return Err(Error::AlreadyRegistered {
                name: thread.name().to_string(),
            });
        }

        let name = thread.name().to_string();
        let id = thread.id();
        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(thread);
                free
            }
            None => {
                self.slots.push(Some(thread));
                self.slots.len() - 1
            }
        };
        self.by_name.insert(name, index);
        self.by_id.insert(id, index);
        Ok(())
    }

    fn get_by_name(&self, name: &str) -> Option<&Arc<Thread>> {
        let index = *self.by_name.get(name)?;
        self.slots.get(index)?.as_ref()
    }

    fn get_by_id(&self, id: ThreadId) -> Option<&Arc<Thread>> {
        let index = *self.by_id.get(&id)?;
        self.slots.get(index)?.as_ref()
    }

    fn prune(&mut self, finished: &ThreadFinished) -> PruneOutcome {
        if let Some(index) = self.by_id.remove(&finished.id) {
            self.slots[index] = None;
            let name_mismatch = match self.by_name.get(&finished.name) {
                Some(&mapped) if mapped == index => {
                    self.by_name.shift_remove(&finished.name);
                    false
                }
                _ => {
                    // Maps point at different slots; drop whichever name
                    // entry references the freed slot.
                    self.by_name.retain(|_, &mut mapped| mapped != index);
                    true
                }
            };
            return PruneOutcome::ById { name_mismatch };
        }

        if let Some(index) = self.by_name.shift_remove(&finished.name) {
            self.slots[index] = None;
            self.by_id.retain(|_, &mut mapped| mapped != index);
            return PruneOutcome::ByNameFallback;
        }

        PruneOutcome::Missing
    }

    fn drain(&mut self) -> Vec<Arc<Thread>> {
        self.by_name.clear();
        self.by_id.clear();
        self.slots.drain(..).flatten().collect()
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

struct ManagerInner {
    name: String,
    registry: RwMutex<Registry>,
    on_thread_created: Event<ThreadCreated>,
    on_thread_finished: Event<ThreadFinished>,
    prune_sub: Mutex<Option<Subscription>>,
    active: AtomicBool,
}

/// The thread registry interface. Clones share one instance.
#[derive(Clone)]
pub struct ThreadManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning handle to a [`ThreadManager`], used by dependents that must
/// not keep a deactivated manager alive.
#[derive(Clone)]
pub struct WeakThreadManager {
    inner: Weak<ManagerInner>,
}

impl WeakThreadManager {
    pub fn upgrade(&self) -> Option<ThreadManager> {
        self.inner.upgrade().map(|inner| ThreadManager { inner })
    }
}

impl Default for WeakThreadManager {
    fn default() -> Self {
        Self { inner: Weak::new() }
    }
}

impl ThreadManager {
    /// Create an inactive manager. It must be activated through a
    /// [`greaper_core::Runtime`] before threads can be created.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                name: name.into(),
                registry: RwMutex::new(Registry::default()),
                on_thread_created: Event::new(),
                on_thread_finished: Event::new(),
                prune_sub: Mutex::new(None),
                active: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn downgrade(&self) -> WeakThreadManager {
        WeakThreadManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same manager instance.
    pub fn same_instance(&self, other: &ThreadManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "thread manager '{}' is not active",
                self.inner.name
            )))
        }
    }

    /// Spawn a new managed thread and register it under name and id.
    ///
    /// The spawned body blocks until registration completes (and, for
    /// `start_suspended`, until [`Thread::resume`]), so the registry always
    /// knows the thread before its closure runs.
    pub fn create_thread(&self, config: ThreadConfig) -> Result<Arc<Thread>> {
        self.ensure_active()?;
        let ThreadConfig { options, work } = config;
        if options.name.is_empty() {
            return Err(Error::invalid_state("thread name must not be empty"));
        }

        let shared = Thread::new_shared(options.name.clone(), options.start_suspended);
        shared.set_finish_event(self.inner.on_thread_finished.clone());
        let body = Arc::clone(&shared);

        let mut builder = os::Builder::new().name(options.name.clone());
        if options.stack_size > 0 {
            builder = builder.stack_size(options.stack_size);
        }

        // The write lock is held across the spawn so the duplicate check
        // and the insert are one atomic step. The new body cannot touch
        // the registry; it is parked on its start gate.
        let mut registry = self.inner.registry.write();
        if registry.contains_name(&options.name) {
            return Err(Error::AlreadyRegistered { name: options.name });
        }

        let handle = builder.spawn(move || {
            body.wait_start();
            work();
            body.mark_finished();
            tracing::trace!(
                target: "greaper::threads",
                id = %body.id(),
                name = body.name(),
                "thread finished"
            );
            body.emit_finished();
        })?;

        let thread = Arc::new(Thread::from_parts(
            shared,
            options.join_at_destruction,
            handle,
        ));
        registry.insert(Arc::clone(&thread))?;
        drop(registry);

        thread.mark_registered();
        tracing::debug!(
            target: "greaper::threads",
            manager = self.inner.name,
            id = %thread.id(),
            name = thread.name(),
            suspended = options.start_suspended,
            "thread created"
        );
        self.inner.on_thread_created.emit(&ThreadCreated {
            thread: Arc::clone(&thread),
        });
        Ok(thread)
    }

    /// Look up a live thread by display name.
    pub fn get_thread(&self, name: &str) -> Result<Weak<Thread>> {
        self.ensure_active()?;
        let registry = self.inner.registry.read();
        let Some(thread) = registry.get_by_name(name) else {
            return Err(Error::not_found("thread", name));
        };
        if thread.is_finished() {
            return Err(Error::invalid_state(format!(
                "thread '{name}' has already finished"
            )));
        }
        Ok(Arc::downgrade(thread))
    }

    /// Look up a live thread by id.
    pub fn get_thread_by_id(&self, id: ThreadId) -> Result<Weak<Thread>> {
        self.ensure_active()?;
        let registry = self.inner.registry.read();
        let Some(thread) = registry.get_by_id(id) else {
            return Err(Error::not_found("thread", id.to_string()));
        };
        if thread.is_finished() {
            return Err(Error::invalid_state(format!(
                "thread {id} has already finished"
            )));
        }
        Ok(Arc::downgrade(thread))
    }

    /// Visit every registered thread under the registry's read lock.
    ///
    /// The callback must not re-enter the registry; calling
    /// `create_thread` from inside it deadlocks.
    pub fn access_threads(&self, mut visit: impl FnMut(&Arc<Thread>)) {
        let registry = self.inner.registry.read();
        for slot in registry.slots.iter().flatten() {
            visit(slot);
        }
    }

    pub fn thread_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Subscribable stream of thread creations.
    pub fn on_thread_created(&self) -> &Event<ThreadCreated> {
        &self.inner.on_thread_created
    }

    /// Subscribable stream of thread destructions.
    pub fn on_thread_finished(&self) -> &Event<ThreadFinished> {
        &self.inner.on_thread_finished
    }
}

fn prune_finished(inner: &Arc<ManagerInner>, finished: &ThreadFinished) {
    let outcome = inner.registry.write().prune(finished);
    match outcome {
        PruneOutcome::ById { name_mismatch: false } => {
            tracing::trace!(
                target: "greaper::threads",
                manager = inner.name,
                id = %finished.id,
                "pruned finished thread"
            );
        }
        PruneOutcome::ById { name_mismatch: true } => {
            tracing::warn!(
                target: "greaper::threads",
                manager = inner.name,
                id = %finished.id,
                name = finished.name,
                "registry inconsistency: id and name maps pointed at different slots"
            );
        }
        PruneOutcome::ByNameFallback => {
            tracing::warn!(
                target: "greaper::threads",
                manager = inner.name,
                id = %finished.id,
                name = finished.name,
                "registry inconsistency: finished thread found by name only"
            );
        }
        PruneOutcome::Missing => {
            tracing::trace!(
                target: "greaper::threads",
                manager = inner.name,
                id = %finished.id,
                "finished thread was not registered here"
            );
        }
    }
}

impl Interface for ThreadManager {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> InterfaceKind {
        InterfaceKind::ThreadManager
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn on_activation(&self, previous: Option<Arc<dyn Interface>>) {
        let predecessor = previous
            .as_ref()
            .and_then(|p| p.as_any().downcast_ref::<ThreadManager>())
            .cloned();

        if let Some(prev) = predecessor {
            let adopted = prev.inner.registry.write().drain();
            let count = adopted.len();
            let mut registry = self.inner.registry.write();
            for thread in adopted {
                thread
                    .shared()
                    .set_finish_event(self.inner.on_thread_finished.clone());
                if let Err(err) = registry.insert(thread) {
                    tracing::warn!(
                        target: "greaper::threads",
                        manager = self.inner.name,
                        %err,
                        "dropped entry while adopting predecessor registry"
                    );
                }
            }
            tracing::debug!(
                target: "greaper::threads",
                manager = self.inner.name,
                predecessor = prev.inner.name,
                count,
                "adopted predecessor registry"
            );
        } else {
            let main = Arc::new(Thread::main_thread());
            if let Err(err) = self.inner.registry.write().insert(main) {
                tracing::warn!(
                    target: "greaper::threads",
                    manager = self.inner.name,
                    %err,
                    "could not synthesize main-thread entry"
                );
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let sub = self.inner.on_thread_finished.subscribe(move |finished| {
            if let Some(inner) = weak.upgrade() {
                prune_finished(&inner, finished);
            }
        });
        *self.inner.prune_sub.lock() = Some(sub);
        self.inner.active.store(true, Ordering::SeqCst);
    }

    fn on_deactivation(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        *self.inner.prune_sub.lock() = None;
        // Ownership of the threads has already moved to the successor, or
        // the process is shutting down. The registry is emptied under the
        // lock but the handles are dropped outside it: a dropped handle
        // with join-at-destruction blocks, and its finish notification
        // needs the same lock.
        let orphans = self.inner.registry.write().drain();
        drop(orphans);
    }
}

impl fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadManager")
            .field("name", &self.inner.name)
            .field("active", &self.is_active())
            .field("threads", &self.thread_count())
            .finish()
    }
}
