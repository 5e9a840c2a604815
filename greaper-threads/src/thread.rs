//!
//! Managed OS thread
//!
//! A [`Thread`] owns one OS thread spawned through the manager. The body
//! first parks on a start gate until the manager has registered it (and,
//! for suspended starts, until [`Thread::resume`]), so no thread can
//! finish before the registry knows about it.
//!
//! The entry synthesized for the process main thread has no join handle;
//! joining it is a no-op.
//!

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread as os;

use greaper_core::Event;
use greaper_sync::{Mutex, Signal};

use crate::manager::ThreadFinished;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Runtime-wide unique thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    pub(crate) fn next() -> Self {
        Self(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct GateState {
    registered: bool,
    resumed: bool,
}

/// Holds the thread body until registration completes and, for suspended
/// starts, until the thread is resumed.
struct StartGate {
    state: Mutex<GateState>,
    signal: Signal,
}

impl StartGate {
    fn new(start_suspended: bool) -> Self {
        Self {
            state: Mutex::new(GateState {
                registered: false,
                resumed: !start_suspended,
            }),
            signal: Signal::new(),
        }
    }

    fn open() -> Self {
        Self {
            state: Mutex::new(GateState {
                registered: true,
                resumed: true,
            }),
            signal: Signal::new(),
        }
    }

    fn wait_open(&self) {
        let _guard = self
            .signal
            .wait_while(self.state.lock(), |s| !(s.registered && s.resumed));
    }

    fn mark_registered(&self) {
        self.state.lock().registered = true;
        self.signal.notify_all();
    }

    fn resume(&self) {
        self.state.lock().resumed = true;
        self.signal.notify_all();
    }
}

pub(crate) struct ThreadShared {
    id: ThreadId,
    name: String,
    finished: AtomicBool,
    gate: StartGate,
    /// Destruction event of the owning manager. Re-targeted when the
    /// thread is adopted by a newly activated manager.
    finish_event: Mutex<Option<Event<ThreadFinished>>>,
}

impl ThreadShared {
    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn wait_start(&self) {
        self.gate.wait_open();
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_finish_event(&self, event: Event<ThreadFinished>) {
        *self.finish_event.lock() = Some(event);
    }

    /// Notify the owning manager that this thread's body has returned.
    pub(crate) fn emit_finished(&self) {
        let event = self.finish_event.lock().clone();
        if let Some(event) = event {
            event.emit(&ThreadFinished {
                id: self.id,
                name: self.name.clone(),
            });
        }
    }
}

/// A managed OS thread: handle, id, display name and join policy.
pub struct Thread {
    shared: Arc<ThreadShared>,
    join_at_destruction: bool,
    handle: Mutex<Option<os::JoinHandle<()>>>,
}

impl Thread {
    pub(crate) fn new_shared(name: String, start_suspended: bool) -> Arc<ThreadShared> {
        Arc::new(ThreadShared {
            id: ThreadId::next(),
            name,
            finished: AtomicBool::new(false),
            gate: StartGate::new(start_suspended),
            finish_event: Mutex::new(None),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<ThreadShared> {
        &self.shared
    }

    pub(crate) fn from_parts(
        shared: Arc<ThreadShared>,
        join_at_destruction: bool,
        handle: os::JoinHandle<()>,
    ) -> Self {
        Self {
            shared,
            join_at_destruction,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Entry representing the calling thread. Has no join handle and no
    /// join-at-destruction semantics of its own.
    pub(crate) fn main_thread() -> Self {
        Self {
            shared: Arc::new(ThreadShared {
                id: ThreadId::next(),
                name: "main".to_string(),
                finished: AtomicBool::new(false),
                gate: StartGate::open(),
                finish_event: Mutex::new(None),
            }),
            join_at_destruction: false,
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn mark_registered(&self) {
        self.shared.gate.mark_registered();
    }

    pub fn id(&self) -> ThreadId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    pub fn joins_at_destruction(&self) -> bool {
        self.join_at_destruction
    }

    /// Release a thread created with `start_suspended`.
    pub fn resume(&self) {
        self.shared.gate.resume();
    }

    /// Join without blocking: succeeds only once the thread has finished.
    pub fn try_join(&self) -> bool {
        if !self.is_finished() {
            return false;
        }
        self.join();
        true
    }

    /// Block until the OS thread exits. Returns immediately when the
    /// thread was already joined or has no handle (main-thread entry).
    /// A join attempted from the thread itself detaches instead of
    /// deadlocking.
    ///
    /// A suspended thread must be resumed first or the join never returns.
    pub fn join(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == os::current().id() {
            tracing::trace!(
                target: "greaper::threads",
                name = %self.name(),
                id = %self.id(),
                "self-join detached"
            );
            return;
        }
        if handle.join().is_err() {
            tracing::error!(
                target: "greaper::threads",
                name = %self.name(),
                id = %self.id(),
                "thread terminated by panic"
            );
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.join_at_destruction {
            self.join();
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("finished", &self.is_finished())
            .field("join_at_destruction", &self.join_at_destruction)
            .finish()
    }
}
