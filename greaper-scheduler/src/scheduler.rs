//!
//! MpmcTaskScheduler
//!
//! A pool of worker threads draining one shared FIFO task queue. Producers
//! enqueue under the queue lock and signal a waiting worker; workers pop
//! the head, run the closure, and signal completion. Callers block on the
//! completion signal, re-checking their predicate on every wake.
//!
//! Three resources carry their own locks on purpose, so submission,
//! resizing and recycling do not serialize each other: the task queue,
//! the worker-slot list, and the task pool. A worker running a closure
//! that itself submits work re-enters the growth check and takes the
//! worker-list lock, so exiting workers are never joined while that lock
//! is held: the resize and stop paths collect their join targets under
//! the lock and join after releasing it.
//!
//! ## Growth policy
//!
//! With growth enabled, an enqueue that finds no idle worker while the
//! queue (including the new task) is deeper than the pool grows the pool
//! by exactly one worker. Shrinking only ever happens through
//! `set_worker_count`.
//!

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use greaper_core::{ActivationChange, Error, Interface, Result, Runtime, Subscription};
use greaper_sync::{Mutex, RwMutex, Signal};
use greaper_threads::{Thread, ThreadConfig, ThreadManager, WeakThreadManager};
use smallvec::SmallVec;

use crate::task::{Task, TaskHandle, TaskState, Work};

/// A named closure awaiting submission via [`MpmcTaskScheduler::add_tasks`].
pub struct TaskSpec {
    name: String,
    work: Work,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            work: Box::new(work),
        }
    }
}

struct TaskQueue {
    deque: VecDeque<Arc<Task>>,
    stopping: bool,
    in_progress: usize,
    idle_workers: usize,
}

struct WorkerSlot {
    thread: Weak<Thread>,
    /// Per-worker exit request. Shrinking sets this for the drained
    /// slots; a concurrent growth can then never resurrect an exiting
    /// worker the way a shared target count would.
    stop: Arc<AtomicBool>,
}

/// Task-object ownership outside the queue. `free` objects are ready for
/// reuse; `retired` ones are completed but still observed by a handle,
/// and move to `free` when that handle drops.
#[derive(Default)]
struct TaskPool {
    free: Vec<Arc<Task>>,
    retired: Vec<Arc<Task>>,
}

pub(crate) struct SchedulerCore {
    name: String,
    queue: Mutex<TaskQueue>,
    /// Wakes workers when tasks arrive or the pool shrinks or stops.
    work_signal: Signal,
    /// Wakes completion waiters; broadcast after every task finishes.
    done_signal: Signal,
    workers: RwMutex<Vec<WorkerSlot>>,
    /// Monotonic ordinal for worker names, never reused so a spawned
    /// replacement cannot collide with a predecessor still winding down.
    next_worker: AtomicUsize,
    pool: Mutex<TaskPool>,
    allow_growth: AtomicBool,
    manager: RwMutex<WeakThreadManager>,
}

impl SchedulerCore {
    fn obtain_task(&self, name: String, work: Work) -> Arc<Task> {
        let pooled = self.pool.lock().free.pop();
        let task = match pooled {
            Some(task) => {
                task.reset(name, work);
                task
            }
            None => Arc::new(Task::new(name, work)),
        };
        // Exactly one handle per submission; counted before the task is
        // visible to any worker.
        task.attach_handle();
        task
    }

    /// Worker-side hand-back after the closure ran. Unreferenced tasks go
    /// straight to the free list; a task some handle still observes is
    /// retired until that handle drops. The handle count is read under
    /// the pool lock, the same lock handle drops mutate it under.
    fn recycle_after_run(&self, task: Arc<Task>) {
        let mut pool = self.pool.lock();
        if task.handle_count() == 0 {
            task.bump_epoch();
            pool.free.push(task);
        } else {
            pool.retired.push(task);
        }
    }

    /// Handle-drop bookkeeping: the last handle of a retired task returns
    /// the object to the free list.
    pub(crate) fn release_handle(&self, task: Arc<Task>, epoch: u64) {
        let mut pool = self.pool.lock();
        if task.epoch() != epoch {
            return;
        }
        task.detach_handle();
        if task.state() != TaskState::Completed || task.handle_count() != 0 {
            return;
        }
        if let Some(pos) = pool.retired.iter().position(|t| Arc::ptr_eq(t, &task)) {
            let retired = pool.retired.swap_remove(pos);
            retired.bump_epoch();
            pool.free.push(retired);
        }
    }

    fn add_task_boxed(self: &Arc<Self>, name: String, work: Work) -> Result<TaskHandle> {
        let task = self.obtain_task(name, work);
        let handle = TaskHandle::new(Arc::downgrade(&task), task.epoch(), Arc::downgrade(self));

        let (no_idle, depth) = {
            let mut queue = self.queue.lock();
            if queue.stopping {
                return Err(Error::invalid_state(format!(
                    "scheduler '{}' is stopping",
                    self.name
                )));
            }
            queue.deque.push_back(task);
            (queue.idle_workers == 0, queue.deque.len())
        };

        self.work_signal.notify_one();
        self.maybe_grow(no_idle, depth);
        Ok(handle)
    }

    fn add_tasks_boxed(self: &Arc<Self>, batch: Vec<TaskSpec>) -> Result<Vec<TaskHandle>> {
        let mut tasks: SmallVec<[Arc<Task>; 8]> = SmallVec::with_capacity(batch.len());
        let mut handles = Vec::with_capacity(batch.len());
        for spec in batch {
            let task = self.obtain_task(spec.name, spec.work);
            handles.push(TaskHandle::new(
                Arc::downgrade(&task),
                task.epoch(),
                Arc::downgrade(self),
            ));
            tasks.push(task);
        }

        // One lock acquisition for the whole batch keeps it contiguous in
        // the global FIFO order.
        let (no_idle, depth, count) = {
            let mut queue = self.queue.lock();
            if queue.stopping {
                return Err(Error::invalid_state(format!(
                    "scheduler '{}' is stopping",
                    self.name
                )));
            }
            let count = tasks.len();
            queue.deque.extend(tasks);
            (queue.idle_workers == 0, queue.deque.len(), count)
        };

        if count == 1 {
            self.work_signal.notify_one();
        } else if count > 1 {
            self.work_signal.notify_all();
        }
        self.maybe_grow(no_idle, depth);
        Ok(handles)
    }

    fn maybe_grow(self: &Arc<Self>, no_idle: bool, depth: usize) {
        if !no_idle || !self.allow_growth.load(Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.write();
        if depth <= workers.len() {
            return;
        }
        // A stop that raced the enqueue must not spawn an untracked
        // worker after the slot list was drained.
        if self.queue.lock().stopping {
            return;
        }
        match spawn_worker(self) {
            Ok(slot) => {
                workers.push(slot);
                tracing::debug!(
                    target: "greaper::scheduler",
                    scheduler = self.name,
                    workers = workers.len(),
                    "pool grown under load"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "greaper::scheduler",
                    scheduler = self.name,
                    %err,
                    "could not grow worker pool"
                );
            }
        }
    }

    fn stop(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.stopping {
                return;
            }
            queue.stopping = true;
        }
        self.work_signal.notify_all();

        // Joining happens with the worker-list lock released: a worker
        // finishing a submitting closure may need it in the growth check.
        let exiting: Vec<WorkerSlot> = self.workers.write().drain(..).collect();
        for slot in exiting {
            if let Some(thread) = slot.thread.upgrade() {
                thread.join();
            }
        }

        let discarded: Vec<Arc<Task>> = {
            let mut queue = self.queue.lock();
            queue.deque.drain(..).collect()
        };
        if !discarded.is_empty() {
            tracing::warn!(
                target: "greaper::scheduler",
                scheduler = self.name,
                count = discarded.len(),
                "discarding queued tasks on stop"
            );
            for task in &discarded {
                // Expire outstanding handles; the work never runs.
                task.bump_epoch();
            }
        }
        self.done_signal.notify_all();

        tracing::debug!(
            target: "greaper::scheduler",
            scheduler = self.name,
            "scheduler stopped"
        );
    }
}

fn spawn_worker(core: &Arc<SchedulerCore>) -> Result<WorkerSlot> {
    let manager = core
        .manager
        .read()
        .upgrade()
        .ok_or_else(|| Error::invalid_state("no active thread manager to spawn workers"))?;

    let ordinal = core.next_worker.fetch_add(1, Ordering::SeqCst);
    let stop = Arc::new(AtomicBool::new(false));
    let loop_core = Arc::clone(core);
    let loop_stop = Arc::clone(&stop);
    let thread = manager.create_thread(ThreadConfig::new(
        format!("{}-worker-{}", core.name, ordinal),
        move || worker_loop(loop_core, loop_stop),
    ))?;
    Ok(WorkerSlot {
        thread: Arc::downgrade(&thread),
        stop,
    })
}

fn worker_loop(core: Arc<SchedulerCore>, stop: Arc<AtomicBool>) {
    loop {
        let task = {
            let mut queue = core.queue.lock();
            loop {
                if queue.stopping || stop.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(task) = queue.deque.pop_front() {
                    queue.in_progress += 1;
                    break task;
                }
                queue.idle_workers += 1;
                queue = core.work_signal.wait(queue);
                queue.idle_workers -= 1;
            }
        };

        task.set_state(TaskState::InProgress);
        if let Some(work) = task.take_work() {
            // A failing closure is the closure's bug, but it must not take
            // the worker down or leave waiters hanging.
            if catch_unwind(AssertUnwindSafe(work)).is_err() {
                tracing::error!(
                    target: "greaper::scheduler",
                    scheduler = core.name,
                    task = task.name(),
                    "task closure panicked"
                );
            }
        }
        task.set_state(TaskState::Completed);

        {
            let mut queue = core.queue.lock();
            queue.in_progress -= 1;
        }
        core.done_signal.notify_all();
        core.recycle_after_run(task);
    }
}

fn rehome(core: &Arc<SchedulerCore>, change: &ActivationChange) {
    if change.active {
        if let Some(manager) = change
            .new
            .as_ref()
            .and_then(|i| i.as_any().downcast_ref::<ThreadManager>())
        {
            *core.manager.write() = manager.downgrade();
            tracing::debug!(
                target: "greaper::scheduler",
                scheduler = core.name,
                manager = manager.name(),
                "re-homed to newly active thread manager"
            );
        }
    } else if change.new.is_none()
        && let Some(old) = change
            .old
            .as_ref()
            .and_then(|i| i.as_any().downcast_ref::<ThreadManager>())
    {
        let is_ours = core
            .manager
            .read()
            .upgrade()
            .is_some_and(|current| current.same_instance(old));
        if is_ours {
            *core.manager.write() = WeakThreadManager::default();
            tracing::debug!(
                target: "greaper::scheduler",
                scheduler = core.name,
                "active thread manager deactivated without successor"
            );
        }
    }
}

/// Multi-producer/multi-consumer worker pool over one FIFO task queue.
///
/// Destroying the scheduler stops it: workers are joined after their
/// current task and tasks still queued are discarded without executing.
pub struct MpmcTaskScheduler {
    core: Arc<SchedulerCore>,
    _activation_sub: Subscription,
}

impl MpmcTaskScheduler {
    /// Create a scheduler with `worker_count` workers spawned through the
    /// active `manager`. The scheduler follows `runtime`'s activation
    /// events so a hot-swapped manager takes over worker spawning.
    pub fn new(
        runtime: &Runtime,
        manager: &ThreadManager,
        name: impl Into<String>,
        worker_count: usize,
        allow_growth: bool,
    ) -> Result<Self> {
        let core = Arc::new(SchedulerCore {
            name: name.into(),
            queue: Mutex::new(TaskQueue {
                deque: VecDeque::new(),
                stopping: false,
                in_progress: 0,
                idle_workers: 0,
            }),
            work_signal: Signal::new(),
            done_signal: Signal::new(),
            workers: RwMutex::new(Vec::new()),
            next_worker: AtomicUsize::new(0),
            pool: Mutex::new(TaskPool::default()),
            allow_growth: AtomicBool::new(allow_growth),
            manager: RwMutex::new(manager.downgrade()),
        });

        let weak = Arc::downgrade(&core);
        let sub = runtime.on_activation().subscribe(move |change| {
            if let Some(core) = weak.upgrade() {
                rehome(&core, change);
            }
        });

        let scheduler = Self {
            core,
            _activation_sub: sub,
        };
        scheduler.set_worker_count(worker_count)?;

        tracing::debug!(
            target: "greaper::scheduler",
            scheduler = scheduler.core.name,
            workers = worker_count,
            allow_growth,
            "scheduler created"
        );
        Ok(scheduler)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn worker_count(&self) -> usize {
        self.core.workers.read().len()
    }

    pub fn queued_tasks(&self) -> usize {
        self.core.queue.lock().deque.len()
    }

    pub fn growth_enabled(&self) -> bool {
        self.core.allow_growth.load(Ordering::SeqCst)
    }

    /// Toggle autonomous pool growth on submission under load.
    pub fn enable_growth(&self, allow: bool) {
        self.core.allow_growth.store(allow, Ordering::SeqCst);
    }

    /// Submit one closure; returns a weak handle for completion waiting.
    ///
    /// Tasks are dequeued in the exact order their enqueue completed; no
    /// priorities, no per-worker affinity.
    pub fn add_task(
        &self,
        name: impl Into<String>,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<TaskHandle> {
        self.core.add_task_boxed(name.into(), Box::new(work))
    }

    /// Submit a whole batch under one queue-lock acquisition, preserving
    /// the single-enqueue FIFO guarantee across the batch.
    pub fn add_tasks(&self, batch: Vec<TaskSpec>) -> Result<Vec<TaskHandle>> {
        self.core.add_tasks_boxed(batch)
    }

    /// Block until the referenced task completes. Returns immediately for
    /// an already-completed or expired handle. Never busy-waits.
    pub fn wait_until_task_finished(&self, handle: &TaskHandle) {
        if handle.is_finished() {
            return;
        }
        let mut queue = self.core.queue.lock();
        while !handle.is_finished() {
            queue = self.core.done_signal.wait(queue);
        }
    }

    /// Block until the queue is empty and no worker is mid-task. The
    /// conjunction matters: a dequeued-but-running task is still awaited.
    pub fn wait_until_all_finished(&self) {
        let mut queue = self.core.queue.lock();
        while !(queue.deque.is_empty() && queue.in_progress == 0) {
            queue = self.core.done_signal.wait(queue);
        }
    }

    /// Resize the pool. Growth spawns workers through the active manager;
    /// shrinking marks the excess workers to stop after their current
    /// task and joins them. Workers are never force-killed.
    pub fn set_worker_count(&self, count: usize) -> Result<()> {
        let mut exiting = Vec::new();
        {
            let mut workers = self.core.workers.write();
            let current = workers.len();

            if count >= current {
                for _ in current..count {
                    let slot = spawn_worker(&self.core)?;
                    workers.push(slot);
                }
            } else {
                // Mark first, then wake everyone; the marked workers exit
                // their loop even if the pool grows again concurrently.
                for slot in workers.drain(count..) {
                    slot.stop.store(true, Ordering::SeqCst);
                    exiting.push(slot);
                }
                self.core.work_signal.notify_all();
            }

            tracing::debug!(
                target: "greaper::scheduler",
                scheduler = self.core.name,
                from = current,
                to = count,
                "worker count changed"
            );
        }

        // Join with the worker-list lock released: an exiting worker may
        // be inside the growth check waiting for that lock.
        for slot in exiting {
            if let Some(thread) = slot.thread.upgrade() {
                thread.join();
            }
        }
        Ok(())
    }

    /// Stop the scheduler: wake and join every worker, then discard any
    /// still-queued tasks without executing them. Also runs on drop.
    pub fn stop(&self) {
        self.core.stop();
    }
}

impl Drop for MpmcTaskScheduler {
    fn drop(&mut self) {
        self.core.stop();
    }
}

impl fmt::Debug for MpmcTaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcTaskScheduler")
            .field("name", &self.core.name)
            .field("workers", &self.worker_count())
            .field("queued", &self.queued_tasks())
            .field("growth", &self.growth_enabled())
            .finish()
    }
}
