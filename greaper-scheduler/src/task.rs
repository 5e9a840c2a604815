//!
//! Tasks and task handles
//!
//! A [`Task`] is a named unit of queued work. Task objects are pooled:
//! once completed and unreferenced they return to the scheduler's free
//! list and are reset for the next submission. An epoch counter, bumped at
//! every recycle, lets outstanding [`TaskHandle`]s detect that "their"
//! task object now belongs to someone else.
//!

use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::Weak;

use greaper_sync::Mutex;

use crate::scheduler::SchedulerCore;

pub(crate) type Work = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of one queued task. Transitions are monotonic per queue
/// incarnation: Inactive → InProgress → Completed, never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Inactive = 0,
    InProgress = 1,
    Completed = 2,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Inactive,
            1 => Self::InProgress,
            _ => Self::Completed,
        }
    }
}

struct TaskBody {
    name: String,
    work: Option<Work>,
}

pub(crate) struct Task {
    state: AtomicU8,
    epoch: AtomicU64,
    /// Live [`TaskHandle`]s observing this incarnation. Mutated only
    /// under the scheduler's pool lock so recycling decisions are
    /// consistent with handle drops.
    handles: AtomicUsize,
    body: Mutex<TaskBody>,
}

impl Task {
    pub(crate) fn new(name: String, work: Work) -> Self {
        Self {
            state: AtomicU8::new(TaskState::Inactive as u8),
            epoch: AtomicU64::new(0),
            handles: AtomicUsize::new(0),
            body: Mutex::new(TaskBody {
                name,
                work: Some(work),
            }),
        }
    }

    /// Rearm a pooled task object for a new submission.
    pub(crate) fn reset(&self, name: String, work: Work) {
        let mut body = self.body.lock();
        body.name = name;
        body.work = Some(work);
        self.state.store(TaskState::Inactive as u8, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate every handle created for the current incarnation.
    pub(crate) fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn attach_handle(&self) {
        self.handles.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn detach_handle(&self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    pub(crate) fn take_work(&self) -> Option<Work> {
        self.body.lock().work.take()
    }

    pub(crate) fn name(&self) -> String {
        self.body.lock().name.clone()
    }
}

/// Weak reference to a submitted task plus its owning scheduler.
///
/// A handle never extends a task's lifetime. It expires when the task
/// object was recycled (the task completed and was handed back), or when
/// the scheduler was destroyed. Dropping the last handle of a completed
/// task returns the task object to the free pool.
pub struct TaskHandle {
    task: Weak<Task>,
    epoch: u64,
    scheduler: Weak<SchedulerCore>,
}

impl TaskHandle {
    pub(crate) fn new(task: Weak<Task>, epoch: u64, scheduler: Weak<SchedulerCore>) -> Self {
        Self {
            task,
            epoch,
            scheduler,
        }
    }

    /// Whether the referenced task no longer exists for this handle.
    pub fn is_expired(&self) -> bool {
        if self.scheduler.strong_count() == 0 {
            return true;
        }
        match self.task.upgrade() {
            Some(task) => task.epoch() != self.epoch,
            None => true,
        }
    }

    /// Current state of the task, or `None` once the handle expired.
    pub fn state(&self) -> Option<TaskState> {
        if self.scheduler.strong_count() == 0 {
            return None;
        }
        let task = self.task.upgrade()?;
        if task.epoch() != self.epoch {
            return None;
        }
        Some(task.state())
    }

    /// Terminal check used by the wait operations: completed or expired.
    pub fn is_finished(&self) -> bool {
        match self.state() {
            Some(state) => state == TaskState::Completed,
            None => true,
        }
    }

    /// Display name of the task, while the handle is live.
    pub fn name(&self) -> Option<String> {
        if self.is_expired() {
            return None;
        }
        self.task.upgrade().map(|task| task.name())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        // The last handle of a completed task performs the recycle the
        // worker skipped while this handle was outstanding.
        if let (Some(scheduler), Some(task)) = (self.scheduler.upgrade(), self.task.upgrade()) {
            scheduler.release_handle(task, self.epoch);
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("state", &self.state())
            .field("expired", &self.is_expired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let task = Task::new("t".to_string(), Box::new(|| {}));
        assert_eq!(task.state(), TaskState::Inactive);
        task.set_state(TaskState::InProgress);
        assert_eq!(task.state(), TaskState::InProgress);
        task.set_state(TaskState::Completed);
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[test]
    fn test_take_work_runs_once() {
        let task = Task::new("once".to_string(), Box::new(|| {}));
        assert!(task.take_work().is_some());
        assert!(task.take_work().is_none());
    }

    #[test]
    fn test_reset_rearms_pooled_task() {
        let task = Task::new("a".to_string(), Box::new(|| {}));
        task.set_state(TaskState::Completed);
        task.take_work();
        task.bump_epoch();

        task.reset("b".to_string(), Box::new(|| {}));
        assert_eq!(task.state(), TaskState::Inactive);
        assert_eq!(task.name(), "b");
        assert!(task.take_work().is_some());
    }

    #[test]
    fn test_handle_bookkeeping() {
        let task = Task::new("h".to_string(), Box::new(|| {}));
        assert_eq!(task.handle_count(), 0);
        task.attach_handle();
        assert_eq!(task.handle_count(), 1);
        task.detach_handle();
        assert_eq!(task.handle_count(), 0);
    }

    #[test]
    fn test_handle_without_scheduler_is_expired() {
        let handle = TaskHandle::new(Weak::new(), 0, Weak::new());
        assert!(handle.is_expired());
        assert!(handle.is_finished());
        assert_eq!(handle.state(), None);
        assert_eq!(handle.name(), None);
    }
}
