//!
//! greaper-scheduler - MPMC Task Scheduler
//!
//! Executes caller-submitted closures on a pool of OS worker threads with
//! FIFO fairness and explicit completion signalling:
//!
//! - [`MpmcTaskScheduler`] owns the worker pool and the shared task queue
//! - [`TaskHandle`] is a weak, non-owning reference used to wait for one
//!   task's completion
//! - [`TaskState`] tracks the monotonic Inactive → InProgress → Completed
//!   lifecycle of each queued task
//!
//! Workers are spawned through the active [`ThreadManager`] and the
//! scheduler re-homes itself when that manager is hot-swapped. Submitted
//! tasks are drawn from a free-object pool and recycled once completed
//! and unreferenced.
//!
//! [`ThreadManager`]: greaper_threads::ThreadManager
//!

pub mod scheduler;
pub mod task;

pub use scheduler::*;
pub use task::*;
