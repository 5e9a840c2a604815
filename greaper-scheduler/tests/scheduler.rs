//!
//! End-to-end scheduler behavior: FIFO ordering, exactly-once execution,
//! completion waiting, live resizing and shutdown, all through the public
//! API with a real thread manager underneath.
//!

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use greaper_core::Runtime;
use greaper_scheduler::{MpmcTaskScheduler, TaskSpec, TaskState};
use greaper_threads::ThreadManager;

fn fixture(name: &str, workers: usize, growth: bool) -> (Runtime, ThreadManager, MpmcTaskScheduler) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let runtime = Runtime::new();
    let manager = ThreadManager::new(format!("{name}-tm"));
    runtime.activate(Arc::new(manager.clone()));
    let scheduler = MpmcTaskScheduler::new(&runtime, &manager, name, workers, growth).unwrap();
    (runtime, manager, scheduler)
}

#[test]
fn test_single_worker_preserves_fifo_order() {
    let (_rt, _tm, scheduler) = fixture("fifo", 1, false);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..20 {
        let order = Arc::clone(&order);
        scheduler
            .add_task(format!("task-{i}"), move || {
                order.lock().unwrap().push(i);
            })
            .unwrap();
    }

    scheduler.wait_until_all_finished();
    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
}

#[test]
fn test_every_task_runs_exactly_once() {
    let (_rt, _tm, scheduler) = fixture("once", 2, false);
    let runs = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let runs = Arc::clone(&runs);
            scheduler
                .add_task(format!("task-{i}"), move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        })
        .collect();

    scheduler.wait_until_all_finished();
    assert_eq!(runs.load(Ordering::SeqCst), 100);
    for handle in &handles {
        assert!(handle.is_finished());
    }
}

#[test]
fn test_batch_submission_is_contiguous() {
    let (_rt, _tm, scheduler) = fixture("batch", 1, false);
    let order = Arc::new(Mutex::new(Vec::new()));

    let batch: Vec<TaskSpec> = (0..10)
        .map(|i| {
            let order = Arc::clone(&order);
            TaskSpec::new(format!("batch-{i}"), move || {
                order.lock().unwrap().push(i);
            })
        })
        .collect();

    let handles = scheduler.add_tasks(batch).unwrap();
    assert_eq!(handles.len(), 10);

    scheduler.wait_until_all_finished();
    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_wait_until_all_covers_in_progress_tasks() {
    let (_rt, _tm, scheduler) = fixture("quiesce", 2, false);
    let finished = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let finished = Arc::clone(&finished);
        scheduler
            .add_task("slow", move || {
                thread::sleep(Duration::from_millis(20));
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    // Quiescence means empty queue AND no task mid-execution.
    scheduler.wait_until_all_finished();
    assert_eq!(finished.load(Ordering::SeqCst), 4);
    assert_eq!(scheduler.queued_tasks(), 0);
}

#[test]
fn test_waiting_is_idempotent() {
    let (_rt, _tm, scheduler) = fixture("idem", 1, false);

    let handle = scheduler.add_task("one", || {}).unwrap();
    scheduler.wait_until_task_finished(&handle);
    // Repeat waits on a finished task return immediately.
    scheduler.wait_until_task_finished(&handle);
    scheduler.wait_until_task_finished(&handle);
    assert!(handle.is_finished());

    scheduler.wait_until_all_finished();
    scheduler.wait_until_all_finished();
}

#[test]
fn test_concurrent_producers_and_waiters() {
    let (_rt, _tm, scheduler) = fixture("mpmc", 3, false);
    let scheduler = Arc::new(scheduler);
    let runs = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let scheduler = Arc::clone(&scheduler);
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                for i in 0..25 {
                    let runs = Arc::clone(&runs);
                    let handle = scheduler
                        .add_task(format!("p{p}-t{i}"), move || {
                            runs.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    scheduler.wait_until_task_finished(&handle);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 100);
}

#[test]
fn test_zero_workers_stalls_until_revived() {
    let (_rt, _tm, scheduler) = fixture("revive", 1, false);

    scheduler.set_worker_count(0).unwrap();
    assert_eq!(scheduler.worker_count(), 0);

    let ran = Arc::new(AtomicUsize::new(0));
    let handle = {
        let ran = Arc::clone(&ran);
        scheduler
            .add_task("parked", move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };

    // With no workers the task sits in the queue untouched.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(handle.state(), Some(TaskState::Inactive));
    assert_eq!(scheduler.queued_tasks(), 1);

    scheduler.set_worker_count(1).unwrap();
    scheduler.wait_until_task_finished(&handle);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shrink_joins_excess_workers() {
    let (_rt, manager, scheduler) = fixture("shrink", 4, false);
    assert_eq!(scheduler.worker_count(), 4);

    scheduler.set_worker_count(1).unwrap();
    assert_eq!(scheduler.worker_count(), 1);

    // The surviving worker still drains the queue.
    let runs = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let runs = Arc::clone(&runs);
        scheduler
            .add_task("after-shrink", move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    scheduler.wait_until_all_finished();
    assert_eq!(runs.load(Ordering::SeqCst), 8);

    // Joined workers eventually disappear from the registry; the main
    // thread and the surviving worker remain.
    assert!(manager.get_thread("shrink-worker-0").is_ok());
}

#[test]
fn test_task_submitting_during_shrink_does_not_deadlock() {
    let (_rt, _tm, scheduler) = fixture("reshrink", 1, true);
    let scheduler = Arc::new(scheduler);

    let shrinking = Arc::new(AtomicUsize::new(0));
    let resubmitter = {
        let inner_scheduler = Arc::clone(&scheduler);
        let shrinking = Arc::clone(&shrinking);
        scheduler
            .add_task("resubmitter", move || {
                while shrinking.load(Ordering::SeqCst) == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
                // Overlap the growth check with the concurrent resize.
                thread::sleep(Duration::from_millis(5));
                let _ = inner_scheduler.add_task("follow-up", || {});
            })
            .unwrap()
    };

    while resubmitter.state() != Some(TaskState::InProgress) {
        thread::sleep(Duration::from_millis(1));
    }

    // The resize joins the worker while its closure is submitting; that
    // submission re-enters the growth check, so the join must happen
    // with the worker-list lock released.
    shrinking.store(1, Ordering::SeqCst);
    scheduler.set_worker_count(0).unwrap();
    assert!(resubmitter.is_finished());
}

#[test]
fn test_growth_under_load() {
    let (_rt, _tm, scheduler) = fixture("growth", 1, true);
    assert!(scheduler.growth_enabled());

    let gate = Arc::new(AtomicUsize::new(0));
    let blocker = {
        let gate = Arc::clone(&gate);
        scheduler
            .add_task("blocker", move || {
                while gate.load(Ordering::SeqCst) == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap()
    };

    // Wait until the only worker is busy with the blocker.
    while blocker.state() != Some(TaskState::InProgress) {
        thread::sleep(Duration::from_millis(1));
    }

    // One queued task matches the pool size, so no growth yet.
    scheduler.add_task("filler", || {}).unwrap();
    assert_eq!(scheduler.worker_count(), 1);

    // Submission with no idle worker and a deeper-than-pool queue adds
    // exactly one worker, which drains the new task despite the blocker.
    let ran = Arc::new(AtomicUsize::new(0));
    let extra = {
        let ran = Arc::clone(&ran);
        scheduler
            .add_task("extra", move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };
    assert_eq!(scheduler.worker_count(), 2);

    scheduler.wait_until_task_finished(&extra);
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    gate.store(1, Ordering::SeqCst);
    scheduler.wait_until_task_finished(&blocker);
}

#[test]
fn test_growth_disabled_never_resizes() {
    let (_rt, _tm, scheduler) = fixture("nogrowth", 1, false);
    assert!(!scheduler.growth_enabled());

    for i in 0..10 {
        scheduler.add_task(format!("t{i}"), || {}).unwrap();
    }
    assert_eq!(scheduler.worker_count(), 1);
    scheduler.wait_until_all_finished();
    assert_eq!(scheduler.worker_count(), 1);
}

#[test]
fn test_stop_discards_pending_work() {
    let (_rt, _tm, scheduler) = fixture("halt", 1, false);

    let gate = Arc::new(AtomicUsize::new(0));
    let running = {
        let gate = Arc::clone(&gate);
        scheduler
            .add_task("running", move || {
                while gate.load(Ordering::SeqCst) == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap()
    };
    while running.state() != Some(TaskState::InProgress) {
        thread::sleep(Duration::from_millis(1));
    }

    let ran = Arc::new(AtomicUsize::new(0));
    let queued = {
        let ran = Arc::clone(&ran);
        scheduler
            .add_task("queued", move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
    };

    // Stop waits for the in-flight task but discards the queued one.
    gate.store(1, Ordering::SeqCst);
    scheduler.stop();

    assert!(running.is_finished());
    assert!(queued.is_expired());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.queued_tasks(), 0);
}

#[test]
fn test_drop_stops_scheduler() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let runtime = Runtime::new();
    let manager = ThreadManager::new("drop-tm");
    runtime.activate(Arc::new(manager.clone()));

    let handle = {
        let scheduler =
            MpmcTaskScheduler::new(&runtime, &manager, "dropped", 1, false).unwrap();
        let handle = scheduler.add_task("work", || {}).unwrap();
        scheduler.wait_until_task_finished(&handle);
        handle
    };

    // Scheduler gone: handles report expired, waits would return at once.
    assert!(handle.is_expired());
    assert!(handle.is_finished());
    assert_eq!(handle.state(), None);
}
