//! Integration tests for SmartQueue
//!
//! These tests drive the public API end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eyre::eyre;
use smartqueue::{
    Adjustment, Probes, QueueError, Scheduler, SchedulerConfig, TaskSpec, TaskStatus, WaitEstimate,
};
use tokio::sync::watch;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_single_task_settles_and_leaves_registry() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(1));
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    let handle = scheduler
        .submit(TaskSpec::new("test").run(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("done")
        }))
        .expect("submit should succeed");

    assert_eq!(handle.wait().await.unwrap(), "done");
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.metrics().completed, 1);
    assert!(scheduler.task("test").is_none());
}

#[tokio::test]
async fn test_burst_runs_most_urgent_first() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(1));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (id, urgency) in [("task1", 0.8), ("task2", 0.6), ("task3", 0.9)] {
        let order = order.clone();
        handles.push(
            scheduler
                .submit(TaskSpec::new(id).urgency(urgency).run(async move {
                    order.lock().unwrap().push(id);
                    Ok(())
                }))
                .unwrap(),
        );
    }

    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["task3", "task1", "task2"]);
    assert_eq!(scheduler.metrics().completed, 3);
}

#[tokio::test]
async fn test_failure_is_recorded_not_propagated() {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let handle = scheduler
        .submit(TaskSpec::<()>::new("flaky").run(async { Err(eyre!("upstream timeout")) }))
        .unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(err.to_string().contains("upstream timeout"));

    let metrics = scheduler.metrics();
    assert_eq!(metrics.completed, 0);
    assert_eq!(metrics.failed, 1);
    assert!(scheduler.value_of("flaky", 0.5) < 0.0);

    // scheduler keeps working afterwards
    let ok = scheduler.submit(TaskSpec::new("steady").run(async { Ok(5) })).unwrap();
    assert_eq!(ok.wait().await.unwrap(), 5);
}

#[tokio::test]
async fn test_learned_value_reused_by_same_id() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(1));

    for _ in 0..3 {
        let handle = scheduler.submit(TaskSpec::new("report").run(async { Ok(()) })).unwrap();
        handle.wait().await.unwrap();
    }

    // 0.1, then 0.19, then 0.271
    assert!((scheduler.value_of("report", 0.5) - 0.271).abs() < 1e-9);
    assert_eq!(scheduler.value_table_len(), 1);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_duplicate_submission_rejected() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(1));
    let (gate, rx) = watch::channel(false);

    let mut gate_rx = rx.clone();
    let first = scheduler
        .submit(TaskSpec::new("dup").run(async move {
            gate_rx.wait_for(|open| *open).await?;
            Ok(())
        }))
        .unwrap();

    let err = scheduler
        .submit(TaskSpec::new("dup").run(async { Ok(()) }))
        .unwrap_err();
    assert_eq!(err, QueueError::DuplicateId("dup".to_string()));

    gate.send_replace(true);
    first.wait().await.unwrap();
    assert_eq!(scheduler.metrics().completed, 1);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ceiling_holds_on_multi_thread_runtime() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(3));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..30 {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        handles.push(
            scheduler
                .submit(TaskSpec::new(format!("job-{}", i)).run(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap(),
        );
    }

    for handle in handles {
        handle.wait().await.unwrap();
    }
    scheduler.wait_idle().await;

    assert!(peak.load(Ordering::SeqCst) <= 3);
    let metrics = scheduler.metrics();
    assert_eq!(metrics.completed, 30);
    assert_eq!(metrics.queue_length, 0);
}

#[tokio::test]
async fn test_status_progresses_through_lifecycle() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(1));
    let (gate, rx) = watch::channel(false);

    let mut gate_rx = rx.clone();
    let mut handle = scheduler
        .submit(TaskSpec::new("life").run(async move {
            gate_rx.wait_for(|open| *open).await?;
            Ok(())
        }))
        .unwrap();
    assert_eq!(handle.status(), TaskStatus::Pending);

    wait_until(|| scheduler.running_count() == 1).await;
    assert_eq!(handle.status(), TaskStatus::Running);
    assert_eq!(scheduler.task("life").map(|t| t.status), Some(TaskStatus::Running));

    gate.send_replace(true);
    assert_eq!(handle.settled().await, TaskStatus::Completed);
}

// =============================================================================
// Probes and controller
// =============================================================================

#[tokio::test]
async fn test_misbehaving_probes_do_not_break_scheduling() {
    let probes = Probes::default()
        .with_resource_load(|| f64::NAN)
        .with_user_context(|| f64::NEG_INFINITY);
    let scheduler = Scheduler::with_probes(SchedulerConfig::default(), probes);

    let handle = scheduler.submit(TaskSpec::new("odd").run(async { Ok(()) })).unwrap();
    handle.wait().await.unwrap();
    assert_eq!(scheduler.metrics().completed, 1);
}

#[tokio::test]
async fn test_controller_at_cap_with_empty_queue() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(10));

    match scheduler.estimate_wait_time() {
        WaitEstimate::Millis(ms) => assert!(ms < 1_000.0),
        WaitEstimate::Overloaded => panic!("empty queue should not be overloaded"),
    }
    assert_eq!(scheduler.adjust_concurrency(), Adjustment::Unchanged(10));
    assert_eq!(scheduler.ceiling(), 10);
}

#[tokio::test]
async fn test_controller_shrinks_under_load() {
    let scheduler = Scheduler::new(SchedulerConfig::with_max_concurrency(4));
    let (gate, rx) = watch::channel(false);

    let mut handles = Vec::new();
    for i in 0..5 {
        let mut gate_rx = rx.clone();
        handles.push(
            scheduler
                .submit(TaskSpec::new(format!("load-{}", i)).run(async move {
                    gate_rx.wait_for(|open| *open).await?;
                    Ok(())
                }))
                .unwrap(),
        );
    }

    // five tracked tasks at ceiling 4 estimate above 5s
    assert!(scheduler.estimate_wait_time().as_millis() > 5_000.0);
    assert_eq!(scheduler.adjust_concurrency(), Adjustment::Decreased { from: 4, to: 3 });

    gate.send_replace(true);
    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_eq!(scheduler.metrics().completed, 5);
}
