//! End-to-end harness scenarios.

use async_trait::async_trait;
use faultline_core::config::WorkloadConfig;
use faultline_core::{
    run_fault_window, DeleteWorkload, FailurePolicy, FaultWindow, HarnessError, InMemoryStore,
    MemorySink, PoolConfig, ReadWorkload, ResultAggregator, ScriptedWorkload, SimulatedPodFailure,
    StopCondition, Task, TaskHandler, TaskPool, WorkloadDriver, WriteWorkload,
};
use faultline_types::{FailureKind, ObjectRef, Operation, Outcome, Payload, TaskId, WindowPhase};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

/// Sleeps, then succeeds unless the task is `fail_on`.
/// Signals `completed` after task `notify_after` finishes.
struct SleepHandler {
    delay: Duration,
    fail_on: Option<u64>,
    notify_after: Option<u64>,
    completed: Arc<Notify>,
}

impl SleepHandler {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_on: None,
            notify_after: None,
            completed: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn handle(&self, task: &Task) -> Outcome {
        tokio::time::sleep(self.delay).await;
        let outcome = if self.fail_on == Some(task.id.seq()) {
            Outcome::failure(FailureKind::Rejected, "injected failure")
        } else {
            Outcome::success("slept")
        };
        if self.notify_after == Some(task.id.seq()) {
            self.completed.notify_one();
        }
        outcome
    }
}

fn noops(n: u64) -> ScriptedWorkload {
    ScriptedWorkload::new((1..=n).map(|i| Operation::delete(ObjectRef::new("noop", i.to_string()))))
}

fn small_objects() -> WorkloadConfig {
    WorkloadConfig {
        buckets: 3,
        min_object_size: 16,
        max_object_size: 256,
        ..WorkloadConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_workers_run_twelve_tasks_in_three_rounds() {
    let window = FaultWindow::new();
    let aggregator = ResultAggregator::new(window.clone(), FailurePolicy::strict());

    let started = Instant::now();
    let handle = WorkloadDriver::new("noop", noops(12), Arc::new(InMemoryStore::new()), window)
        .with_pool(PoolConfig {
            workers: 4,
            queue_capacity: 0,
        })
        .with_handler(Arc::new(SleepHandler::new(Duration::from_millis(50))))
        .run_in_background(StopCondition::Exhausted, aggregator.sender());
    handle.join().await.unwrap();
    let elapsed = started.elapsed();

    let report = aggregator.await_report(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.pass_count(), 12);
    assert_eq!(report.fail_count(), 0);
    assert!(elapsed >= Duration::from_millis(150), "too fast: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "not parallel: {:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_inside_window_is_expected() {
    let window = FaultWindow::new();
    let aggregator = ResultAggregator::new(window.clone(), FailurePolicy::strict());

    let handler = SleepHandler {
        fail_on: Some(3),
        notify_after: Some(4),
        ..SleepHandler::new(Duration::from_millis(20))
    };
    let task_four_done = Arc::clone(&handler.completed);

    window.signal_open().unwrap();
    let handle = WorkloadDriver::new("b", noops(5), Arc::new(InMemoryStore::new()), window.clone())
        .with_pool(PoolConfig::with_workers(2))
        .with_handler(Arc::new(handler))
        .run_in_background(StopCondition::Exhausted, aggregator.sender());

    task_four_done.notified().await;
    window.signal_close().unwrap();
    handle.join().await.unwrap();

    let report = aggregator.await_report(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.total_submitted, 5);
    assert_eq!(report.fail_count(), 1);
    assert_eq!(report.expected_failure_count(), 1);
    assert_eq!(report.unexpected_failure_count(), 0);
    assert_eq!(report.expected_failures[0].task_id, TaskId::new(3));
    assert_eq!(report.expected_failures[0].phase_at_start, WindowPhase::Open);
}

#[tokio::test]
async fn second_shutdown_reports_usage_error() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let pool = TaskPool::start(
        "c",
        &PoolConfig::with_workers(2),
        Arc::new(SleepHandler::new(Duration::from_millis(1))),
        FaultWindow::new(),
        tx,
    )
    .unwrap();
    let store = Arc::new(InMemoryStore::new());
    for seq in 1..=3 {
        let op = Operation::delete(ObjectRef::new("c", seq.to_string()));
        pool.submit(Task::new(TaskId::new(seq), Arc::from("c"), op, store.clone()))
            .await
            .unwrap();
    }

    pool.shutdown().await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
        .await
        .expect("second shutdown must not hang");
    assert!(matches!(second, Err(HarnessError::PoolAlreadyShutDown { .. })));
}

#[tokio::test]
async fn failure_without_window_is_unexpected() {
    let window = FaultWindow::new();
    let aggregator = ResultAggregator::new(window.clone(), FailurePolicy::strict());

    let handler = SleepHandler {
        fail_on: Some(2),
        ..SleepHandler::new(Duration::ZERO)
    };
    WorkloadDriver::new("quiet", noops(3), Arc::new(InMemoryStore::new()), window)
        .with_handler(Arc::new(handler))
        .run_in_background(StopCondition::Exhausted, aggregator.sender())
        .join()
        .await
        .unwrap();

    let report = aggregator.await_report(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.unexpected_failure_count(), 1);
    assert!(!report.verdict(&FailurePolicy::strict()).passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simulated_pod_failure_has_no_phantom_failures() {
    let store = InMemoryStore::with_latency(Duration::from_millis(1));
    let client = Arc::new(store.clone());
    let window = FaultWindow::new();
    let sink = Arc::new(MemorySink::new());
    let policy = FailurePolicy::strict();

    // Preload before the scenario starts.
    let preload = WorkloadDriver::new(
        "preload",
        WriteWorkload::from_config(&small_objects(), 11).with_key_prefix("pre"),
        client.clone(),
        window.clone(),
    )
    .with_pool(PoolConfig::with_workers(8))
    .run(StopCondition::Count(40))
    .await
    .unwrap();
    assert_eq!(preload.pass_count(), 40);
    let written = preload.written_objects();
    let (to_read, to_delete) = written.split_at(20);

    let aggregator = ResultAggregator::new(window.clone(), policy.clone()).with_sink(sink.clone());
    let pool = PoolConfig {
        workers: 4,
        queue_capacity: 8,
    };
    let pace = Some(Duration::from_millis(1));

    let drivers = vec![
        WorkloadDriver::new("reads", ReadWorkload::new(to_read.to_vec()), client.clone(), window.clone())
            .with_pool(pool.clone())
            .with_pace(pace)
            .with_sink(sink.clone())
            .run_in_background(StopCondition::WindowClosed, aggregator.sender()),
        WorkloadDriver::new(
            "writes",
            WriteWorkload::from_config(&small_objects(), 12).with_key_prefix("bg"),
            client.clone(),
            window.clone(),
        )
        .with_pool(pool.clone())
        .with_pace(pace)
        .with_sink(sink.clone())
        .run_in_background(StopCondition::WindowClosed, aggregator.sender()),
        WorkloadDriver::new("deletes", DeleteWorkload::from_written(to_delete), client.clone(), window.clone())
            .with_pool(pool)
            .with_pace(Some(Duration::from_millis(5)))
            .with_sink(sink.clone())
            .run_in_background(StopCondition::WindowClosed, aggregator.sender()),
    ];

    tokio::time::sleep(Duration::from_millis(20)).await;
    let injector = SimulatedPodFailure::new(store.clone(), "data-pod-0", Duration::from_millis(60));
    let record = run_fault_window(&window, &injector, sink.as_ref()).await.unwrap();
    assert_eq!(record.component, "data-pod-0");

    for driver in drivers {
        driver.join().await.unwrap();
    }
    let report = aggregator.await_report(3, Duration::from_secs(10)).await.unwrap();

    assert_eq!(
        (report.pass_count() + report.fail_count()) as u64,
        report.total_submitted
    );
    assert!(report.expected_failure_count() > 0, "the disruption should fail some operations");
    assert_eq!(report.unexpected_failure_count(), 0);

    let bounds = report.window.unwrap();
    for result in report.passed.iter().chain(report.failures()) {
        if !result.overlaps(bounds.opened_at, bounds.closed_at) {
            assert!(result.is_success(), "phantom failure: {}", result);
        }
    }
    assert!(report.verdict(&policy).passed());
    assert_eq!(store.degraded_components(), vec!["data-pod-0".to_string()]);
}

#[tokio::test]
async fn corrupted_object_is_never_excused() {
    let store = InMemoryStore::new();
    let client = Arc::new(store.clone());
    let window = FaultWindow::new();

    let target = ObjectRef::new("bucket", "precious");
    let payload = Payload::new(64, 5);
    let preload = WorkloadDriver::new(
        "preload",
        ScriptedWorkload::new([Operation::write(target.clone(), payload)]),
        client.clone(),
        window.clone(),
    )
    .run(StopCondition::Exhausted)
    .await
    .unwrap();
    store.corrupt(&target);

    let aggregator = ResultAggregator::new(window.clone(), FailurePolicy::strict());
    window.signal_open().unwrap();
    WorkloadDriver::new("verify", ReadWorkload::new(preload.written_objects()), client, window.clone())
        .run_in_background(StopCondition::Count(3), aggregator.sender())
        .join()
        .await
        .unwrap();
    window.signal_close().unwrap();

    let report = aggregator.await_report(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(report.unexpected_failure_count(), 3);
    assert!(report
        .unexpected_failures
        .iter()
        .all(|r| r.outcome.failure_kind() == Some(FailureKind::Corruption)));
    let verdict = report.verdict(&FailurePolicy::strict());
    assert!(verdict.failures().any(|c| c.description == "No corrupted reads"));
}

#[tokio::test]
async fn report_timeout_when_driver_missing() {
    let aggregator = ResultAggregator::new(FaultWindow::new(), FailurePolicy::strict());
    let window = FaultWindow::new();
    WorkloadDriver::new("only", noops(2), Arc::new(InMemoryStore::new()), window)
        .run_in_background(StopCondition::Exhausted, aggregator.sender())
        .join()
        .await
        .unwrap();

    let err = aggregator
        .await_report(2, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::ReportTimeout {
            expected: 2,
            received: 1,
            ..
        }
    ));
}
