//! Run a simulated degraded-mode scenario.
//!
//! Objects are written first. Background streams then read them back,
//! write new ones and delete some while a simulated pod is deleted inside
//! the fault window. The streams stop once the window closes.

use anyhow::{Context, Result};
use faultline_core::{
    run_fault_window, DeleteWorkload, DriverHandle, FailurePolicy, FaultInjector, FaultWindow,
    HarnessConfig, HarnessEvent, InMemoryStore, JsonLinesSink, ReadWorkload, ReportSink,
    ResultAggregator, ScenarioRecord, SimulatedPodFailure, StopCondition, TracingSink,
    WorkloadDriver, WriteWorkload,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Options for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Scenario name.
    pub name: String,
    /// Component the simulated pod failure deletes.
    pub component: String,
    /// Objects written before the scenario starts.
    pub preload: u64,
    /// Optional JSON-lines event log.
    pub json_log: Option<PathBuf>,
}

/// Run the scenario. Returns whether every check passed.
pub async fn run(config: &HarnessConfig, options: &RunOptions) -> Result<bool> {
    let started = SystemTime::now();
    let json = match &options.json_log {
        Some(path) => Some(Arc::new(JsonLinesSink::create(path).with_context(|| {
            format!("Failed to open event log {}", path.display())
        })?)),
        None => None,
    };
    let sink: Arc<dyn ReportSink> = match &json {
        Some(json) => json.clone(),
        None => Arc::new(TracingSink),
    };
    sink.emit(&HarnessEvent::ScenarioStarted {
        scenario: options.name.clone(),
    });

    let store = InMemoryStore::new();
    let client = Arc::new(store.clone());
    let window = FaultWindow::new();
    let policy = FailurePolicy::from(&config.policy);

    // Preload
    let preload = WorkloadDriver::new(
        "preload",
        WriteWorkload::from_config(&config.workload, 1).with_key_prefix("pre"),
        client.clone(),
        window.clone(),
    )
    .with_pool(config.pool.clone())
    .with_sink(sink.clone())
    .run(StopCondition::Count(options.preload))
    .await
    .context("Preload failed")?;
    if preload.fail_count() > 0 {
        anyhow::bail!(
            "{} of {} preload writes failed before any fault",
            preload.fail_count(),
            preload.submitted
        );
    }
    let written = preload.written_objects();
    let (to_read, to_delete) = written.split_at(written.len() / 2);

    // Background workload
    let aggregator =
        ResultAggregator::new(window.clone(), policy.clone()).with_sink(sink.clone());
    let pace = config.workload.pace();
    let background = |stream: &str, driver: WorkloadDriver| -> DriverHandle {
        tracing::debug!("Starting background stream {}", stream);
        driver
            .with_pool(config.pool.clone())
            .with_pace(pace)
            .with_sink(sink.clone())
            .run_in_background(StopCondition::WindowClosed, aggregator.sender())
    };
    let drivers = vec![
        background(
            "reads",
            WorkloadDriver::new(
                "reads",
                ReadWorkload::new(to_read.to_vec()),
                client.clone(),
                window.clone(),
            ),
        ),
        background(
            "writes",
            WorkloadDriver::new(
                "writes",
                WriteWorkload::from_config(&config.workload, 2).with_key_prefix("bg"),
                client.clone(),
                window.clone(),
            ),
        ),
        background(
            "deletes",
            WorkloadDriver::new(
                "deletes",
                DeleteWorkload::from_written(to_delete),
                client.clone(),
                window.clone(),
            ),
        ),
    ];
    let stream_count = drivers.len();

    // Fault
    tokio::time::sleep(Duration::from_millis(config.fault.start_after_ms)).await;
    let injector = SimulatedPodFailure::new(
        store.clone(),
        &options.component,
        Duration::from_millis(config.fault.transition_ms),
    );
    let fault = run_fault_window(&window, &injector, sink.as_ref()).await;

    for driver in drivers {
        let stream = driver.stream().to_string();
        driver
            .join()
            .await
            .with_context(|| format!("Background stream {} failed", stream))?;
    }
    let report = aggregator
        .await_report(stream_count, config.report.timeout())
        .await
        .context("Failed to collect reports")?;

    let record = fault.context("Fault injection failed")?;
    injector
        .restore(&record)
        .await
        .with_context(|| format!("Failed to restore {}", record.component))?;
    sink.emit(&HarnessEvent::FaultRestored {
        component: record.component.clone(),
    });

    // Verdict
    let verdict = report.verdict(&policy);
    let failed_checks: Vec<String> = verdict.failures().map(|c| c.to_string()).collect();
    let summary = ScenarioRecord::new(&options.name, started, &report, failed_checks);

    println!("=== faultline run: {} ===", options.name);
    println!();
    println!("Submitted:           {}", report.total_submitted);
    println!("Passed:              {}", report.pass_count());
    println!("Expected failures:   {}", report.expected_failure_count());
    println!("Unexpected failures: {}", report.unexpected_failure_count());
    for tally in &report.phases {
        println!(
            "  {:<10} {} passed, {} failed",
            tally.phase.to_string(),
            tally.passed,
            tally.failed
        );
    }
    println!();
    for check in &verdict.checks {
        println!("{}", check);
    }
    println!();
    println!("Run id: {}", summary.scenario_id);
    println!("Result: {}", if summary.passed { "PASSED" } else { "FAILED" });

    if let Some(json) = &json {
        json.write_line(&summary)
            .with_context(|| format!("Failed to write run record to {}", json.path().display()))?;
    }

    Ok(summary.passed)
}
