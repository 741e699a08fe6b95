//! Workload drivers.
//!
//! A [`WorkloadDriver`] owns one stream of operations. It pulls operations
//! from an [`OperationSource`], submits them to its own [`TaskPool`],
//! collects exactly one [`OperationResult`] per task and, once the pool has
//! drained, sends exactly one [`WorkloadMessage`] to the aggregator.
//!
//! ```text
//! source ──► driver ──submit──► pool workers ──results──► collector
//!                                                           │
//!                         WorkloadMessage::Final ◄──────────┘
//! ```

use faultline_types::{OperationResult, StoredObject, TaskId};
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::{HarnessError, Result};
use crate::pool::TaskPool;
use crate::sink::{HarnessEvent, ReportSink, TracingSink};
use crate::storage::StorageClient;
use crate::task::{StorageHandler, Task, TaskHandler};
use crate::window::FaultWindow;
use crate::workload::OperationSource;

/// Externally raised stop flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Create an unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every driver watching this signal to stop submitting.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// When a driver stops submitting.
///
/// Every condition also stops when the source is exhausted.
#[derive(Debug, Clone)]
pub enum StopCondition {
    /// After this many tasks.
    Count(u64),
    /// When the signal is raised.
    Signal(StopSignal),
    /// Once the driver's fault window has closed.
    WindowClosed,
    /// Only when the source runs dry.
    Exhausted,
}

impl StopCondition {
    fn reached(&self, submitted: u64, window: &FaultWindow) -> bool {
        match self {
            Self::Count(limit) => submitted >= *limit,
            Self::Signal(signal) => signal.is_stopped(),
            Self::WindowClosed => window.closed_at().is_some(),
            Self::Exhausted => false,
        }
    }

    fn is_continuous(&self) -> bool {
        !matches!(self, Self::Count(_))
    }
}

/// Everything one driver observed.
#[derive(Debug, Clone, Serialize)]
pub struct DriverReport {
    /// Stream name.
    pub stream: String,
    /// Tasks submitted.
    pub submitted: u64,
    /// Successful results, by task id.
    pub passed: Vec<OperationResult>,
    /// Failed results, by task id.
    pub failed: Vec<OperationResult>,
}

impl DriverReport {
    fn from_results(stream: &str, submitted: u64, results: Vec<OperationResult>) -> Self {
        let (mut passed, mut failed): (Vec<_>, Vec<_>) =
            results.into_iter().partition(OperationResult::is_success);
        passed.sort_by_key(|r| r.task_id);
        failed.sort_by_key(|r| r.task_id);
        Self {
            stream: stream.to_string(),
            submitted,
            passed,
            failed,
        }
    }

    /// Number of successful operations.
    pub fn pass_count(&self) -> usize {
        self.passed.len()
    }

    /// Number of failed operations.
    pub fn fail_count(&self) -> usize {
        self.failed.len()
    }

    /// Objects successfully written by this stream, for follow-on reads.
    pub fn written_objects(&self) -> Vec<StoredObject> {
        self.passed
            .iter()
            .filter_map(|r| r.written.clone())
            .collect()
    }
}

/// Message from a driver to the aggregator. Each driver sends exactly one.
#[derive(Debug, Clone)]
pub enum WorkloadMessage {
    /// The driver drained its pool.
    Final(DriverReport),
    /// The driver hit a harness error and gave up.
    Aborted {
        /// Stream name.
        stream: String,
        /// Error message.
        reason: String,
    },
}

/// Sending half of an aggregator's message channel.
#[derive(Debug, Clone)]
pub struct ReportSender {
    tx: mpsc::UnboundedSender<WorkloadMessage>,
}

impl ReportSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WorkloadMessage>) -> Self {
        Self { tx }
    }

    /// Deliver a driver's final report.
    pub fn send_final(&self, report: DriverReport) {
        if self.tx.send(WorkloadMessage::Final(report)).is_err() {
            tracing::warn!("Aggregator gone; final report dropped");
        }
    }

    /// Announce that a driver aborted.
    pub fn send_aborted(&self, stream: &str, reason: impl Into<String>) {
        let message = WorkloadMessage::Aborted {
            stream: stream.to_string(),
            reason: reason.into(),
        };
        if self.tx.send(message).is_err() {
            tracing::warn!("Aggregator gone; abort of {} dropped", stream);
        }
    }
}

/// Issues one stream of operations through its own pool.
pub struct WorkloadDriver {
    stream: Arc<str>,
    source: Box<dyn OperationSource>,
    client: Arc<dyn StorageClient>,
    window: FaultWindow,
    pool: PoolConfig,
    handler: Arc<dyn TaskHandler>,
    sink: Arc<dyn ReportSink>,
    pace: Option<Duration>,
}

impl std::fmt::Debug for WorkloadDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadDriver")
            .field("stream", &self.stream)
            .field("pool", &self.pool)
            .field("pace", &self.pace)
            .finish_non_exhaustive()
    }
}

impl WorkloadDriver {
    /// Driver for `stream` with the default pool, handler and sink.
    pub fn new(
        stream: &str,
        source: impl OperationSource,
        client: Arc<dyn StorageClient>,
        window: FaultWindow,
    ) -> Self {
        Self {
            stream: Arc::from(stream),
            source: Box::new(source),
            client,
            window,
            pool: PoolConfig::default(),
            handler: Arc::new(StorageHandler),
            sink: Arc::new(TracingSink),
            pace: None,
        }
    }

    /// Pool sizing for this driver.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Handler that executes each task (default: [`StorageHandler`]).
    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Where progress events go (default: [`TracingSink`]).
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Delay between submissions.
    pub fn with_pace(mut self, pace: Option<Duration>) -> Self {
        self.pace = pace;
        self
    }

    /// Stream name.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Submit until `stop` is reached, drain the pool and return the report.
    ///
    /// # Errors
    ///
    /// Pool start, submit or shutdown errors, or `DriverJoin` if the result
    /// collector could not be joined.
    pub async fn run(mut self, stop: StopCondition) -> Result<DriverReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = TaskPool::start(
            &self.stream,
            &self.pool,
            Arc::clone(&self.handler),
            self.window.clone(),
            tx,
        )?;

        // Ends once every worker has exited and dropped its sender.
        let collector = tokio::spawn(async move {
            let mut results = Vec::new();
            while let Some(result) = rx.recv().await {
                results.push(result);
            }
            results
        });

        self.sink.emit(&HarnessEvent::DriverStarted {
            stream: self.stream.to_string(),
        });

        let mut id = TaskId::first();
        let mut submitted = 0u64;
        while !stop.reached(submitted, &self.window) {
            let Some(operation) = self.source.next_operation(id) else {
                tracing::debug!("Driver {}: source exhausted", self.stream);
                break;
            };
            let task = Task::new(
                id,
                Arc::clone(&self.stream),
                operation,
                Arc::clone(&self.client),
            );
            pool.submit(task).await?;
            submitted += 1;
            id = id.next();

            match self.pace {
                Some(pace) => tokio::time::sleep(pace).await,
                None if stop.is_continuous() => tokio::task::yield_now().await,
                None => {}
            }
        }

        pool.shutdown().await?;
        let results = collector.await.map_err(|e| HarnessError::DriverJoin {
            stream: self.stream.to_string(),
            reason: e.to_string(),
        })?;

        let report = DriverReport::from_results(&self.stream, submitted, results);
        self.sink.emit(&HarnessEvent::DriverFinished {
            stream: report.stream.clone(),
            submitted,
            passed: report.pass_count(),
            failed: report.fail_count(),
        });
        Ok(report)
    }

    /// Run on a background task, sending the outcome to `reports`.
    ///
    /// Exactly one message is sent: `Final` on success, `Aborted` if the
    /// run returned an error or panicked.
    pub fn run_in_background(self, stop: StopCondition, reports: ReportSender) -> DriverHandle {
        let stream = self.stream.to_string();
        let sink = Arc::clone(&self.sink);
        let name = stream.clone();

        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(self.run(stop)).catch_unwind().await;
            let reason = match outcome {
                Ok(Ok(report)) => {
                    reports.send_final(report);
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "driver panicked".to_string(),
            };
            tracing::error!("Driver {} aborted: {}", name, reason);
            sink.emit(&HarnessEvent::DriverAborted {
                stream: name.clone(),
                reason: reason.clone(),
            });
            reports.send_aborted(&name, reason.clone());
            Err(HarnessError::DriverAborted {
                stream: name,
                reason,
            })
        });

        DriverHandle { stream, handle }
    }
}

/// Handle to a driver running in the background.
#[derive(Debug)]
pub struct DriverHandle {
    stream: String,
    handle: JoinHandle<Result<()>>,
}

impl DriverHandle {
    /// Stream name.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Returns true once the driver task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the driver to finish.
    ///
    /// # Errors
    ///
    /// `DriverAborted` if the run failed, `DriverJoin` if the task could not
    /// be joined.
    pub async fn join(self) -> Result<()> {
        self.handle.await.map_err(|e| HarnessError::DriverJoin {
            stream: self.stream,
            reason: e.to_string(),
        })?
    }
}
