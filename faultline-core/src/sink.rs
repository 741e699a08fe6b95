//! Progress reporting.
//!
//! Harness components announce milestones as [`HarnessEvent`]s through an
//! explicitly passed [`ReportSink`]. Events are informational only; a sink
//! that fails to record one logs a warning and carries on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::aggregator::AggregateReport;
use crate::window::WindowBounds;

/// Receives progress events.
pub trait ReportSink: Send + Sync + 'static {
    /// Record one event.
    fn emit(&self, event: &HarnessEvent);
}

/// A harness milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HarnessEvent {
    /// A scenario began.
    ScenarioStarted {
        /// Scenario name.
        scenario: String,
    },
    /// A workload driver started submitting.
    DriverStarted {
        /// Stream name.
        stream: String,
    },
    /// A workload driver drained its pool.
    DriverFinished {
        /// Stream name.
        stream: String,
        /// Tasks submitted.
        submitted: u64,
        /// Tasks that succeeded.
        passed: usize,
        /// Tasks that failed.
        failed: usize,
    },
    /// A workload driver gave up.
    DriverAborted {
        /// Stream name.
        stream: String,
        /// Why.
        reason: String,
    },
    /// The fault window opened.
    WindowOpened {
        /// Milliseconds since the scenario epoch.
        at_ms: u64,
    },
    /// The destructive action completed.
    FaultInjected {
        /// Affected component.
        component: String,
    },
    /// The destructive action failed.
    FaultFailed {
        /// Injector name.
        injector: String,
        /// Error message.
        reason: String,
    },
    /// The fault window closed.
    WindowClosed {
        /// Milliseconds since the scenario epoch.
        at_ms: u64,
    },
    /// A component was brought back.
    FaultRestored {
        /// Restored component.
        component: String,
    },
    /// The aggregate report was released.
    ReportReady {
        /// Successful operations.
        passed: usize,
        /// Failures attributed to the fault window.
        expected_failures: usize,
        /// Failures outside the fault window.
        unexpected_failures: usize,
    },
}

impl fmt::Display for HarnessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScenarioStarted { scenario } => write!(f, "scenario {} started", scenario),
            Self::DriverStarted { stream } => write!(f, "driver {} started", stream),
            Self::DriverFinished {
                stream,
                submitted,
                passed,
                failed,
            } => write!(
                f,
                "driver {} finished: {} submitted, {} passed, {} failed",
                stream, submitted, passed, failed
            ),
            Self::DriverAborted { stream, reason } => {
                write!(f, "driver {} aborted: {}", stream, reason)
            }
            Self::WindowOpened { at_ms } => write!(f, "fault window opened at {}ms", at_ms),
            Self::FaultInjected { component } => write!(f, "fault injected into {}", component),
            Self::FaultFailed { injector, reason } => {
                write!(f, "fault injection by {} failed: {}", injector, reason)
            }
            Self::WindowClosed { at_ms } => write!(f, "fault window closed at {}ms", at_ms),
            Self::FaultRestored { component } => write!(f, "{} restored", component),
            Self::ReportReady {
                passed,
                expected_failures,
                unexpected_failures,
            } => write!(
                f,
                "report ready: {} passed, {} expected failures, {} unexpected failures",
                passed, expected_failures, unexpected_failures
            ),
        }
    }
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, event: &HarnessEvent) {
        match event {
            HarnessEvent::DriverAborted { .. } | HarnessEvent::FaultFailed { .. } => {
                tracing::warn!("{}", event)
            }
            _ => tracing::info!("{}", event),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<HarnessEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, in emission order.
    pub fn events(&self) -> Vec<HarnessEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, event: &HarnessEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Appends one JSON object per event to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append any serialisable value as one line and flush.
    pub fn write_line<T: Serialize>(&self, value: &T) -> std::io::Result<()> {
        let line = serde_json::to_string(value)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        writer.flush()
    }
}

impl ReportSink for JsonLinesSink {
    fn emit(&self, event: &HarnessEvent) {
        if let Err(e) = self.write_line(event) {
            tracing::warn!("Failed to write event to {}: {}", self.path.display(), e);
        }
    }
}

/// End-of-run summary of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    /// Unique id of this run.
    pub scenario_id: Uuid,
    /// Scenario name.
    pub name: String,
    /// Start time in seconds since the Unix epoch.
    pub started_at: u64,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Whether every check passed.
    pub passed: bool,
    /// Tasks submitted across all streams.
    pub submitted: u64,
    /// Successful operations.
    pub succeeded: usize,
    /// Failures attributed to the fault window.
    pub expected_failures: usize,
    /// Failures outside the fault window.
    pub unexpected_failures: usize,
    /// Window edges, if the window opened.
    pub window: Option<WindowBounds>,
    /// Descriptions of failed checks.
    pub failed_checks: Vec<String>,
}

impl ScenarioRecord {
    /// Summarise `report` for a run that started at `started`.
    pub fn new(
        name: &str,
        started: SystemTime,
        report: &AggregateReport,
        failed_checks: Vec<String>,
    ) -> Self {
        Self {
            scenario_id: Uuid::new_v4(),
            name: name.to_string(),
            started_at: started
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            duration: started.elapsed().unwrap_or_default(),
            passed: failed_checks.is_empty(),
            submitted: report.total_submitted,
            succeeded: report.pass_count(),
            expected_failures: report.expected_failure_count(),
            unexpected_failures: report.unexpected_failure_count(),
            window: report.window,
            failed_checks,
        }
    }
}
