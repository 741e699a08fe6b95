//! Error types for faultline-core.
//!
//! Task-level storage failures are not errors: they travel as
//! [`Outcome::Failure`](faultline_types::Outcome) data through the result
//! channel. Everything here aborts the scenario.

use faultline_types::{FaultError, WindowPhase};
use std::time::Duration;

/// Main error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A pool was started with zero workers.
    #[error("worker count must be at least 1 (got {0})")]
    InvalidWorkerCount(usize),

    /// `submit` was called on a pool that has been shut down.
    #[error("pool {pool} is shut down; no further tasks accepted")]
    PoolShutDown {
        /// Name of the pool.
        pool: String,
    },

    /// `shutdown` was called a second time on the same pool.
    #[error("pool {pool} was already shut down")]
    PoolAlreadyShutDown {
        /// Name of the pool.
        pool: String,
    },

    /// A worker task could not be joined.
    #[error("worker {worker} of pool {pool} failed to join: {reason}")]
    WorkerJoin {
        /// Name of the pool.
        pool: String,
        /// Worker index.
        worker: usize,
        /// Join failure reason.
        reason: String,
    },

    /// `signal_open` was called when the window was not in its initial phase.
    #[error("fault window already opened (phase: {phase})")]
    WindowAlreadyOpened {
        /// Phase the window was in.
        phase: WindowPhase,
    },

    /// `signal_close` was called before `signal_open`.
    #[error("fault window closed before it was opened")]
    WindowNotOpen,

    /// `signal_close` was called twice.
    #[error("fault window already closed")]
    WindowAlreadyClosed,

    /// Fewer driver reports than expected arrived before the deadline.
    #[error("timed out after {waited:?} waiting for {expected} reports ({received} received)")]
    ReportTimeout {
        /// Number of reports expected.
        expected: usize,
        /// Number of reports received before the deadline.
        received: usize,
        /// How long the aggregator waited.
        waited: Duration,
    },

    /// A workload driver announced that it crashed.
    #[error("workload driver {stream} aborted: {reason}")]
    DriverAborted {
        /// Stream name of the driver.
        stream: String,
        /// Why it aborted.
        reason: String,
    },

    /// A background driver task panicked or was cancelled.
    #[error("workload driver {stream} did not finish: {reason}")]
    DriverJoin {
        /// Stream name of the driver.
        stream: String,
        /// Join failure reason.
        reason: String,
    },

    /// The fault injector failed.
    #[error("fault injection error: {0}")]
    Fault(#[from] FaultError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Returns true for errors caused by misuse of the harness API.
    ///
    /// These indicate a broken scenario rather than a broken cluster.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidWorkerCount(_)
                | Self::PoolShutDown { .. }
                | Self::PoolAlreadyShutDown { .. }
                | Self::WindowAlreadyOpened { .. }
                | Self::WindowNotOpen
                | Self::WindowAlreadyClosed
        )
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
