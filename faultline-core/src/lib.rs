//! # faultline-core
//!
//! Concurrent workload harness for testing storage clusters while their
//! components are being destroyed.
//!
//! ## Pieces
//!
//! - [`TaskPool`] - fixed number of workers draining a bounded queue
//! - [`FaultWindow`] - shared phase signal bracketing the destructive action
//! - [`WorkloadDriver`] - one stream of operations through its own pool
//! - [`ResultAggregator`] - collects driver reports and classifies failures
//!
//! ## Scenario shape
//!
//! ```ignore
//! let window = FaultWindow::new();
//! let aggregator = ResultAggregator::new(window.clone(), FailurePolicy::strict());
//!
//! let reads = WorkloadDriver::new("reads", ReadWorkload::new(objects), store.clone(), window.clone())
//!     .run_in_background(StopCondition::WindowClosed, aggregator.sender());
//!
//! run_fault_window(&window, &injector, &TracingSink).await?;
//! reads.join().await?;
//!
//! let report = aggregator.await_report(1, Duration::from_secs(60)).await?;
//! assert!(report.verdict(&FailurePolicy::strict()).passed());
//! ```
//!
//! Storage failures are never errors here: they are recorded as failed
//! [`OperationResult`](faultline_types::OperationResult)s and classified
//! against the window. [`HarnessError`] is reserved for a broken scenario.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod assertions;
pub mod config;
pub mod driver;
pub mod error;
pub mod fault;
pub mod pool;
pub mod sink;
pub mod storage;
pub mod task;
pub mod window;
pub mod workload;

pub use aggregator::{AggregateReport, Classification, FailurePolicy, PhaseTally, ResultAggregator, Verdict};
pub use assertions::AssertionResult;
pub use config::{ConfigError, HarnessConfig, PoolConfig};
pub use driver::{
    DriverHandle, DriverReport, ReportSender, StopCondition, StopSignal, WorkloadDriver,
    WorkloadMessage,
};
pub use error::{HarnessError, Result};
pub use fault::{run_fault_window, FaultInjector, FaultRecord, SimulatedPodFailure};
pub use pool::TaskPool;
pub use sink::{HarnessEvent, JsonLinesSink, MemorySink, ReportSink, ScenarioRecord, TracingSink};
pub use storage::{InMemoryStore, OpResponse, StorageClient};
pub use task::{StorageHandler, Task, TaskHandler};
pub use window::{FaultWindow, WindowBounds};
pub use workload::{
    CopyWorkload, DeleteWorkload, MultipartWorkload, OperationSource, ReadWorkload,
    ScriptedWorkload, WriteWorkload,
};
