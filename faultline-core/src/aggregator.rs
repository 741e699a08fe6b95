//! Result aggregation and failure classification.
//!
//! The [`ResultAggregator`] waits for a known number of driver reports,
//! then classifies every failure against the fault window:
//!
//! | failure                                                  | classified |
//! |----------------------------------------------------------|------------|
//! | checksum mismatch                                        | unexpected |
//! | window never opened                                      | unexpected |
//! | started while the window was open                        | expected   |
//! | `[start, finish]` meets `[open - grace, close + grace]`  | expected   |
//! | started after close, kind tolerated by the policy        | expected   |
//! | anything else                                            | unexpected |

use faultline_types::{FailureKind, OperationKind, OperationResult, WindowPhase};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::assertions::{self, AssertionResult};
use crate::config::PolicyConfig;
use crate::driver::{DriverReport, ReportSender, WorkloadMessage};
use crate::error::{HarnessError, Result};
use crate::sink::{HarnessEvent, ReportSink, TracingSink};
use crate::window::{FaultWindow, WindowBounds};

/// Which failures the fault window excuses.
///
/// The default is strict: only failures that overlap the window itself are
/// expected, and nothing is tolerated after it closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Tolerance applied to both window edges.
    pub grace: Duration,
    /// Most expected failures a passing verdict allows; `None` for no limit.
    pub max_expected_failures: Option<usize>,
    /// Kinds whose failures after close are still expected.
    pub tolerated_after_close: Vec<OperationKind>,
}

/// Where a result lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The operation succeeded.
    Passed,
    /// Failed, attributable to the fault window.
    ExpectedFailure,
    /// Failed where the system promised it would not.
    UnexpectedFailure,
}

impl FailurePolicy {
    /// Strict policy.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Widen both window edges by `grace`.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Cap expected failures.
    pub fn with_max_expected_failures(mut self, max: usize) -> Self {
        self.max_expected_failures = Some(max);
        self
    }

    /// Tolerate failures of `kind` that start after the window closed.
    pub fn tolerate_after_close(mut self, kind: OperationKind) -> Self {
        if !self.tolerated_after_close.contains(&kind) {
            self.tolerated_after_close.push(kind);
        }
        self
    }

    /// Classify one result against the window edges.
    pub fn classify(&self, result: &OperationResult, bounds: Option<WindowBounds>) -> Classification {
        let Some(kind) = result.outcome.failure_kind() else {
            return Classification::Passed;
        };
        if kind == FailureKind::Corruption {
            return Classification::UnexpectedFailure;
        }
        let Some(bounds) = bounds else {
            return Classification::UnexpectedFailure;
        };

        if result.phase_at_start == WindowPhase::Open {
            return Classification::ExpectedFailure;
        }

        let from = bounds.opened_at.saturating_sub(self.grace);
        let until = bounds.closed_at.map(|closed| closed + self.grace);
        if result.overlaps(from, until) {
            return Classification::ExpectedFailure;
        }

        match bounds.closed_at {
            Some(closed)
                if result.started_at > closed
                    && self.tolerated_after_close.contains(&result.kind) =>
            {
                Classification::ExpectedFailure
            }
            _ => Classification::UnexpectedFailure,
        }
    }
}

impl From<&PolicyConfig> for FailurePolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            grace: Duration::from_millis(config.grace_ms),
            max_expected_failures: config.max_expected_failures,
            tolerated_after_close: config.tolerated_after_close.clone(),
        }
    }
}

/// Pass/fail tally for one window phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTally {
    /// Phase observed at task start.
    pub phase: WindowPhase,
    /// Successful operations.
    pub passed: usize,
    /// Failed operations.
    pub failed: usize,
}

impl PhaseTally {
    /// Zeroed tallies for every phase, in window order.
    pub fn all_empty() -> [PhaseTally; 3] {
        [WindowPhase::PreFault, WindowPhase::Open, WindowPhase::PostFault].map(|phase| PhaseTally {
            phase,
            passed: 0,
            failed: 0,
        })
    }
}

/// Combined, classified results of every driver in a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    /// Streams that reported, in arrival order.
    pub streams: Vec<String>,
    /// Tasks submitted across all streams.
    pub total_submitted: u64,
    /// Successful operations.
    pub passed: Vec<OperationResult>,
    /// Failures attributed to the fault window.
    pub expected_failures: Vec<OperationResult>,
    /// Failures the system should not have produced.
    pub unexpected_failures: Vec<OperationResult>,
    /// Tallies by phase observed at start, in window order.
    pub phases: [PhaseTally; 3],
    /// Window edges at classification time.
    pub window: Option<WindowBounds>,
}

impl AggregateReport {
    /// Classify every result in `reports`.
    pub fn classify(
        reports: Vec<DriverReport>,
        bounds: Option<WindowBounds>,
        policy: &FailurePolicy,
    ) -> Self {
        let mut report = Self {
            streams: Vec::with_capacity(reports.len()),
            total_submitted: 0,
            passed: Vec::new(),
            expected_failures: Vec::new(),
            unexpected_failures: Vec::new(),
            phases: PhaseTally::all_empty(),
            window: bounds,
        };

        for driver in reports {
            report.streams.push(driver.stream);
            report.total_submitted += driver.submitted;
            for result in driver.passed.into_iter().chain(driver.failed) {
                let tally = report.tally_mut(result.phase_at_start);
                if result.is_success() {
                    tally.passed += 1;
                } else {
                    tally.failed += 1;
                }
                match policy.classify(&result, bounds) {
                    Classification::Passed => report.passed.push(result),
                    Classification::ExpectedFailure => report.expected_failures.push(result),
                    Classification::UnexpectedFailure => {
                        tracing::warn!("Unexpected failure: {}", result);
                        report.unexpected_failures.push(result);
                    }
                }
            }
        }
        report
    }

    /// Number of successful operations.
    pub fn pass_count(&self) -> usize {
        self.passed.len()
    }

    /// Number of failed operations, expected or not.
    pub fn fail_count(&self) -> usize {
        self.expected_failures.len() + self.unexpected_failures.len()
    }

    /// Number of failures attributed to the fault window.
    pub fn expected_failure_count(&self) -> usize {
        self.expected_failures.len()
    }

    /// Number of failures outside the fault window.
    pub fn unexpected_failure_count(&self) -> usize {
        self.unexpected_failures.len()
    }

    /// Every failure, expected first.
    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.expected_failures
            .iter()
            .chain(self.unexpected_failures.iter())
    }

    /// Tally for `phase`.
    pub fn phase(&self, phase: WindowPhase) -> PhaseTally {
        let [pre, open, post] = self.phases;
        match phase {
            WindowPhase::PreFault => pre,
            WindowPhase::Open => open,
            WindowPhase::PostFault => post,
        }
    }

    fn tally_mut(&mut self, phase: WindowPhase) -> &mut PhaseTally {
        let [pre, open, post] = &mut self.phases;
        match phase {
            WindowPhase::PreFault => pre,
            WindowPhase::Open => open,
            WindowPhase::PostFault => post,
        }
    }

    /// Run the standard checks for a degraded-mode scenario.
    pub fn verdict(&self, policy: &FailurePolicy) -> Verdict {
        Verdict {
            checks: vec![
                assertions::assert_all_accounted(self),
                assertions::assert_no_corruption(self),
                assertions::assert_no_unexpected_failures(self),
                assertions::assert_expected_within_budget(self, policy.max_expected_failures),
            ],
        }
    }
}

/// Outcome of [`AggregateReport::verdict`].
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Individual checks, in the order they ran.
    pub checks: Vec<AssertionResult>,
}

impl Verdict {
    /// Returns true if every check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Checks that failed.
    pub fn failures(&self) -> impl Iterator<Item = &AssertionResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Collects driver reports for one scenario.
pub struct ResultAggregator {
    window: FaultWindow,
    policy: FailurePolicy,
    sink: Arc<dyn ReportSink>,
    tx: mpsc::UnboundedSender<WorkloadMessage>,
    rx: mpsc::UnboundedReceiver<WorkloadMessage>,
}

impl std::fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultAggregator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResultAggregator {
    /// Aggregator classifying against `window` under `policy`.
    pub fn new(window: FaultWindow, policy: FailurePolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            window,
            policy,
            sink: Arc::new(TracingSink),
            tx,
            rx,
        }
    }

    /// Where progress events go (default: [`TracingSink`]).
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Policy in use.
    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Handle for drivers to send their reports.
    pub fn sender(&self) -> ReportSender {
        ReportSender::new(self.tx.clone())
    }

    /// Wait for `expected` final reports and release the classified report.
    ///
    /// Consumes the aggregator: a scenario gets exactly one report.
    ///
    /// # Errors
    ///
    /// `ReportTimeout` if fewer than `expected` reports arrive within
    /// `timeout`; `DriverAborted` as soon as any driver reports an abort.
    pub async fn await_report(mut self, expected: usize, timeout: Duration) -> Result<AggregateReport> {
        // A timeout past the clock's range means no deadline.
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        let mut reports = Vec::with_capacity(expected);

        while reports.len() < expected {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.rx.recv()).await,
                None => Ok(self.rx.recv().await),
            };
            match next {
                Ok(Some(WorkloadMessage::Final(report))) => {
                    tracing::debug!(
                        "Report {}/{} received from {}",
                        reports.len() + 1,
                        expected,
                        report.stream
                    );
                    reports.push(report);
                }
                Ok(Some(WorkloadMessage::Aborted { stream, reason })) => {
                    tracing::error!("Driver {} aborted: {}", stream, reason);
                    return Err(HarnessError::DriverAborted { stream, reason });
                }
                // The aggregator holds a sender, so the channel cannot close
                // while it waits; treat it like running out of time.
                Ok(None) | Err(_) => {
                    tracing::error!(
                        "Timed out waiting for reports: {}/{} received",
                        reports.len(),
                        expected
                    );
                    return Err(HarnessError::ReportTimeout {
                        expected,
                        received: reports.len(),
                        waited: timeout,
                    });
                }
            }
        }

        let report = AggregateReport::classify(reports, self.window.bounds(), &self.policy);
        self.sink.emit(&HarnessEvent::ReportReady {
            passed: report.pass_count(),
            expected_failures: report.expected_failure_count(),
            unexpected_failures: report.unexpected_failure_count(),
        });
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_types::{ObjectRef, Operation, Outcome, TaskId};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn result(
        seq: u64,
        kind: OperationKind,
        outcome: Outcome,
        span: (u64, u64),
        phase: WindowPhase,
    ) -> OperationResult {
        let op = match kind {
            OperationKind::Read => Operation::read(ObjectRef::new("b", "k"), None),
            _ => Operation::delete(ObjectRef::new("b", "k")),
        };
        OperationResult::new(
            TaskId::new(seq),
            "s",
            &op,
            outcome,
            ms(span.0),
            ms(span.1),
            phase,
        )
    }

    fn failed(span: (u64, u64), phase: WindowPhase) -> OperationResult {
        result(
            1,
            OperationKind::Delete,
            Outcome::failure(FailureKind::Transport, "503"),
            span,
            phase,
        )
    }

    fn bounds(open: u64, close: Option<u64>) -> Option<WindowBounds> {
        Some(WindowBounds {
            opened_at: ms(open),
            closed_at: close.map(ms),
        })
    }

    #[test]
    fn success_always_passes() {
        let r = result(
            1,
            OperationKind::Delete,
            Outcome::success("ok"),
            (0, 1),
            WindowPhase::PreFault,
        );
        assert_eq!(FailurePolicy::strict().classify(&r, None), Classification::Passed);
    }

    #[test]
    fn no_window_means_unexpected() {
        let r = failed((10, 20), WindowPhase::PreFault);
        assert_eq!(
            FailurePolicy::strict().classify(&r, None),
            Classification::UnexpectedFailure
        );
    }

    #[test]
    fn overlap_is_expected() {
        let policy = FailurePolicy::strict();
        let window = bounds(100, Some(200));

        // Straddles the opening edge.
        let r = failed((90, 110), WindowPhase::PreFault);
        assert_eq!(policy.classify(&r, window), Classification::ExpectedFailure);
        // Straddles the closing edge.
        let r = failed((190, 210), WindowPhase::Open);
        assert_eq!(policy.classify(&r, window), Classification::ExpectedFailure);
        // Saw a stale phase at start but ran inside the window.
        let r = failed((150, 160), WindowPhase::PreFault);
        assert_eq!(policy.classify(&r, window), Classification::ExpectedFailure);
    }

    #[test]
    fn outside_window_is_unexpected() {
        let policy = FailurePolicy::strict();
        let window = bounds(100, Some(200));

        let before = failed((10, 90), WindowPhase::PreFault);
        let after = failed((210, 220), WindowPhase::PostFault);
        assert_eq!(policy.classify(&before, window), Classification::UnexpectedFailure);
        assert_eq!(policy.classify(&after, window), Classification::UnexpectedFailure);
    }

    #[test]
    fn grace_widens_window() {
        let policy = FailurePolicy::strict().with_grace(ms(20));
        let window = bounds(100, Some(200));

        assert_eq!(
            policy.classify(&failed((70, 85), WindowPhase::PreFault), window),
            Classification::ExpectedFailure
        );
        assert_eq!(
            policy.classify(&failed((215, 230), WindowPhase::PostFault), window),
            Classification::ExpectedFailure
        );
        assert_eq!(
            policy.classify(&failed((225, 230), WindowPhase::PostFault), window),
            Classification::UnexpectedFailure
        );
    }

    #[test]
    fn open_ended_window_covers_later_failures() {
        let r = failed((500, 600), WindowPhase::Open);
        assert_eq!(
            FailurePolicy::strict().classify(&r, bounds(100, None)),
            Classification::ExpectedFailure
        );
    }

    #[test]
    fn tolerated_kinds_after_close() {
        let policy = FailurePolicy::strict().tolerate_after_close(OperationKind::Read);
        let window = bounds(100, Some(200));

        let read = result(
            1,
            OperationKind::Read,
            Outcome::failure(FailureKind::Rejected, "SlowDown"),
            (300, 310),
            WindowPhase::PostFault,
        );
        let delete = failed((300, 310), WindowPhase::PostFault);
        assert_eq!(policy.classify(&read, window), Classification::ExpectedFailure);
        assert_eq!(policy.classify(&delete, window), Classification::UnexpectedFailure);
    }

    #[test]
    fn corruption_is_never_expected() {
        let r = result(
            1,
            OperationKind::Read,
            Outcome::failure(FailureKind::Corruption, "checksum mismatch"),
            (150, 160),
            WindowPhase::Open,
        );
        assert_eq!(
            FailurePolicy::strict().classify(&r, bounds(100, Some(200))),
            Classification::UnexpectedFailure
        );
    }

    #[test]
    fn policy_from_config() {
        let config = PolicyConfig {
            grace_ms: 250,
            max_expected_failures: Some(3),
            tolerated_after_close: vec![OperationKind::Delete],
        };
        let policy = FailurePolicy::from(&config);
        assert_eq!(policy.grace, ms(250));
        assert_eq!(policy.max_expected_failures, Some(3));
        assert_eq!(policy.tolerated_after_close, vec![OperationKind::Delete]);
    }

    #[test]
    fn classify_tallies_phases_and_totals() {
        let driver = DriverReport {
            stream: "s".into(),
            submitted: 3,
            passed: vec![
                result(1, OperationKind::Delete, Outcome::success("ok"), (0, 5), WindowPhase::PreFault),
                result(3, OperationKind::Delete, Outcome::success("ok"), (300, 305), WindowPhase::PostFault),
            ],
            failed: vec![failed((150, 160), WindowPhase::Open)],
        };
        let report =
            AggregateReport::classify(vec![driver], bounds(100, Some(200)), &FailurePolicy::strict());

        assert_eq!(report.total_submitted, 3);
        assert_eq!(report.pass_count(), 2);
        assert_eq!(report.fail_count(), 1);
        assert_eq!(report.expected_failure_count(), 1);
        assert_eq!(report.phase(WindowPhase::Open).failed, 1);
        assert_eq!(report.phase(WindowPhase::PreFault).passed, 1);
        assert!(report.verdict(&FailurePolicy::strict()).passed());
    }

    #[test]
    fn empty_report_has_a_tally_for_every_phase() {
        let report = AggregateReport::classify(Vec::new(), None, &FailurePolicy::strict());
        for phase in [WindowPhase::PreFault, WindowPhase::Open, WindowPhase::PostFault] {
            let tally = report.phase(phase);
            assert_eq!(tally.phase, phase);
            assert_eq!((tally.passed, tally.failed), (0, 0));
        }
    }

    #[tokio::test]
    async fn await_report_collects_expected_count() {
        let window = FaultWindow::new();
        let aggregator = ResultAggregator::new(window, FailurePolicy::strict());
        let sender = aggregator.sender();

        for stream in ["a", "b"] {
            sender.send_final(DriverReport {
                stream: stream.into(),
                submitted: 0,
                passed: Vec::new(),
                failed: Vec::new(),
            });
        }

        let report = aggregator.await_report(2, ms(500)).await.unwrap();
        assert_eq!(report.streams, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unbounded_timeout_waits_without_deadline() {
        let aggregator = ResultAggregator::new(FaultWindow::new(), FailurePolicy::strict());
        let report = aggregator.await_report(0, Duration::MAX).await.unwrap();
        assert!(report.streams.is_empty());

        let aggregator = ResultAggregator::new(FaultWindow::new(), FailurePolicy::strict());
        aggregator.sender().send_final(DriverReport {
            stream: "late".into(),
            submitted: 0,
            passed: Vec::new(),
            failed: Vec::new(),
        });
        let report = tokio::time::timeout(ms(500), aggregator.await_report(1, Duration::MAX))
            .await
            .expect("report already queued")
            .unwrap();
        assert_eq!(report.streams, vec!["late"]);
    }

    #[tokio::test]
    async fn await_report_times_out() {
        let aggregator = ResultAggregator::new(FaultWindow::new(), FailurePolicy::strict());
        let sender = aggregator.sender();
        sender.send_final(DriverReport {
            stream: "only".into(),
            submitted: 0,
            passed: Vec::new(),
            failed: Vec::new(),
        });

        let err = aggregator.await_report(2, ms(50)).await.unwrap_err();
        match err {
            HarnessError::ReportTimeout {
                expected, received, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(received, 1);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn abort_fails_fast() {
        let aggregator = ResultAggregator::new(FaultWindow::new(), FailurePolicy::strict());
        aggregator.sender().send_aborted("writes", "pool shut down");

        let err = tokio::time::timeout(ms(500), aggregator.await_report(3, Duration::from_secs(60)))
            .await
            .expect("abort must not wait for the timeout")
            .unwrap_err();
        assert!(matches!(err, HarnessError::DriverAborted { .. }));
    }
}
