//! Assertion helpers for degraded-mode scenarios.
//!
//! These are pure functions over an [`AggregateReport`]. They return
//! pass/fail with details instead of panicking, so a scenario can collect
//! every failed check before deciding.

use faultline_types::{FailureKind, OperationResult};
use std::fmt;

use crate::aggregator::AggregateReport;

/// Result of an assertion check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.into(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: &str) -> Self {
        Self {
            passed: false,
            description: description.into(),
            failure_details: Some(details.into()),
        }
    }
}

impl fmt::Display for AssertionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{}] {}", status, self.description)?;
        if let Some(details) = &self.failure_details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

// At most this many offending results are listed in failure details.
const MAX_LISTED: usize = 5;

fn list(results: &[&OperationResult]) -> String {
    let mut lines: Vec<String> = results.iter().take(MAX_LISTED).map(|r| r.to_string()).collect();
    if results.len() > MAX_LISTED {
        lines.push(format!("... and {} more", results.len() - MAX_LISTED));
    }
    lines.join("; ")
}

/// Assert that every submitted task produced exactly one result.
pub fn assert_all_accounted(report: &AggregateReport) -> AssertionResult {
    let observed = (report.pass_count() + report.fail_count()) as u64;
    if observed == report.total_submitted {
        AssertionResult::pass(&format!(
            "All {} submitted operations accounted for",
            report.total_submitted
        ))
    } else {
        AssertionResult::fail(
            "All submitted operations accounted for",
            &format!(
                "{} submitted but {} results ({} passed, {} failed)",
                report.total_submitted,
                observed,
                report.pass_count(),
                report.fail_count()
            ),
        )
    }
}

/// Assert that no failure falls outside the fault window.
pub fn assert_no_unexpected_failures(report: &AggregateReport) -> AssertionResult {
    if report.unexpected_failures.is_empty() {
        AssertionResult::pass("No failures outside the fault window")
    } else {
        let offending: Vec<_> = report.unexpected_failures.iter().collect();
        AssertionResult::fail(
            "No failures outside the fault window",
            &format!("{} unexpected: {}", offending.len(), list(&offending)),
        )
    }
}

/// Assert that no read returned data with the wrong checksum.
pub fn assert_no_corruption(report: &AggregateReport) -> AssertionResult {
    let corrupted: Vec<_> = report
        .failures()
        .filter(|r| r.outcome.failure_kind() == Some(FailureKind::Corruption))
        .collect();
    if corrupted.is_empty() {
        AssertionResult::pass("No corrupted reads")
    } else {
        AssertionResult::fail(
            "No corrupted reads",
            &format!("{} corrupted: {}", corrupted.len(), list(&corrupted)),
        )
    }
}

/// Assert that expected failures stay within `budget`, if one is set.
pub fn assert_expected_within_budget(
    report: &AggregateReport,
    budget: Option<usize>,
) -> AssertionResult {
    let count = report.expected_failure_count();
    match budget {
        None => AssertionResult::pass(&format!("{} expected failures (no limit)", count)),
        Some(max) if count <= max => AssertionResult::pass(&format!(
            "{} expected failures within limit of {}",
            count, max
        )),
        Some(max) => AssertionResult::fail(
            "Expected failures within limit",
            &format!("{} expected failures exceed limit of {}", count, max),
        ),
    }
}

/// Assert that at least `min` operations succeeded.
pub fn assert_min_passed(report: &AggregateReport, min: usize) -> AssertionResult {
    if report.pass_count() >= min {
        AssertionResult::pass(&format!(
            "{} operations passed (at least {})",
            report.pass_count(),
            min
        ))
    } else {
        AssertionResult::fail(
            "Minimum successful operations",
            &format!("only {} of required {} passed", report.pass_count(), min),
        )
    }
}
