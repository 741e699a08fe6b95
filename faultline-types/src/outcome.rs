//! Per-operation results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::ids::{ObjectRef, StoredObject, TaskId};
use crate::operation::{Operation, OperationKind};

/// Phase of the fault window.
///
/// The window only ever moves forward: `PreFault -> Open -> PostFault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    /// Closed, no fault injected yet.
    PreFault,
    /// A destructive action is in flight.
    Open,
    /// Closed again, the fault has been injected and the cluster settled.
    PostFault,
}

impl WindowPhase {
    /// Decode from the atomic representation used by the window.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PreFault),
            1 => Some(Self::Open),
            2 => Some(Self::PostFault),
            _ => None,
        }
    }

    /// Encode for atomic storage.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::PreFault => 0,
            Self::Open => 1,
            Self::PostFault => 2,
        }
    }
}

impl fmt::Display for WindowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreFault => "pre-fault",
            Self::Open => "open",
            Self::PostFault => "post-fault",
        };
        f.write_str(name)
    }
}

/// Why an operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The store answered but reported the operation unsuccessful.
    Rejected,
    /// The client raised a transport error.
    Transport,
    /// A read returned data whose checksum does not match what was written.
    Corruption,
    /// The handler panicked while executing the task.
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rejected => "rejected",
            Self::Transport => "transport",
            Self::Corruption => "corruption",
            Self::Panicked => "panicked",
        };
        f.write_str(name)
    }
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The operation succeeded.
    Success {
        /// Detail returned by the store (log reference, etag, ...).
        detail: String,
    },
    /// The operation failed.
    Failure {
        /// Failure category.
        kind: FailureKind,
        /// Human-readable detail.
        detail: String,
    },
}

impl Outcome {
    /// Build a success outcome.
    pub fn success(detail: impl Into<String>) -> Self {
        Self::Success {
            detail: detail.into(),
        }
    }

    /// Build a failure outcome.
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
        }
    }

    /// Returns true for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure category, if this is a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Detail string for either variant.
    pub fn detail(&self) -> &str {
        match self {
            Self::Success { detail } | Self::Failure { detail, .. } => detail,
        }
    }
}

/// Result of executing one task.
///
/// Timestamps are offsets from the scenario epoch (the creation of the
/// fault window), so results from different streams are comparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Task sequence number within its stream.
    pub task_id: TaskId,
    /// Name of the workload stream that produced the task.
    pub stream: String,
    /// Operation kind.
    pub kind: OperationKind,
    /// Object the operation acted on.
    pub target: ObjectRef,
    /// Object written by a successful write, with its checksum.
    pub written: Option<StoredObject>,
    /// Success or failure.
    pub outcome: Outcome,
    /// When the worker started the operation.
    pub started_at: Duration,
    /// When the operation returned.
    pub finished_at: Duration,
    /// Window phase observed by the worker when it started.
    pub phase_at_start: WindowPhase,
}

impl OperationResult {
    /// Assemble a result for `operation`.
    ///
    /// For a successful write the written object and its checksum are
    /// recorded so the object can be verified later.
    pub fn new(
        task_id: TaskId,
        stream: &str,
        operation: &Operation,
        outcome: Outcome,
        started_at: Duration,
        finished_at: Duration,
        phase_at_start: WindowPhase,
    ) -> Self {
        let written = match (&operation.kind, &operation.payload, outcome.is_success()) {
            (OperationKind::Write, Some(payload), true) => Some(StoredObject {
                target: operation.target.clone(),
                checksum: payload.checksum(),
                size: payload.size,
            }),
            _ => None,
        };

        Self {
            task_id,
            stream: stream.to_string(),
            kind: operation.kind,
            target: operation.target.clone(),
            written,
            outcome,
            started_at,
            finished_at,
            phase_at_start,
        }
    }

    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Returns true if `[started_at, finished_at]` intersects `[from, until]`.
    ///
    /// `until = None` means the interval is open-ended.
    pub fn overlaps(&self, from: Duration, until: Option<Duration>) -> bool {
        let starts_before_end = until.map_or(true, |end| self.started_at <= end);
        starts_before_end && self.finished_at >= from
    }

    /// How long the operation took.
    pub fn duration(&self) -> Duration {
        self.finished_at.saturating_sub(self.started_at)
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}] {} {} ",
            self.stream, self.task_id, self.kind, self.target
        )?;
        match &self.outcome {
            Outcome::Success { .. } => write!(f, "ok")?,
            Outcome::Failure { kind, detail } => write!(f, "FAILED ({}): {}", kind, detail)?,
        }
        write!(
            f,
            " [{}ms..{}ms, {}]",
            self.started_at.as_millis(),
            self.finished_at.as_millis(),
            self.phase_at_start
        )
    }
}
