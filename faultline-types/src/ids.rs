//! Identity types for tasks and stored objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number of a task within one workload stream.
///
/// Sequence numbers start at 1 so that "the 3rd task" is `TaskId(3)`.
/// A task is identified across streams by `(stream, TaskId)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a TaskId from a sequence number.
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// The first id handed out by a stream.
    pub fn first() -> Self {
        Self(1)
    }

    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw sequence number.
    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// Location of an object in the store: bucket plus key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket name.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// An object known to have been written, with the checksum of its content.
///
/// Produced from successful writes so follow-on workloads can read the
/// object back and verify its integrity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Where the object lives.
    pub target: ObjectRef,
    /// Hex SHA-256 of the written bytes.
    pub checksum: String,
    /// Size in bytes.
    pub size: usize,
}
