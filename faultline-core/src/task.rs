//! Tasks and the handlers that execute them.

use async_trait::async_trait;
use faultline_types::{FailureKind, Operation, OperationKind, Outcome, TaskId};
use std::fmt;
use std::sync::Arc;

use crate::storage::StorageClient;

/// One unit of work for the pool: an operation plus the client to run it on.
///
/// Immutable once submitted.
#[derive(Clone)]
pub struct Task {
    /// Sequence number within the stream.
    pub id: TaskId,
    /// Workload stream that created the task.
    pub stream: Arc<str>,
    /// Operation to perform.
    pub operation: Operation,
    /// Client for the store under test.
    pub client: Arc<dyn StorageClient>,
}

impl Task {
    /// Create a task.
    pub fn new(
        id: TaskId,
        stream: Arc<str>,
        operation: Operation,
        client: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            id,
            stream,
            operation,
            client,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

/// Executes a task and reports its outcome.
///
/// Failures are returned as `Outcome::Failure`. A panic inside `handle` is
/// caught by the worker and recorded as a `Panicked` failure.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Run one task.
    async fn handle(&self, task: &Task) -> Outcome;
}

/// Default handler: runs the operation on the task's storage client.
///
/// Reads that carry an expected checksum are verified; a mismatch is a
/// `Corruption` failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct StorageHandler;

#[async_trait]
impl TaskHandler for StorageHandler {
    async fn handle(&self, task: &Task) -> Outcome {
        let op = &task.operation;
        match task.client.perform_operation(op).await {
            Ok(resp) if !resp.success => Outcome::failure(FailureKind::Rejected, resp.detail),
            Ok(resp) => match (&op.kind, &op.expected_checksum) {
                (OperationKind::Read, Some(expected)) if resp.checksum.as_ref() != Some(expected) => {
                    Outcome::failure(
                        FailureKind::Corruption,
                        format!(
                            "checksum mismatch for {}: expected {}, got {}",
                            op.target,
                            expected,
                            resp.checksum.as_deref().unwrap_or("<none>")
                        ),
                    )
                }
                _ => Outcome::success(resp.detail),
            },
            Err(e) => Outcome::failure(FailureKind::Transport, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use faultline_types::{ObjectRef, Payload};

    fn task(op: Operation, store: &InMemoryStore) -> Task {
        Task::new(
            TaskId::first(),
            Arc::from("test"),
            op,
            Arc::new(store.clone()),
        )
    }

    #[tokio::test]
    async fn storage_handler_success() {
        let store = InMemoryStore::new();
        let op = Operation::write(ObjectRef::new("b", "k"), Payload::new(8, 1));
        let outcome = StorageHandler.handle(&task(op, &store)).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn storage_handler_maps_rejection() {
        let store = InMemoryStore::new();
        let op = Operation::read(ObjectRef::new("b", "missing"), None);
        let outcome = StorageHandler.handle(&task(op, &store)).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Rejected));
    }

    #[tokio::test]
    async fn storage_handler_maps_transport_error() {
        let store = InMemoryStore::new();
        store.disrupt("pod deleted");
        let op = Operation::delete(ObjectRef::new("b", "k"));
        let outcome = StorageHandler.handle(&task(op, &store)).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Transport));
        assert!(outcome.detail().contains("pod deleted"));
    }

    #[tokio::test]
    async fn storage_handler_detects_corruption() {
        let store = InMemoryStore::new();
        let target = ObjectRef::new("b", "k");
        let payload = Payload::new(32, 9);
        StorageHandler
            .handle(&task(Operation::write(target.clone(), payload), &store))
            .await;
        store.corrupt(&target);

        let verify = Operation::read(target, Some(payload.checksum()));
        let outcome = StorageHandler.handle(&task(verify, &store)).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Corruption));
    }

    #[tokio::test]
    async fn unverified_read_ignores_checksum() {
        let store = InMemoryStore::new();
        let target = ObjectRef::new("b", "k");
        StorageHandler
            .handle(&task(
                Operation::write(target.clone(), Payload::new(4, 2)),
                &store,
            ))
            .await;
        store.corrupt(&target);

        let outcome = StorageHandler
            .handle(&task(Operation::read(target, None), &store))
            .await;
        assert!(outcome.is_success());
    }

    #[test]
    fn task_debug_omits_client() {
        let store = InMemoryStore::new();
        let t = task(Operation::delete(ObjectRef::new("b", "k")), &store);
        let debug = format!("{:?}", t);
        assert!(debug.contains("TaskId(1)"));
        assert!(!debug.contains("InMemoryStore"));
    }
}
