//! In-memory object store for simulations and tests.
//!
//! Behaves like a tiny S3: objects keyed by bucket/key, server-side copy,
//! multipart parts. It can be told to misbehave the way a cluster does
//! while pods are being destroyed.

use super::{OpResponse, StorageClient};
use async_trait::async_trait;
use faultline_types::{checksum_of, ObjectRef, Operation, OperationKind, StorageError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// In-memory store.
///
/// Clones share the same state, so a test can hold one handle while the
/// harness drives another.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    objects: HashMap<ObjectRef, Vec<u8>>,
    parts: BTreeMap<(ObjectRef, u32), Vec<u8>>,
    /// Every request fails while set.
    disrupted: Option<String>,
    /// Components currently down; requests are still served.
    degraded: Vec<String>,
    latency: Duration,
    fail_next: VecDeque<String>,
    operations_total: u64,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that sleeps `latency` before each request.
    pub fn with_latency(latency: Duration) -> Self {
        let store = Self::new();
        store.lock().latency = latency;
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every request fail until [`end_disruption`](Self::end_disruption).
    pub fn disrupt(&self, reason: &str) {
        self.lock().disrupted = Some(reason.to_string());
    }

    /// Stop failing requests.
    pub fn end_disruption(&self) {
        self.lock().disrupted = None;
    }

    /// Returns true while requests are being failed.
    pub fn is_disrupted(&self) -> bool {
        self.lock().disrupted.is_some()
    }

    /// Record a component as down while continuing to serve requests.
    pub fn mark_degraded(&self, component: &str) {
        let mut inner = self.lock();
        if !inner.degraded.iter().any(|c| c == component) {
            inner.degraded.push(component.to_string());
        }
    }

    /// Bring a degraded component back.
    ///
    /// Returns false if the component was not degraded.
    pub fn restore_component(&self, component: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.degraded.len();
        inner.degraded.retain(|c| c != component);
        inner.degraded.len() != before
    }

    /// Components currently marked degraded.
    pub fn degraded_components(&self) -> Vec<String> {
        self.lock().degraded.clone()
    }

    /// Reject the next request with `detail`.
    pub fn fail_next(&self, detail: &str) {
        self.lock().fail_next.push_back(detail.to_string());
    }

    /// Flip one byte of a stored object. Returns false if it does not exist.
    pub fn corrupt(&self, target: &ObjectRef) -> bool {
        let mut inner = self.lock();
        match inner.objects.get_mut(target) {
            Some(data) if !data.is_empty() => {
                data[0] ^= 0xff;
                true
            }
            Some(data) => {
                data.push(0xff);
                true
            }
            None => false,
        }
    }

    /// Returns true if the object exists.
    pub fn contains(&self, target: &ObjectRef) -> bool {
        self.lock().objects.contains_key(target)
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Part numbers uploaded for a multipart target, in order.
    pub fn uploaded_parts(&self, target: &ObjectRef) -> Vec<u32> {
        self.lock()
            .parts
            .keys()
            .filter(|(obj, _)| obj == target)
            .map(|(_, part)| *part)
            .collect()
    }

    /// Total requests received, including failed ones.
    pub fn operations_total(&self) -> u64 {
        self.lock().operations_total
    }

    fn apply(&self, operation: &Operation) -> Result<OpResponse, StorageError> {
        let mut inner = self.lock();
        inner.operations_total += 1;

        if let Some(reason) = &inner.disrupted {
            return Err(StorageError::Service {
                status: 503,
                message: format!("service unavailable: {}", reason),
            });
        }
        if let Some(detail) = inner.fail_next.pop_front() {
            return Ok(OpResponse::rejected(detail));
        }

        let target = &operation.target;
        match operation.kind {
            OperationKind::Write => {
                let payload = operation.payload.ok_or_else(|| {
                    StorageError::InvalidRequest(format!("write to {} without payload", target))
                })?;
                let data = payload.bytes();
                let etag = checksum_of(&data);
                inner.objects.insert(target.clone(), data);
                Ok(OpResponse::ok(format!("etag={}", &etag[..16])))
            }
            OperationKind::Read => match inner.objects.get(target) {
                Some(data) => Ok(OpResponse::ok(format!("{} bytes", data.len()))
                    .with_checksum(checksum_of(data))),
                None => Ok(OpResponse::rejected(format!("NoSuchKey: {}", target))),
            },
            OperationKind::Delete => match inner.objects.remove(target) {
                Some(_) => Ok(OpResponse::ok("deleted")),
                // S3 deletes are idempotent.
                None => Ok(OpResponse::ok("absent")),
            },
            OperationKind::Copy => {
                let destination = operation.destination.clone().ok_or_else(|| {
                    StorageError::InvalidRequest(format!("copy of {} without destination", target))
                })?;
                match inner.objects.get(target).cloned() {
                    Some(data) => {
                        inner.objects.insert(destination.clone(), data);
                        Ok(OpResponse::ok(format!("copied to {}", destination)))
                    }
                    None => Ok(OpResponse::rejected(format!("NoSuchKey: {}", target))),
                }
            }
            OperationKind::MultipartPart => {
                let (Some(part), Some(payload)) = (operation.part_number, operation.payload)
                else {
                    return Err(StorageError::InvalidRequest(format!(
                        "multipart upload to {} needs part number and payload",
                        target
                    )));
                };
                inner.parts.insert((target.clone(), part), payload.bytes());
                Ok(OpResponse::ok(format!("part {}", part)))
            }
        }
    }
}

#[async_trait]
impl StorageClient for InMemoryStore {
    async fn perform_operation(&self, operation: &Operation) -> Result<OpResponse, StorageError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.apply(operation)
    }
}
