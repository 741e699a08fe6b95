//! Operation sources for workload drivers.
//!
//! A source hands out the next operation of a stream, or `None` once the
//! stream is exhausted. Sources are owned by exactly one driver and are
//! pulled sequentially, so they need `Send` but not `Sync`.
//!
//! Any `FnMut(TaskId) -> Option<Operation>` closure is a source.

use faultline_types::{ObjectRef, Operation, Payload, StoredObject, TaskId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

use crate::config::WorkloadConfig;

/// Produces the operations of one workload stream.
pub trait OperationSource: Send + 'static {
    /// Operation for task `id`, or `None` when the stream is exhausted.
    fn next_operation(&mut self, id: TaskId) -> Option<Operation>;
}

impl<F> OperationSource for F
where
    F: FnMut(TaskId) -> Option<Operation> + Send + 'static,
{
    fn next_operation(&mut self, id: TaskId) -> Option<Operation> {
        self(id)
    }
}

/// Writes objects of random size spread across a set of buckets.
///
/// Payloads are derived from a seeded RNG, so the same seed reproduces
/// the same object names, sizes and contents.
#[derive(Debug)]
pub struct WriteWorkload {
    rng: StdRng,
    buckets: Vec<String>,
    key_prefix: String,
    min_size: usize,
    max_size: usize,
}

impl WriteWorkload {
    /// Workload over `buckets` named `{prefix}-{n}`.
    pub fn from_config(config: &WorkloadConfig, seed: u64) -> Self {
        let buckets = (0..config.buckets.max(1))
            .map(|n| format!("{}-{}", config.bucket_prefix, n))
            .collect();
        Self {
            rng: StdRng::seed_from_u64(seed),
            buckets,
            key_prefix: "obj".to_string(),
            min_size: config.min_object_size,
            max_size: config.max_object_size.max(config.min_object_size),
        }
    }

    /// Prefix for generated keys (default: "obj").
    ///
    /// Streams writing concurrently should use distinct prefixes.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    /// Bucket names this workload writes to.
    pub fn buckets(&self) -> &[String] {
        &self.buckets
    }
}

impl OperationSource for WriteWorkload {
    fn next_operation(&mut self, id: TaskId) -> Option<Operation> {
        let bucket = &self.buckets[self.rng.gen_range(0..self.buckets.len())];
        let size = self.rng.gen_range(self.min_size..=self.max_size);
        let target = ObjectRef::new(bucket.as_str(), format!("{}-{}", self.key_prefix, id.seq()));
        Some(Operation::write(target, Payload::new(size, self.rng.gen())))
    }
}

/// Reads back previously written objects, verifying each checksum.
///
/// Cycles over the objects indefinitely; empty input yields nothing.
#[derive(Debug, Clone)]
pub struct ReadWorkload {
    objects: Vec<StoredObject>,
    cursor: usize,
}

impl ReadWorkload {
    /// Workload over `objects`.
    pub fn new(objects: Vec<StoredObject>) -> Self {
        Self { objects, cursor: 0 }
    }
}

impl OperationSource for ReadWorkload {
    fn next_operation(&mut self, _id: TaskId) -> Option<Operation> {
        if self.objects.is_empty() {
            return None;
        }
        let object = &self.objects[self.cursor % self.objects.len()];
        self.cursor += 1;
        Some(Operation::verify(object))
    }
}

/// Deletes each target once, in order.
#[derive(Debug, Clone)]
pub struct DeleteWorkload {
    targets: VecDeque<ObjectRef>,
}

impl DeleteWorkload {
    /// Delete `targets`.
    pub fn new(targets: impl IntoIterator<Item = ObjectRef>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    /// Delete every object in `objects`.
    pub fn from_written(objects: &[StoredObject]) -> Self {
        Self::new(objects.iter().map(|o| o.target.clone()))
    }
}

impl OperationSource for DeleteWorkload {
    fn next_operation(&mut self, _id: TaskId) -> Option<Operation> {
        self.targets.pop_front().map(Operation::delete)
    }
}

/// Server-side copies of existing objects to fresh keys in the same bucket.
#[derive(Debug, Clone)]
pub struct CopyWorkload {
    sources: Vec<ObjectRef>,
}

impl CopyWorkload {
    /// Copy from `sources`, cycling over them.
    pub fn new(sources: Vec<ObjectRef>) -> Self {
        Self { sources }
    }
}

impl OperationSource for CopyWorkload {
    fn next_operation(&mut self, id: TaskId) -> Option<Operation> {
        if self.sources.is_empty() {
            return None;
        }
        let index = (id.seq() as usize - 1) % self.sources.len();
        let source = self.sources[index].clone();
        let destination = ObjectRef::new(
            source.bucket.as_str(),
            format!("{}-copy-{}", source.key, id.seq()),
        );
        Some(Operation::copy(source, destination))
    }
}

/// Uploads the parts of one multipart object, then stops.
#[derive(Debug, Clone)]
pub struct MultipartWorkload {
    target: ObjectRef,
    part_size: usize,
    parts: u32,
    seed: u64,
    next_part: u32,
}

impl MultipartWorkload {
    /// Upload `parts` parts of `part_size` bytes into `target`.
    pub fn new(target: ObjectRef, part_size: usize, parts: u32, seed: u64) -> Self {
        Self {
            target,
            part_size,
            parts,
            seed,
            next_part: 1,
        }
    }
}

impl OperationSource for MultipartWorkload {
    fn next_operation(&mut self, _id: TaskId) -> Option<Operation> {
        if self.next_part > self.parts {
            return None;
        }
        let part = self.next_part;
        self.next_part += 1;
        let payload = Payload::new(self.part_size, self.seed.wrapping_add(part as u64));
        Some(Operation::multipart_part(self.target.clone(), part, payload))
    }
}

/// A fixed list of operations, issued in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorkload {
    operations: VecDeque<Operation>,
}

impl ScriptedWorkload {
    /// Issue `operations` in order.
    pub fn new(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
        }
    }

    /// Operations not yet issued.
    pub fn remaining(&self) -> usize {
        self.operations.len()
    }
}

impl OperationSource for ScriptedWorkload {
    fn next_operation(&mut self, _id: TaskId) -> Option<Operation> {
        self.operations.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_types::OperationKind;

    fn small_config() -> WorkloadConfig {
        WorkloadConfig {
            buckets: 3,
            bucket_prefix: "b".to_string(),
            min_object_size: 10,
            max_object_size: 20,
            pace_ms: 0,
        }
    }

    fn take(source: &mut dyn OperationSource, n: u64) -> Vec<Operation> {
        let mut id = TaskId::first();
        let mut out = Vec::new();
        for _ in 0..n {
            match source.next_operation(id) {
                Some(op) => out.push(op),
                None => break,
            }
            id = id.next();
        }
        out
    }

    #[test]
    fn writes_respect_config() {
        let mut workload = WriteWorkload::from_config(&small_config(), 42);
        assert_eq!(workload.buckets(), ["b-0", "b-1", "b-2"]);

        for op in take(&mut workload, 50) {
            assert_eq!(op.kind, OperationKind::Write);
            assert!(["b-0", "b-1", "b-2"].contains(&op.target.bucket.as_str()));
            let size = op.payload.unwrap().size;
            assert!((10..=20).contains(&size));
        }
    }

    #[test]
    fn writes_are_reproducible() {
        let a = take(&mut WriteWorkload::from_config(&small_config(), 7), 10);
        let b = take(&mut WriteWorkload::from_config(&small_config(), 7), 10);
        assert_eq!(a, b);
    }

    #[test]
    fn write_keys_follow_task_ids() {
        let mut workload = WriteWorkload::from_config(&small_config(), 1).with_key_prefix("w");
        let ops = take(&mut workload, 3);
        let keys: Vec<_> = ops.iter().map(|o| o.target.key.as_str()).collect();
        assert_eq!(keys, ["w-1", "w-2", "w-3"]);
    }

    #[test]
    fn reads_cycle_and_verify() {
        let objects = vec![
            StoredObject {
                target: ObjectRef::new("b", "x"),
                checksum: "aa".into(),
                size: 1,
            },
            StoredObject {
                target: ObjectRef::new("b", "y"),
                checksum: "bb".into(),
                size: 1,
            },
        ];
        let ops = take(&mut ReadWorkload::new(objects), 5);
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[0].target.key, "x");
        assert_eq!(ops[1].target.key, "y");
        assert_eq!(ops[2].target.key, "x");
        assert_eq!(ops[1].expected_checksum.as_deref(), Some("bb"));
    }

    #[test]
    fn empty_sources_are_exhausted() {
        assert!(take(&mut ReadWorkload::new(Vec::new()), 3).is_empty());
        assert!(take(&mut CopyWorkload::new(Vec::new()), 3).is_empty());
        assert!(take(&mut ScriptedWorkload::default(), 3).is_empty());
    }

    #[test]
    fn deletes_each_target_once() {
        let mut workload = DeleteWorkload::new([ObjectRef::new("b", "1"), ObjectRef::new("b", "2")]);
        let ops = take(&mut workload, 10);
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|o| o.kind == OperationKind::Delete));
    }

    #[test]
    fn copies_go_to_fresh_keys() {
        let mut workload = CopyWorkload::new(vec![ObjectRef::new("b", "src")]);
        let ops = take(&mut workload, 2);
        assert_eq!(ops[0].destination, Some(ObjectRef::new("b", "src-copy-1")));
        assert_eq!(ops[1].destination, Some(ObjectRef::new("b", "src-copy-2")));
    }

    #[test]
    fn multipart_uploads_numbered_parts() {
        let mut workload = MultipartWorkload::new(ObjectRef::new("b", "big"), 64, 3, 9);
        let ops = take(&mut workload, 10);
        let parts: Vec<_> = ops.iter().map(|o| o.part_number.unwrap()).collect();
        assert_eq!(parts, [1, 2, 3]);
        assert_ne!(ops[0].payload, ops[1].payload);
    }

    #[test]
    fn closures_are_sources() {
        let mut source = |id: TaskId| {
            (id.seq() <= 2).then(|| Operation::delete(ObjectRef::new("b", id.to_string())))
        };
        let ops = take(&mut source, 5);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].target.key, "task-2");
    }
}
