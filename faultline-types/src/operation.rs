//! Storage operation descriptors.
//!
//! An [`Operation`] describes one object-level I/O against the store under
//! test. Payload bytes are never carried around: a [`Payload`] is a size
//! plus a seed, and the bytes are regenerated deterministically wherever
//! they are needed (the store on write, the checksum on verify).

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::ids::{ObjectRef, StoredObject};

/// Kind of storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// GET an object and verify its content.
    Read,
    /// PUT an object.
    Write,
    /// DELETE an object.
    Delete,
    /// Server-side copy to another key.
    Copy,
    /// Upload one part of a multipart upload.
    MultipartPart,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Copy => "copy",
            Self::MultipartPart => "multipart_part",
        };
        f.write_str(name)
    }
}

/// Deterministic payload description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Number of bytes.
    pub size: usize,
    /// Seed for the byte generator.
    pub seed: u64,
}

impl Payload {
    /// Create a payload description.
    pub fn new(size: usize, seed: u64) -> Self {
        Self { size, seed }
    }

    /// Generate the payload bytes.
    ///
    /// The same `(size, seed)` always yields the same bytes.
    pub fn bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.size];
        StdRng::seed_from_u64(self.seed).fill_bytes(&mut data);
        data
    }

    /// Hex SHA-256 of the generated bytes.
    pub fn checksum(&self) -> String {
        checksum_of(&self.bytes())
    }
}

/// Hex SHA-256 of a byte slice.
pub fn checksum_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// One storage operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// What to do.
    pub kind: OperationKind,
    /// Object the operation acts on (source object for copies).
    pub target: ObjectRef,
    /// Copy destination.
    pub destination: Option<ObjectRef>,
    /// Part number for multipart uploads (1-based).
    pub part_number: Option<u32>,
    /// Bytes to upload for writes and multipart parts.
    pub payload: Option<Payload>,
    /// Checksum a read must return for the data to count as intact.
    pub expected_checksum: Option<String>,
}

impl Operation {
    fn bare(kind: OperationKind, target: ObjectRef) -> Self {
        Self {
            kind,
            target,
            destination: None,
            part_number: None,
            payload: None,
            expected_checksum: None,
        }
    }

    /// PUT `payload` at `target`.
    pub fn write(target: ObjectRef, payload: Payload) -> Self {
        Self {
            payload: Some(payload),
            ..Self::bare(OperationKind::Write, target)
        }
    }

    /// GET `target`, optionally verifying the returned checksum.
    pub fn read(target: ObjectRef, expected_checksum: Option<String>) -> Self {
        Self {
            expected_checksum,
            ..Self::bare(OperationKind::Read, target)
        }
    }

    /// GET a previously written object and verify it.
    pub fn verify(object: &StoredObject) -> Self {
        Self::read(object.target.clone(), Some(object.checksum.clone()))
    }

    /// DELETE `target`.
    pub fn delete(target: ObjectRef) -> Self {
        Self::bare(OperationKind::Delete, target)
    }

    /// Copy `source` to `destination`.
    pub fn copy(source: ObjectRef, destination: ObjectRef) -> Self {
        Self {
            destination: Some(destination),
            ..Self::bare(OperationKind::Copy, source)
        }
    }

    /// Upload part `part_number` of a multipart upload into `target`.
    pub fn multipart_part(target: ObjectRef, part_number: u32, payload: Payload) -> Self {
        Self {
            part_number: Some(part_number),
            payload: Some(payload),
            ..Self::bare(OperationKind::MultipartPart, target)
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target)?;
        if let Some(dest) = &self.destination {
            write!(f, " -> {}", dest)?;
        }
        if let Some(part) = self.part_number {
            write!(f, " part={}", part)?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " ({} bytes)", payload.size)?;
        }
        Ok(())
    }
}
