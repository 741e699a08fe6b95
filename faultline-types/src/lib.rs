//! # faultline-types
//!
//! Shared types for the faultline fault-window harness.
//!
//! This crate provides the vocabulary used across all faultline crates:
//! - [`TaskId`], [`ObjectRef`], [`StoredObject`] - Identity types
//! - [`Operation`], [`OperationKind`], [`Payload`] - Storage operation descriptors
//! - [`OperationResult`], [`Outcome`], [`WindowPhase`] - Per-operation results
//! - [`StorageError`], [`FaultError`] - Errors raised by external collaborators

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod operation;
mod outcome;

pub use error::{FaultError, StorageError};
pub use ids::{ObjectRef, StoredObject, TaskId};
pub use operation::{checksum_of, Operation, OperationKind, Payload};
pub use outcome::{FailureKind, OperationResult, Outcome, WindowPhase};
