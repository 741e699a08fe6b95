//! Storage client abstraction.
//!
//! The harness never talks to a real object store itself. It drives a
//! [`StorageClient`] supplied by the scenario, which must tolerate being
//! called from every worker at once.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryStore::new());
//! let response = store
//!     .perform_operation(&Operation::write(ObjectRef::new("b", "k"), Payload::new(16, 1)))
//!     .await?;
//! assert!(response.success);
//! ```

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use faultline_types::{Operation, StorageError};

/// Response from the store for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResponse {
    /// Whether the store reports the operation as successful.
    pub success: bool,
    /// Detail for logs (etag, error body, request id).
    pub detail: String,
    /// Hex SHA-256 of the object content returned by a read.
    pub checksum: Option<String>,
}

impl OpResponse {
    /// Successful response.
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            checksum: None,
        }
    }

    /// Unsuccessful response.
    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            checksum: None,
        }
    }

    /// Attach the checksum of returned content.
    pub fn with_checksum(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// Client for the object store under test.
///
/// Implementations must be safe for concurrent use and may return
/// `Err` for transport problems.
#[async_trait]
pub trait StorageClient: Send + Sync + 'static {
    /// Perform one operation against the store.
    async fn perform_operation(&self, operation: &Operation) -> Result<OpResponse, StorageError>;
}
