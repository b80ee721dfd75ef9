//! Error types for the search index and the synchronizer.

use taxosync_store::StoreError;
use thiserror::Error;

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// A single document operation was rejected by the index.
///
/// Per-record and retryable: it never aborts the other operations of a
/// synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("index operation on {id} failed: {reason}")]
pub struct IndexOperationError {
    /// Document ID the operation targeted.
    pub id: String,
    /// Reason reported by the index.
    pub reason: String,
}

impl IndexOperationError {
    /// Creates an operation error.
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that stop a whole synchronization pass.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Reading current state from the relational store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The index rejected a dataset-wide operation.
    #[error("index service error: {0}")]
    Service(#[from] IndexOperationError),

    /// The worker pool could not be built.
    #[error("thread pool error: {message}")]
    ThreadPool {
        /// Description of the failure.
        message: String,
    },
}
