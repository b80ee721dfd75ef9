//! Error types for relational stores and the transactional writer.

use taxosync_model::{DatasetId, RecordKey, RevisionId, ValidationError};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Name under which store failures surface in the synchronization error
/// taxonomy: any of them aborts the relational phase with a full rollback.
pub type TransactionError = StoreError;

/// Errors raised by a relational store or the writer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Field (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored records no longer form a valid snapshot.
    #[error("stored state is invalid: {0}")]
    Validation(#[from] ValidationError),

    /// A write would leave the store without referential integrity.
    #[error("constraint violated at {key}: {reason}")]
    Constraint {
        /// Record the violation was detected on.
        key: RecordKey,
        /// What was violated.
        reason: String,
    },

    /// The store's latest revision is not the change set's base.
    #[error("{dataset} is at revision {actual:?}, change set expects {expected:?}")]
    RevisionMismatch {
        /// Dataset being written.
        dataset: DatasetId,
        /// Source revision of the change set.
        expected: Option<RevisionId>,
        /// Latest revision recorded by the store.
        actual: Option<RevisionId>,
    },

    /// The run was cancelled before commit.
    #[error("transaction cancelled before commit")]
    Cancelled,

    /// Stored data could not be decoded.
    #[error("corrupt store data: {message}")]
    Corrupt {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },
}

impl StoreError {
    /// Creates a constraint violation.
    pub fn constraint(key: &RecordKey, reason: impl Into<String>) -> Self {
        Self::Constraint {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Creates a corrupt data error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
