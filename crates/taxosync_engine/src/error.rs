//! Error types for the synchronization engine.

use taxosync_diff::{DiffError, ReferentialError};
use taxosync_index::IndexError;
use taxosync_ledger::{LedgerError, RevisionStatus};
use taxosync_model::{DatasetId, ValidationError};
use taxosync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a synchronization run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A record or snapshot is malformed. No write was attempted.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The target snapshot has a dangling reference or a cycle. No write
    /// was attempted.
    #[error("referential error: {0}")]
    Referential(#[from] ReferentialError),

    /// The diff could not be computed.
    #[error("diff error: {0}")]
    Diff(DiffError),

    /// The store rejected the transaction; it was rolled back.
    #[error("transaction error: {0}")]
    Transaction(#[from] StoreError),

    /// The index pass could not run at all.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// The ledger refused or failed to record a state change.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Another run holds the dataset.
    #[error("a synchronization run for {dataset} is already in flight")]
    LockContention {
        /// The contended dataset.
        dataset: DatasetId,
    },

    /// The record source could not produce a snapshot.
    #[error("record source error: {message}")]
    Source {
        /// Error message.
        message: String,
    },

    /// The entry is not waiting for an index retry.
    #[error("revision entry #{entry} is {status}, not index-failed")]
    NotRetryable {
        /// The entry.
        entry: u64,
        /// Its current status.
        status: RevisionStatus,
    },

    /// No ledger entry with this ID exists.
    #[error("unknown revision entry #{entry}")]
    UnknownEntry {
        /// The requested entry.
        entry: u64,
    },
}

impl From<DiffError> for SyncError {
    fn from(err: DiffError) -> Self {
        match err {
            DiffError::Validation(e) => Self::Validation(e),
            DiffError::Referential(e) => Self::Referential(e),
            other => Self::Diff(other),
        }
    }
}

impl SyncError {
    /// Creates a record source error.
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }

    /// Returns true if the caller may retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention { .. } | Self::Index(_))
    }

    /// Returns true if the run was refused because the dataset is busy.
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}
