//! Error types for the revision ledger.

use crate::entry::RevisionStatus;
use std::io;
use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur in the revision ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the journal.
    #[error("read beyond end of journal: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current journal size.
        size: u64,
    },

    /// The journal holds bytes that are not a valid record.
    #[error("journal corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch on a journal record.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// An event could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// An event could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// No entry with this ID exists.
    #[error("unknown revision entry #{entry}")]
    UnknownEntry {
        /// The requested entry.
        entry: u64,
    },

    /// The requested status change is not allowed.
    #[error("revision entry #{entry} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The entry.
        entry: u64,
        /// Current status.
        from: RevisionStatus,
        /// Requested status.
        to: RevisionStatus,
    },
}

impl LedgerError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Returns true if the error is a refused status change.
    #[must_use]
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
