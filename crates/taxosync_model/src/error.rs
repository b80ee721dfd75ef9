//! Validation errors for records and snapshots.

use crate::key::{DatasetId, RecordKey, RecordKind};
use crate::value::ValueTag;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ValidationError>;

/// A record or snapshot failed validation.
///
/// Validation failures are fatal to a synchronization run and are raised
/// before any write is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The stable ID is empty or contains control characters.
    #[error("invalid stable id for {key}: {reason}")]
    InvalidStableId {
        /// The offending record.
        key: RecordKey,
        /// Why the ID was rejected.
        reason: String,
    },

    /// A required field is absent or null.
    #[error("{key} is missing required field '{field}'")]
    MissingField {
        /// The offending record.
        key: RecordKey,
        /// The missing field.
        field: String,
    },

    /// A non-nullable reference field is null.
    #[error("{key} has null reference in non-nullable field '{field}'")]
    NullReference {
        /// The offending record.
        key: RecordKey,
        /// The reference field.
        field: String,
    },

    /// A reference field holds something other than a well-formed reference.
    #[error("{key} has malformed reference in field '{field}': {reason}")]
    MalformedReference {
        /// The offending record.
        key: RecordKey,
        /// The reference field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A reference points at a record of the wrong kind.
    #[error("{key} field '{field}' must reference a {expected}, found {actual}")]
    WrongReferenceKind {
        /// The offending record.
        key: RecordKey,
        /// The reference field.
        field: String,
        /// Kind declared by the schema.
        expected: RecordKind,
        /// Kind found in the value.
        actual: RecordKind,
    },

    /// A decimal field holds NaN or an infinity.
    #[error("{key} field '{field}' holds a non-finite decimal")]
    NonFiniteDecimal {
        /// The offending record.
        key: RecordKey,
        /// The field.
        field: String,
    },

    /// A field not declared as a reference holds a reference.
    #[error("{key} field '{field}' is not a reference field but holds a {tag}")]
    UnexpectedReference {
        /// The offending record.
        key: RecordKey,
        /// The field.
        field: String,
        /// Tag of the value found.
        tag: ValueTag,
    },

    /// The same identity occurs twice in a snapshot.
    #[error("duplicate record {key} in snapshot")]
    DuplicateRecord {
        /// The duplicated identity.
        key: RecordKey,
    },

    /// A record belongs to a different dataset than its snapshot.
    #[error("{key} belongs to {actual}, snapshot is for {expected}")]
    DatasetMismatch {
        /// The offending record.
        key: RecordKey,
        /// Dataset of the snapshot.
        expected: DatasetId,
        /// Dataset of the record.
        actual: DatasetId,
    },

    /// Two distinct identities produced the same identity hash.
    #[error("identity hash collision between {first} and {second}")]
    HashCollision {
        /// First identity.
        first: RecordKey,
        /// Second identity.
        second: RecordKey,
    },

    /// An incoming snapshot carries no revision.
    #[error("snapshot for {dataset} has no revision")]
    MissingRevision {
        /// Dataset of the snapshot.
        dataset: DatasetId,
    },
}

impl ValidationError {
    /// Returns the record the error is about, if any.
    #[must_use]
    pub fn key(&self) -> Option<&RecordKey> {
        match self {
            Self::InvalidStableId { key, .. }
            | Self::MissingField { key, .. }
            | Self::NullReference { key, .. }
            | Self::MalformedReference { key, .. }
            | Self::WrongReferenceKind { key, .. }
            | Self::UnexpectedReference { key, .. }
            | Self::NonFiniteDecimal { key, .. }
            | Self::DuplicateRecord { key }
            | Self::DatasetMismatch { key, .. } => Some(key),
            Self::HashCollision { first, .. } => Some(first),
            Self::MissingRevision { .. } => None,
        }
    }
}
