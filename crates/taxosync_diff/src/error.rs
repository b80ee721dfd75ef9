//! Error types for the diff engine.

use taxosync_model::{DanglingReference, DatasetId, RecordKey, RevisionId, ValidationError};
use thiserror::Error;

/// Result type for diff operations.
pub type DiffResult<T> = Result<T, DiffError>;

/// The reference graph of a target snapshot is broken.
///
/// Raised before any write: the run aborts and nothing is nulled silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferentialError {
    /// References whose target is absent from the target snapshot.
    #[error("{} dangling reference(s) in {dataset}, first: {} -> {}", references.len(), describe_first(references), first_target(references))]
    Dangling {
        /// Dataset of the snapshot.
        dataset: DatasetId,
        /// Every dangling reference found.
        references: Vec<DanglingReference>,
    },

    /// Records that reference each other in a loop.
    #[error("reference cycle among {} record(s), starting at {}", keys.len(), keys.first().map(ToString::to_string).unwrap_or_default())]
    Cycle {
        /// Records that could not be ordered.
        keys: Vec<RecordKey>,
    },
}

fn describe_first(references: &[DanglingReference]) -> String {
    references
        .first()
        .map(|r| format!("{}.{}", r.from, r.field))
        .unwrap_or_default()
}

fn first_target(references: &[DanglingReference]) -> String {
    references
        .first()
        .map(|r| r.target.to_string())
        .unwrap_or_default()
}

/// Errors raised by the diff engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// A record or snapshot is malformed.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The target snapshot's references do not resolve or form a cycle.
    #[error("referential error: {0}")]
    Referential(#[from] ReferentialError),

    /// The two snapshots belong to different datasets.
    #[error("cannot diff {previous} against {next}")]
    DatasetMismatch {
        /// Dataset of the previous snapshot.
        previous: DatasetId,
        /// Dataset of the next snapshot.
        next: DatasetId,
    },

    /// A change set was applied to a snapshot at the wrong revision.
    #[error("change set expects base revision {expected:?}, snapshot is at {actual:?}")]
    RevisionMismatch {
        /// Source revision of the change set.
        expected: Option<RevisionId>,
        /// Revision of the snapshot.
        actual: Option<RevisionId>,
    },

    /// A change set does not fit the snapshot it is applied to.
    #[error("change set conflicts with base at {key}: {reason}")]
    BaseConflict {
        /// The conflicting record.
        key: RecordKey,
        /// What did not match.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_display_names_first_reference() {
        let err = ReferentialError::Dangling {
            dataset: DatasetId::new(1),
            references: vec![DanglingReference {
                from: RecordKey::taxon("T2"),
                field: "parent".into(),
                target: RecordKey::taxon("T1"),
            }],
        };
        assert_eq!(
            err.to_string(),
            "1 dangling reference(s) in dataset:1, first: taxon:T2.parent -> taxon:T1"
        );
    }

    #[test]
    fn cycle_display() {
        let err = ReferentialError::Cycle {
            keys: vec![RecordKey::taxon("A"), RecordKey::taxon("B")],
        };
        assert!(err.to_string().contains("2 record(s)"));
        assert!(err.to_string().contains("taxon:A"));
    }
}
