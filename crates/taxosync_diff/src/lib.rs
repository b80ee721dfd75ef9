//! # taxosync Diff
//!
//! Structural diff between two snapshots of a dataset.
//!
//! [`diff`] classifies every identity of both snapshots as inserted,
//! deleted, updated (with a per-field delta) or unchanged, and orders the
//! write groups so that applying them never observes a broken reference:
//! insertions and updates parents first, deletions children first.
//!
//! The engine is pure: it performs no I/O and fails before any write with a
//! [`DiffError`] if the target snapshot's references do not resolve.
//!
//! ```rust
//! use taxosync_diff::diff;
//! use taxosync_model::{DatasetId, Record, RecordKind, RevisionId, Snapshot};
//!
//! let ds = DatasetId::new(1);
//! let name = Record::new(ds, RecordKind::Name, "N1")
//!     .with_field("scientificName", "Abies alba")
//!     .with_field("rank", "species");
//! let next = Snapshot::new(ds, RevisionId::new(1), vec![name]).unwrap();
//!
//! let change_set = diff(&Snapshot::empty(ds), &next).unwrap();
//! assert_eq!(change_set.counts().inserted, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changeset;
mod diff;
mod error;
mod order;

pub use changeset::{
    ChangeCounts, ChangeKind, ChangeSet, FieldChange, Operation, RecordUpdate,
};
pub use diff::{diff, field_changes};
pub use error::{DiffError, DiffResult, ReferentialError};
pub use order::{forward_order, reverse_order};
