//! # taxosync Model
//!
//! Typed record model for taxonomic checklist datasets.
//!
//! This crate provides:
//! - Identifiers: [`DatasetId`], [`RevisionId`], [`RecordKey`] and the
//!   128-bit [`IdentityHash`] used as the diff key
//! - A tagged field [`Value`] union with an explicit equality contract
//! - Per-kind [`KindSchema`]s declaring required and reference fields
//! - [`Record`] validation and [`Snapshot`] construction
//!
//! ## Invariants
//!
//! - `(dataset, kind, stable_id)` is unique within a snapshot
//! - References are stored as [`RecordKey`]s, never as object links
//! - Records only carry references in fields their schema declares
//! - Malformed references fail validation; dangling references are reported
//!   by [`Snapshot::dangling_references`] and left to the caller's policy

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod record;
mod schema;
mod snapshot;
mod value;

pub use error::{ModelResult, ValidationError};
pub use key::{DatasetId, IdentityHash, RecordKey, RecordKind, RevisionId};
pub use record::Record;
pub use schema::{KindSchema, RefSpec};
pub use snapshot::{DanglingReference, KindCounts, Snapshot};
pub use value::{Value, ValueTag};
