//! # taxosync Engine
//!
//! Revision synchronization for taxonomic checklist datasets.
//!
//! A run takes the next snapshot of a dataset and moves the relational
//! store and the search index to it:
//!
//! 1. take the dataset's exclusion lock
//! 2. diff the snapshot against the committed state
//! 3. commit the change set in one transaction, then release the lock
//! 4. propagate the change set to the search index
//!
//! The [`RevisionLedger`](taxosync_ledger::RevisionLedger) records both
//! phases. A failed relational phase leaves the store untouched and the
//! entry `failed`; a failed index phase leaves the entry `index-failed`
//! with the stale identities, for [`SyncEngine::retry_index_failures`].
//!
//! ## Key Invariants
//!
//! - Relational commit always precedes index propagation
//! - At most one run per dataset is in its relational phase
//! - Re-running a committed revision is a no-op
//! - The relational store is the source of truth for index documents

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod lock;
mod source;

pub use config::{EngineConfig, LockPolicy, RetryConfig};
pub use engine::{EngineStats, Recovery, RetryPass, RunOutcome, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use lock::{DatasetGuard, DatasetLocks};
pub use source::{JsonFileSource, SnapshotSource};
