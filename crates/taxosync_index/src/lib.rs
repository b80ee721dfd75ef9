//! # taxosync Index
//!
//! Keeps a search index consistent with the relational store.
//!
//! After a change set is committed, [`IndexSynchronizer::sync`] deletes the
//! documents of deleted records and upserts denormalized
//! [`IndexDocument`]s for inserted and updated records, read back from the
//! store. Failures are per record and never roll back the commit; the
//! failing identities are reported so a later [`IndexSynchronizer::retry`]
//! can re-issue only those operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod document;
mod error;
mod index;
mod memory;
mod synchronizer;

pub use config::IndexConfig;
pub use document::{IndexDocument, PARENT_FIELD};
pub use error::{IndexError, IndexOperationError, IndexResult};
pub use index::{OperationResult, SearchIndex};
pub use memory::MemoryIndex;
pub use synchronizer::{FailedOperation, IndexSynchronizer, SyncReport};
