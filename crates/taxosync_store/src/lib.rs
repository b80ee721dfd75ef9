//! # taxosync Store
//!
//! Relational persistence for checklist datasets and the transactional
//! writer that applies change sets to it.
//!
//! This crate provides:
//! - The [`RelationalStore`] / [`StoreTransaction`] interface
//! - [`MemoryStore`] for tests and database-less runs
//! - [`SqliteStore`] with deferred foreign keys on record references
//! - [`TransactionalWriter`], which applies a [`ChangeSet`] atomically and
//!   refuses to apply it twice
//!
//! [`ChangeSet`]: taxosync_diff::ChangeSet

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod error;
mod memory;
mod sqlite;
mod store;
mod writer;

pub use cancel::CancelToken;
pub use error::{StoreError, StoreResult, TransactionError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{Referrer, RelationalStore, StoreTransaction};
pub use writer::{CommitResult, TransactionalWriter};
