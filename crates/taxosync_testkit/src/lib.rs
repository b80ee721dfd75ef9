//! # taxosync Testkit
//!
//! Test utilities for taxosync.
//!
//! This crate provides:
//! - Record builders and scenario snapshots
//! - A matrix of relational stores ([`TestStores`])
//! - Fault-injecting collaborators ([`FlakyIndex`], [`FailingStore`])
//! - Property-based snapshot generators using proptest

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
