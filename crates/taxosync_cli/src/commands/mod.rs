//! CLI command implementations.

pub mod diff;
pub mod ledger;
pub mod sync;
pub mod validate;
