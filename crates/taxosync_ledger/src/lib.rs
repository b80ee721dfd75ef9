//! # taxosync Ledger
//!
//! Append-only audit record of synchronization runs.
//!
//! Each run gets a [`RevisionEntry`] that moves through
//! `pending → committed → indexed`, or ends in `failed`, or parks in
//! `index-failed` until a retry pass succeeds. State changes are journaled
//! as CBOR-encoded [`LedgerEvent`]s in checksummed frames, so an entry's
//! history survives a restart.
//!
//! ```rust,no_run
//! use taxosync_ledger::{FileJournal, JournalBackend, LedgerConfig, RevisionLedger};
//!
//! let journal = FileJournal::open(std::path::Path::new("ledger.log"))?;
//! let size = journal.size()?;
//! let ledger = RevisionLedger::open(Box::new(journal), LedgerConfig::default())?;
//! println!("{} entries in {size} bytes", ledger.entries().len());
//! # Ok::<(), taxosync_ledger::LedgerError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
mod event;
mod journal;
mod ledger;

pub use entry::{RevisionEntry, RevisionStatus};
pub use error::{LedgerError, LedgerResult};
pub use event::LedgerEvent;
pub use journal::frame;
pub use journal::{FileJournal, JournalBackend, MemoryJournal};
pub use ledger::{LedgerConfig, RevisionLedger};
