//! Append-only journal storage for ledger events.

mod backend;
mod file;
pub mod frame;
mod memory;

pub use backend::JournalBackend;
pub use file::FileJournal;
pub use memory::MemoryJournal;
