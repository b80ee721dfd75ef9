//! Journal backend trait.

use crate::error::LedgerResult;

/// Append-only byte storage holding the ledger journal.
///
/// Backends only store bytes; framing and checksums live in
/// [`frame`](super::frame).
pub trait JournalBackend: Send + Sync {
    /// Reads the whole journal.
    fn read_all(&self) -> LedgerResult<Vec<u8>>;

    /// Appends bytes at the end, returning the offset they were written at.
    fn append(&mut self, data: &[u8]) -> LedgerResult<u64>;

    /// Makes appended bytes durable.
    fn sync(&mut self) -> LedgerResult<()>;

    /// Returns the journal size in bytes.
    fn size(&self) -> LedgerResult<u64>;

    /// Cuts the journal back to `len` bytes, dropping a torn tail.
    fn truncate(&mut self, len: u64) -> LedgerResult<()>;
}
