//! In-memory journal.

use super::backend::JournalBackend;
use crate::error::{LedgerError, LedgerResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A journal kept in memory.
///
/// Clones share the same bytes, so a test can drop a ledger and reopen it
/// from a clone to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal holding existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the journal bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&self) -> LedgerResult<Vec<u8>> {
        Ok(self.data())
    }

    fn append(&mut self, bytes: &[u8]) -> LedgerResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> LedgerResult<()> {
        Ok(())
    }

    fn size(&self) -> LedgerResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, len: u64) -> LedgerResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if len > size {
            return Err(LedgerError::ReadPastEnd {
                offset: len,
                len: 0,
                size,
            });
        }
        data.truncate(len as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_bytes() {
        let mut journal = MemoryJournal::new();
        let view = journal.clone();
        assert_eq!(journal.append(b"abc").unwrap(), 0);
        assert_eq!(journal.append(b"de").unwrap(), 3);
        assert_eq!(view.read_all().unwrap(), b"abcde");
    }

    #[test]
    fn truncate_bounds() {
        let mut journal = MemoryJournal::with_data(b"abcdef".to_vec());
        journal.truncate(2).unwrap();
        assert_eq!(journal.size().unwrap(), 2);
        assert!(journal.truncate(10).is_err());
    }
}
