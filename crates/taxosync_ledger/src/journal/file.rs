//! File-backed journal.

use super::backend::JournalBackend;
use crate::error::{LedgerError, LedgerResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in a single append-only file.
///
/// # Example
///
/// ```no_run
/// use taxosync_ledger::{FileJournal, JournalBackend};
/// use std::path::Path;
///
/// let mut journal = FileJournal::open(Path::new("ledger.log")).unwrap();
/// journal.append(b"framed record").unwrap();
/// journal.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileJournal {
    /// Opens or creates a journal file, creating parent directories.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalBackend for FileJournal {
    fn read_all(&self) -> LedgerResult<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> LedgerResult<u64> {
        let offset = self.size;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn sync(&mut self) -> LedgerResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> LedgerResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, len: u64) -> LedgerResult<()> {
        if len > self.size {
            return Err(LedgerError::ReadPastEnd {
                offset: len,
                len: 0,
                size: self.size,
            });
        }
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }
}
