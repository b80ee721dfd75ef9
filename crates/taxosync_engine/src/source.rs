//! Record sources that hand the engine a complete snapshot.

use crate::error::{SyncError, SyncResult};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use taxosync_model::Snapshot;

/// Producer of a validated dataset snapshot.
///
/// A source yields the whole snapshot in a single pull; the engine never
/// diffs a partial record stream.
pub trait SnapshotSource: Send + Sync {
    /// Produces the snapshot.
    fn pull(&self) -> SyncResult<Snapshot>;
}

/// A snapshot serialized as JSON in a file.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    /// Creates a source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSource for JsonFileSource {
    fn pull(&self) -> SyncResult<Snapshot> {
        let file = File::open(&self.path)
            .map_err(|e| SyncError::source(format!("{}: {e}", self.path.display())))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SyncError::source(format!("{}: {e}", self.path.display())))
    }
}

/// A snapshot already in memory.
impl SnapshotSource for Snapshot {
    fn pull(&self) -> SyncResult<Snapshot> {
        Ok(self.clone())
    }
}
