//! Relational store interface.

use crate::error::StoreResult;
use taxosync_model::{DatasetId, Record, RecordKey, RevisionId, Snapshot};

/// A reference from one stored record to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referrer {
    /// The referencing record.
    pub key: RecordKey,
    /// Field holding the reference.
    pub field: String,
}

/// Relational store holding the committed state of every dataset.
///
/// Implementations must be safe to share between threads. All reads outside
/// a transaction observe committed state only.
pub trait RelationalStore: Send + Sync {
    /// Begins a write transaction scoped to one dataset.
    ///
    /// Dropping the transaction without committing rolls it back.
    fn begin(&self, dataset: DatasetId) -> StoreResult<Box<dyn StoreTransaction + '_>>;

    /// Returns the latest committed revision of a dataset.
    fn latest_revision(&self, dataset: DatasetId) -> StoreResult<Option<RevisionId>>;

    /// Reads one committed record.
    fn get(&self, dataset: DatasetId, key: &RecordKey) -> StoreResult<Option<Record>>;

    /// Returns the records referencing `target`.
    fn referrers(&self, dataset: DatasetId, target: &RecordKey) -> StoreResult<Vec<Referrer>>;

    /// Rebuilds the committed state of a dataset as a snapshot.
    ///
    /// The snapshot's revision is the latest committed revision, `None` if
    /// the dataset was never imported.
    fn load_snapshot(&self, dataset: DatasetId) -> StoreResult<Snapshot>;
}

/// An open write transaction.
///
/// Referential integrity is checked when the transaction commits, so a
/// record may briefly reference a deleted target inside the transaction as
/// long as the reference is gone by commit time.
pub trait StoreTransaction {
    /// Returns the dataset the transaction writes to.
    fn dataset(&self) -> DatasetId;

    /// Returns the latest revision as seen by this transaction.
    fn latest_revision(&self) -> StoreResult<Option<RevisionId>>;

    /// Reads a record, including uncommitted writes of this transaction.
    fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>>;

    /// Inserts a record that must not exist yet.
    fn insert(&mut self, record: &Record) -> StoreResult<()>;

    /// Replaces the fields of an existing record.
    fn update(&mut self, record: &Record) -> StoreResult<()>;

    /// Deletes an existing record.
    fn delete(&mut self, key: &RecordKey) -> StoreResult<()>;

    /// Records the dataset's latest revision.
    fn set_latest_revision(&mut self, revision: RevisionId) -> StoreResult<()>;

    /// Checks referential integrity and makes all writes visible atomically.
    ///
    /// On error nothing is applied.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discards all writes.
    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
