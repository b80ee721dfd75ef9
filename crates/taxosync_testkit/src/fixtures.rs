//! Test fixtures: record builders, scenario snapshots, stores and
//! fault-injecting collaborators.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use taxosync_index::{
    IndexDocument, IndexOperationError, IndexResult, MemoryIndex, OperationResult, SearchIndex,
};
use taxosync_model::{DatasetId, Record, RecordKey, RecordKind, RevisionId, Snapshot};
use taxosync_store::{
    MemoryStore, Referrer, RelationalStore, SqliteStore, StoreError, StoreResult,
    StoreTransaction,
};
use tempfile::TempDir;

/// Builds a name record.
pub fn name(dataset: DatasetId, id: &str) -> Record {
    Record::new(dataset, RecordKind::Name, id)
        .with_field("scientificName", format!("Name {id}"))
        .with_field("rank", "species")
}

/// Builds a taxon named `N1`, optionally under a parent taxon.
pub fn taxon(dataset: DatasetId, id: &str, parent: Option<&str>) -> Record {
    let record = Record::new(dataset, RecordKind::Taxon, id).with_ref("name", RecordKey::name("N1"));
    match parent {
        Some(parent) => record.with_ref("parent", RecordKey::taxon(parent)),
        None => record.with_null("parent"),
    }
}

/// Builds a synonym of an accepted taxon, named `N1`.
pub fn synonym(dataset: DatasetId, id: &str, accepted: &str) -> Record {
    Record::new(dataset, RecordKind::Synonym, id)
        .with_ref("name", RecordKey::name("N1"))
        .with_ref("accepted", RecordKey::taxon(accepted))
}

/// Builds a distribution of a taxon in an area.
pub fn distribution(dataset: DatasetId, id: &str, taxon: &str, area: &str) -> Record {
    Record::new(dataset, RecordKind::Distribution, id)
        .with_ref("taxon", RecordKey::taxon(taxon))
        .with_field("area", area)
}

/// Builds a snapshot, panicking on invalid records.
pub fn snapshot(dataset: DatasetId, revision: u64, records: Vec<Record>) -> Snapshot {
    Snapshot::new(dataset, RevisionId::new(revision), records).expect("valid fixture snapshot")
}

/// The reparenting scenario.
///
/// Revision 1 has `T1` (root) and `T2` (child of `T1`). Revision 2 removes
/// `T1`, makes `T2` a root and adds `T3` under `T2`.
pub fn reparent_scenario(dataset: DatasetId) -> (Snapshot, Snapshot) {
    let a = snapshot(
        dataset,
        1,
        vec![
            name(dataset, "N1"),
            taxon(dataset, "T1", None),
            taxon(dataset, "T2", Some("T1")),
        ],
    );
    let b = snapshot(
        dataset,
        2,
        vec![
            name(dataset, "N1"),
            taxon(dataset, "T2", None),
            taxon(dataset, "T3", Some("T2")),
        ],
    );
    (a, b)
}

/// A genus → species → subspecies chain with a synonym and a
/// distribution of the species.
pub fn hierarchy(dataset: DatasetId, revision: u64) -> Snapshot {
    snapshot(
        dataset,
        revision,
        vec![
            name(dataset, "N1"),
            taxon(dataset, "genus", None),
            taxon(dataset, "species", Some("genus")),
            taxon(dataset, "subspecies", Some("species")),
            synonym(dataset, "S1", "species"),
            distribution(dataset, "D1", "species", "TZ"),
        ],
    )
}

/// Every store implementation, for running one test against all of them.
pub struct TestStores {
    stores: Vec<(&'static str, Arc<dyn RelationalStore>)>,
    _temp_dir: TempDir,
}

impl TestStores {
    /// Creates a memory store, an in-memory SQLite store and a file-backed
    /// SQLite store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file = SqliteStore::open(temp_dir.path().join("checklist.db"))
            .expect("Failed to open SQLite store");
        let stores: Vec<(&'static str, Arc<dyn RelationalStore>)> = vec![
            ("memory", Arc::new(MemoryStore::new())),
            (
                "sqlite-memory",
                Arc::new(SqliteStore::open_in_memory().expect("Failed to open SQLite store")),
            ),
            ("sqlite-file", Arc::new(file)),
        ];
        Self {
            stores,
            _temp_dir: temp_dir,
        }
    }

    /// Iterates over `(label, store)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Arc<dyn RelationalStore>)> + '_ {
        self.stores
            .iter()
            .map(|(label, store)| (*label, Arc::clone(store)))
    }
}

impl Default for TestStores {
    fn default() -> Self {
        Self::new()
    }
}

/// A search index that rejects chosen records until healed.
#[derive(Debug, Default)]
pub struct FlakyIndex {
    inner: MemoryIndex,
    rejected: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    operations: AtomicU64,
    upserted: Mutex<Vec<RecordKey>>,
}

impl FlakyIndex {
    /// Creates an index that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every operation on these records.
    pub fn reject(&self, keys: &[RecordKey]) {
        self.rejected
            .lock()
            .extend(keys.iter().map(IndexDocument::id_for));
    }

    /// Rejects every operation, as if the service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Accepts everything again.
    pub fn heal(&self) {
        self.rejected.lock().clear();
        self.set_unavailable(false);
    }

    /// Returns the number of document operations received.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Returns the records successfully upserted, in call order.
    pub fn upserted(&self) -> Vec<RecordKey> {
        self.upserted.lock().clone()
    }

    /// Clears the operation log.
    pub fn reset_log(&self) {
        self.operations.store(0, Ordering::SeqCst);
        self.upserted.lock().clear();
    }

    /// Returns the backing in-memory index.
    pub fn inner(&self) -> &MemoryIndex {
        &self.inner
    }

    fn check(&self, id: &str) -> OperationResult {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexOperationError::new(id, "service unavailable"));
        }
        if self.rejected.lock().contains(id) {
            return Err(IndexOperationError::new(id, "rejected by index"));
        }
        Ok(())
    }
}

impl SearchIndex for FlakyIndex {
    fn upsert(&self, documents: &[IndexDocument]) -> Vec<OperationResult> {
        documents
            .iter()
            .map(|doc| {
                self.check(&doc.id)?;
                self.inner.upsert(std::slice::from_ref(doc)).remove(0)?;
                self.upserted.lock().push(doc.key.clone());
                Ok(())
            })
            .collect()
    }

    fn delete(&self, dataset: DatasetId, ids: &[String]) -> Vec<OperationResult> {
        ids.iter()
            .map(|id| {
                self.check(id)?;
                self.inner.delete(dataset, std::slice::from_ref(id)).remove(0)
            })
            .collect()
    }

    fn delete_dataset(&self, dataset: DatasetId) -> IndexResult<u64> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexOperationError::new(dataset.to_string(), "service unavailable").into());
        }
        self.inner.delete_dataset(dataset)
    }
}

/// A store wrapper that injects write and commit failures.
pub struct FailingStore {
    inner: Arc<dyn RelationalStore>,
    fail_commit: Arc<AtomicBool>,
    fail_write: Arc<Mutex<Option<RecordKey>>>,
}

impl FailingStore {
    /// Wraps a store; no failure is armed.
    pub fn new(inner: Arc<dyn RelationalStore>) -> Self {
        Self {
            inner,
            fail_commit: Arc::new(AtomicBool::new(false)),
            fail_write: Arc::new(Mutex::new(None)),
        }
    }

    /// Makes every commit fail after all writes went through.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes any write of `key` fail.
    pub fn fail_write_of(&self, key: Option<RecordKey>) {
        *self.fail_write.lock() = key;
    }
}

impl RelationalStore for FailingStore {
    fn begin(&self, dataset: DatasetId) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(FailingTransaction {
            inner: self.inner.begin(dataset)?,
            fail_commit: self.fail_commit.load(Ordering::SeqCst),
            fail_write: self.fail_write.lock().clone(),
        }))
    }

    fn latest_revision(&self, dataset: DatasetId) -> StoreResult<Option<RevisionId>> {
        self.inner.latest_revision(dataset)
    }

    fn get(&self, dataset: DatasetId, key: &RecordKey) -> StoreResult<Option<Record>> {
        self.inner.get(dataset, key)
    }

    fn referrers(&self, dataset: DatasetId, target: &RecordKey) -> StoreResult<Vec<Referrer>> {
        self.inner.referrers(dataset, target)
    }

    fn load_snapshot(&self, dataset: DatasetId) -> StoreResult<Snapshot> {
        self.inner.load_snapshot(dataset)
    }
}

struct FailingTransaction<'a> {
    inner: Box<dyn StoreTransaction + 'a>,
    fail_commit: bool,
    fail_write: Option<RecordKey>,
}

impl FailingTransaction<'_> {
    fn check_write(&self, key: &RecordKey) -> StoreResult<()> {
        if self.fail_write.as_ref() == Some(key) {
            return Err(StoreError::constraint(key, "injected write failure"));
        }
        Ok(())
    }
}

impl StoreTransaction for FailingTransaction<'_> {
    fn dataset(&self) -> DatasetId {
        self.inner.dataset()
    }

    fn latest_revision(&self) -> StoreResult<Option<RevisionId>> {
        self.inner.latest_revision()
    }

    fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        self.inner.get(key)
    }

    fn insert(&mut self, record: &Record) -> StoreResult<()> {
        self.check_write(&record.key)?;
        self.inner.insert(record)
    }

    fn update(&mut self, record: &Record) -> StoreResult<()> {
        self.check_write(&record.key)?;
        self.inner.update(record)
    }

    fn delete(&mut self, key: &RecordKey) -> StoreResult<()> {
        self.check_write(key)?;
        self.inner.delete(key)
    }

    fn set_latest_revision(&mut self, revision: RevisionId) -> StoreResult<()> {
        self.inner.set_latest_revision(revision)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        if this.fail_commit {
            this.inner.rollback()?;
            return Err(StoreError::invalid_operation("injected commit failure"));
        }
        this.inner.commit()
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback()
    }
}
