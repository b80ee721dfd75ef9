//! In-memory relational store.

use crate::error::{StoreError, StoreResult};
use crate::store::{Referrer, RelationalStore, StoreTransaction};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, HashMap};
use taxosync_model::{DatasetId, Record, RecordKey, RevisionId, Snapshot};

#[derive(Debug, Clone, Default)]
struct DatasetState {
    records: BTreeMap<RecordKey, Record>,
    latest: Option<RevisionId>,
}

/// A relational store kept in memory.
///
/// Useful for tests and for running the engine without a database. Only one
/// write transaction is open at a time; readers see committed state.
///
/// # Example
///
/// ```rust
/// use taxosync_model::{DatasetId, Record, RecordKind, RevisionId};
/// use taxosync_store::{MemoryStore, RelationalStore};
///
/// let store = MemoryStore::new();
/// let ds = DatasetId::new(1);
/// let mut txn = store.begin(ds).unwrap();
/// txn.insert(
///     &Record::new(ds, RecordKind::Name, "N1")
///         .with_field("scientificName", "Abies")
///         .with_field("rank", "genus"),
/// )
/// .unwrap();
/// txn.set_latest_revision(RevisionId::new(1)).unwrap();
/// txn.commit().unwrap();
///
/// assert_eq!(store.latest_revision(ds).unwrap(), Some(RevisionId::new(1)));
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    datasets: RwLock<HashMap<DatasetId, DatasetState>>,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed records in a dataset.
    #[must_use]
    pub fn record_count(&self, dataset: DatasetId) -> usize {
        self.datasets
            .read()
            .get(&dataset)
            .map_or(0, |state| state.records.len())
    }
}

impl RelationalStore for MemoryStore {
    fn begin(&self, dataset: DatasetId) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        let writer = self.write_lock.lock();
        Ok(Box::new(MemoryTransaction {
            store: self,
            _writer: writer,
            dataset,
            writes: HashMap::new(),
            revision: None,
        }))
    }

    fn latest_revision(&self, dataset: DatasetId) -> StoreResult<Option<RevisionId>> {
        Ok(self
            .datasets
            .read()
            .get(&dataset)
            .and_then(|state| state.latest))
    }

    fn get(&self, dataset: DatasetId, key: &RecordKey) -> StoreResult<Option<Record>> {
        Ok(self
            .datasets
            .read()
            .get(&dataset)
            .and_then(|state| state.records.get(key).cloned()))
    }

    fn referrers(&self, dataset: DatasetId, target: &RecordKey) -> StoreResult<Vec<Referrer>> {
        let datasets = self.datasets.read();
        let Some(state) = datasets.get(&dataset) else {
            return Ok(Vec::new());
        };
        Ok(state
            .records
            .values()
            .flat_map(|record| {
                record
                    .references()
                    .filter(|(_, key)| *key == target)
                    .map(|(field, _)| Referrer {
                        key: record.key.clone(),
                        field: field.to_string(),
                    })
            })
            .collect())
    }

    fn load_snapshot(&self, dataset: DatasetId) -> StoreResult<Snapshot> {
        let datasets = self.datasets.read();
        match datasets.get(&dataset) {
            None => Ok(Snapshot::empty(dataset)),
            Some(state) => Ok(Snapshot::with_revision(
                dataset,
                state.latest,
                state.records.values().cloned().collect(),
            )?),
        }
    }
}

#[derive(Debug)]
enum PendingWrite {
    Put(Record),
    Delete,
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    _writer: MutexGuard<'a, ()>,
    dataset: DatasetId,
    writes: HashMap<RecordKey, PendingWrite>,
    revision: Option<RevisionId>,
}

impl MemoryTransaction<'_> {
    fn exists(&self, key: &RecordKey) -> StoreResult<bool> {
        Ok(StoreTransaction::get(self, key)?.is_some())
    }

    fn check_scope(&self, record: &Record) -> StoreResult<()> {
        if record.dataset != self.dataset {
            return Err(StoreError::invalid_operation(format!(
                "{} belongs to {}, transaction is scoped to {}",
                record.key, record.dataset, self.dataset
            )));
        }
        record.validate()?;
        Ok(())
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn dataset(&self) -> DatasetId {
        self.dataset
    }

    fn latest_revision(&self) -> StoreResult<Option<RevisionId>> {
        match self.revision {
            Some(revision) => Ok(Some(revision)),
            None => self.store.latest_revision(self.dataset),
        }
    }

    fn get(&self, key: &RecordKey) -> StoreResult<Option<Record>> {
        match self.writes.get(key) {
            Some(PendingWrite::Put(record)) => Ok(Some(record.clone())),
            Some(PendingWrite::Delete) => Ok(None),
            None => self.store.get(self.dataset, key),
        }
    }

    fn insert(&mut self, record: &Record) -> StoreResult<()> {
        self.check_scope(record)?;
        if self.exists(&record.key)? {
            return Err(StoreError::constraint(&record.key, "record already exists"));
        }
        self.writes
            .insert(record.key.clone(), PendingWrite::Put(record.clone()));
        Ok(())
    }

    fn update(&mut self, record: &Record) -> StoreResult<()> {
        self.check_scope(record)?;
        if !self.exists(&record.key)? {
            return Err(StoreError::constraint(&record.key, "record does not exist"));
        }
        self.writes
            .insert(record.key.clone(), PendingWrite::Put(record.clone()));
        Ok(())
    }

    fn delete(&mut self, key: &RecordKey) -> StoreResult<()> {
        if !self.exists(key)? {
            return Err(StoreError::constraint(key, "record does not exist"));
        }
        self.writes.insert(key.clone(), PendingWrite::Delete);
        Ok(())
    }

    fn set_latest_revision(&mut self, revision: RevisionId) -> StoreResult<()> {
        self.revision = Some(revision);
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let mut datasets = this.store.datasets.write();
        let mut state = datasets.get(&this.dataset).cloned().unwrap_or_default();

        for (key, write) in this.writes {
            match write {
                PendingWrite::Put(record) => {
                    state.records.insert(key, record);
                }
                PendingWrite::Delete => {
                    state.records.remove(&key);
                }
            }
        }

        for record in state.records.values() {
            for (field, target) in record.references() {
                if !state.records.contains_key(target) {
                    return Err(StoreError::constraint(
                        &record.key,
                        format!("{field} references missing {target}"),
                    ));
                }
            }
        }

        if let Some(revision) = this.revision {
            state.latest = Some(revision);
        }
        datasets.insert(this.dataset, state);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxosync_model::RecordKind;

    const DS: DatasetId = DatasetId::new(1);

    fn name(id: &str) -> Record {
        Record::new(DS, RecordKind::Name, id)
            .with_field("scientificName", format!("Name {id}"))
            .with_field("rank", "genus")
    }

    fn taxon(id: &str, parent: Option<&str>) -> Record {
        let t = Record::new(DS, RecordKind::Taxon, id).with_ref("name", RecordKey::name("N1"));
        match parent {
            Some(p) => t.with_ref("parent", RecordKey::taxon(p)),
            None => t.with_null("parent"),
        }
    }

    fn seed(store: &MemoryStore) {
        let mut txn = store.begin(DS).unwrap();
        txn.insert(&name("N1")).unwrap();
        txn.insert(&taxon("T1", None)).unwrap();
        txn.insert(&taxon("T2", Some("T1"))).unwrap();
        txn.set_latest_revision(RevisionId::new(1)).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn commit_makes_writes_visible() {
        let store = MemoryStore::new();
        seed(&store);
        assert_eq!(store.record_count(DS), 3);
        assert_eq!(store.latest_revision(DS).unwrap(), Some(RevisionId::new(1)));
        let snap = store.load_snapshot(DS).unwrap();
        assert_eq!(snap.revision(), Some(RevisionId::new(1)));
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn drop_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin(DS).unwrap();
            txn.insert(&name("N1")).unwrap();
            assert!(txn.get(&RecordKey::name("N1")).unwrap().is_some());
        }
        assert_eq!(store.record_count(DS), 0);
        assert_eq!(store.latest_revision(DS).unwrap(), None);
    }

    #[test]
    fn deferred_reference_check() {
        let store = MemoryStore::new();
        seed(&store);

        // T2 still references T1 after the delete; fixed before commit.
        let mut txn = store.begin(DS).unwrap();
        txn.delete(&RecordKey::taxon("T1")).unwrap();
        txn.update(&taxon("T2", None)).unwrap();
        txn.commit().unwrap();
        assert!(store.get(DS, &RecordKey::taxon("T1")).unwrap().is_none());
    }

    #[test]
    fn dangling_reference_rejected_at_commit() {
        let store = MemoryStore::new();
        seed(&store);

        let mut txn = store.begin(DS).unwrap();
        txn.delete(&RecordKey::taxon("T1")).unwrap();
        txn.set_latest_revision(RevisionId::new(2)).unwrap();
        let err = txn.commit().unwrap_err();
        assert!(matches!(err, StoreError::Constraint { ref key, .. } if *key == RecordKey::taxon("T2")));
        assert_eq!(store.record_count(DS), 3);
        assert_eq!(store.latest_revision(DS).unwrap(), Some(RevisionId::new(1)));
    }

    #[test]
    fn insert_existing_and_update_missing() {
        let store = MemoryStore::new();
        seed(&store);
        let mut txn = store.begin(DS).unwrap();
        assert!(txn.insert(&name("N1")).is_err());
        assert!(txn.update(&name("N9")).is_err());
        assert!(txn.delete(&RecordKey::name("N9")).is_err());
    }

    #[test]
    fn referrers_of_taxon() {
        let store = MemoryStore::new();
        seed(&store);
        let referrers = store.referrers(DS, &RecordKey::taxon("T1")).unwrap();
        assert_eq!(
            referrers,
            vec![Referrer {
                key: RecordKey::taxon("T2"),
                field: "parent".into()
            }]
        );
    }
}
