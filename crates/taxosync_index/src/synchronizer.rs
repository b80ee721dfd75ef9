//! Propagation of committed change sets to the search index.

use crate::config::IndexConfig;
use crate::document::{IndexDocument, Projector, PARENT_FIELD};
use crate::error::{IndexError, IndexOperationError, IndexResult};
use crate::index::{OperationResult, SearchIndex};
use rayon::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use taxosync_diff::ChangeSet;
use taxosync_model::{DatasetId, RecordKey, RecordKind};
use taxosync_store::RelationalStore;

/// An index operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOperation {
    /// The record whose document is stale.
    pub key: RecordKey,
    /// Why the operation failed.
    pub error: IndexOperationError,
}

/// Result of one propagation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Documents written.
    pub upserted: u64,
    /// Documents removed.
    pub deleted: u64,
    /// Unchanged records re-indexed because an ancestor moved.
    pub propagated: u64,
    /// Operations that failed and need a retry.
    pub failed: Vec<FailedOperation>,
    /// True if the time budget ran out before every batch was issued.
    pub timed_out: bool,
}

impl SyncReport {
    /// Returns true if every operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns the identities that still need indexing, sorted.
    #[must_use]
    pub fn failed_keys(&self) -> Vec<RecordKey> {
        let mut keys: Vec<RecordKey> = self.failed.iter().map(|f| f.key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Returns the number of operations attempted.
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.upserted + self.deleted + self.failed.len() as u64
    }

    fn merge(&mut self, other: BatchOutcome) {
        self.upserted += other.upserted;
        self.deleted += other.deleted;
        self.failed.extend(other.failed);
        self.timed_out |= other.timed_out;
    }
}

enum Batch {
    Upsert(Vec<IndexDocument>),
    Delete(Vec<RecordKey>),
}

#[derive(Default)]
struct BatchOutcome {
    upserted: u64,
    deleted: u64,
    failed: Vec<FailedOperation>,
    timed_out: bool,
}

/// Issues targeted index operations for committed change sets.
///
/// Documents are always built from the relational store, the source of
/// truth, never from the change set itself. Batches run concurrently on a
/// dedicated worker pool; each document succeeds or fails on its own.
pub struct IndexSynchronizer {
    store: Arc<dyn RelationalStore>,
    index: Arc<dyn SearchIndex>,
    config: IndexConfig,
    pool: rayon::ThreadPool,
}

impl IndexSynchronizer {
    /// Creates a synchronizer.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ThreadPool`] if the worker pool cannot start.
    pub fn new(
        store: Arc<dyn RelationalStore>,
        index: Arc<dyn SearchIndex>,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallelism.max(1))
            .thread_name(|i| format!("taxosync-index-{i}"))
            .build()
            .map_err(|e| IndexError::ThreadPool {
                message: e.to_string(),
            })?;
        Ok(Self {
            store,
            index,
            config,
            pool,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Propagates a committed change set.
    ///
    /// Deleted records are removed from the index. Inserted and updated
    /// records are upserted with their current committed state, as are the
    /// unchanged descendants of every taxon whose parent changed.
    ///
    /// # Errors
    ///
    /// Only store failures while planning abort the pass; index failures
    /// are collected in the report.
    pub fn sync(&self, change_set: &ChangeSet) -> IndexResult<SyncReport> {
        let dataset = change_set.dataset;
        let mut planned: HashSet<RecordKey> = change_set.touched_keys().cloned().collect();

        let deletes: Vec<RecordKey> = change_set.deleted.iter().map(|r| r.key.clone()).collect();
        let mut upserts: Vec<RecordKey> = change_set
            .updated
            .iter()
            .map(|u| u.key().clone())
            .chain(change_set.inserted.iter().map(|r| r.key.clone()))
            .collect();

        let moved: Vec<&RecordKey> = change_set
            .updated
            .iter()
            .filter(|u| u.key().kind == RecordKind::Taxon && u.change(PARENT_FIELD).is_some())
            .map(|u| u.key())
            .collect();
        let descendants = self.descendants(dataset, &moved)?;
        let mut propagated = 0;
        for key in descendants {
            if planned.insert(key.clone()) {
                upserts.push(key);
                propagated += 1;
            }
        }

        let mut report = self.execute(dataset, &upserts, &deletes)?;
        report.propagated = propagated;

        tracing::info!(
            dataset = %dataset,
            upserted = report.upserted,
            deleted = report.deleted,
            propagated = report.propagated,
            failed = report.failed.len(),
            "index sync finished"
        );
        Ok(report)
    }

    /// Re-indexes a subset of records from current relational state.
    ///
    /// Records still present are upserted; records gone from the store are
    /// deleted from the index.
    ///
    /// # Errors
    ///
    /// Only store failures abort the pass.
    pub fn retry(&self, dataset: DatasetId, keys: &[RecordKey]) -> IndexResult<SyncReport> {
        let report = self.execute(dataset, keys, &[])?;
        tracing::info!(
            dataset = %dataset,
            requested = keys.len(),
            failed = report.failed.len(),
            "index retry finished"
        );
        Ok(report)
    }

    /// Drops every document of a dataset and indexes its committed state.
    ///
    /// # Errors
    ///
    /// Fails if the dataset cannot be cleared or the store cannot be read.
    pub fn reindex_dataset(&self, dataset: DatasetId) -> IndexResult<SyncReport> {
        let removed = self.index.delete_dataset(dataset)?;
        let snapshot = self.store.load_snapshot(dataset)?;
        let keys: Vec<RecordKey> = snapshot.records().map(|r| r.key.clone()).collect();
        let report = self.execute(dataset, &keys, &[])?;
        tracing::info!(
            dataset = %dataset,
            removed,
            upserted = report.upserted,
            failed = report.failed.len(),
            "dataset reindexed"
        );
        Ok(report)
    }

    /// Collects the records whose classification runs through `roots`.
    fn descendants(&self, dataset: DatasetId, roots: &[&RecordKey]) -> IndexResult<Vec<RecordKey>> {
        let mut found = Vec::new();
        let mut seen: HashSet<RecordKey> = roots.iter().map(|k| (*k).clone()).collect();
        let mut queue: VecDeque<RecordKey> = seen.iter().cloned().collect();

        while let Some(taxon) = queue.pop_front() {
            for referrer in self.store.referrers(dataset, &taxon)? {
                let follows = match referrer.key.kind {
                    RecordKind::Taxon => referrer.field == PARENT_FIELD,
                    RecordKind::Synonym => referrer.field == "accepted",
                    RecordKind::Distribution => referrer.field == "taxon",
                    RecordKind::Name => false,
                };
                if !follows || !seen.insert(referrer.key.clone()) {
                    continue;
                }
                if referrer.key.kind == RecordKind::Taxon {
                    queue.push_back(referrer.key.clone());
                }
                found.push(referrer.key);
            }
        }
        Ok(found)
    }

    /// Projects and issues the operations for a set of keys.
    ///
    /// Upsert keys missing from the store become deletions.
    fn execute(
        &self,
        dataset: DatasetId,
        upserts: &[RecordKey],
        deletes: &[RecordKey],
    ) -> IndexResult<SyncReport> {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut projector = Projector::new(self.store.as_ref(), dataset);
        let mut documents = Vec::with_capacity(upserts.len());
        let mut removals: Vec<RecordKey> = deletes.to_vec();

        for key in upserts {
            match self.store.get(dataset, key)? {
                Some(record) => documents.push(projector.project(&record)?),
                None => removals.push(key.clone()),
            }
        }

        let size = self.config.batch_size.max(1);
        let mut batches: Vec<Batch> = removals
            .chunks(size)
            .map(|chunk| Batch::Delete(chunk.to_vec()))
            .collect();
        batches.extend(
            documents
                .chunks(size)
                .map(|chunk| Batch::Upsert(chunk.to_vec())),
        );

        let outcomes: Vec<BatchOutcome> = self.pool.install(|| {
            batches
                .par_iter()
                .map(|batch| self.run_batch(dataset, batch, deadline))
                .collect()
        });

        let mut report = SyncReport::default();
        for outcome in outcomes {
            report.merge(outcome);
        }
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(report)
    }

    fn run_batch(&self, dataset: DatasetId, batch: &Batch, deadline: Option<Instant>) -> BatchOutcome {
        let keys: Vec<&RecordKey> = match batch {
            Batch::Upsert(docs) => docs.iter().map(|d| &d.key).collect(),
            Batch::Delete(keys) => keys.iter().collect(),
        };

        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(dataset = %dataset, size = keys.len(), "index batch skipped after timeout");
            return BatchOutcome {
                failed: keys
                    .into_iter()
                    .map(|key| FailedOperation {
                        key: key.clone(),
                        error: IndexOperationError::new(
                            IndexDocument::id_for(key),
                            "index phase timed out",
                        ),
                    })
                    .collect(),
                timed_out: true,
                ..BatchOutcome::default()
            };
        }

        let (results, is_upsert) = match batch {
            Batch::Upsert(docs) => (self.index.upsert(docs), true),
            Batch::Delete(keys) => {
                let ids: Vec<String> = keys.iter().map(IndexDocument::id_for).collect();
                (self.index.delete(dataset, &ids), false)
            }
        };

        let mut outcome = BatchOutcome::default();
        for (pos, key) in keys.into_iter().enumerate() {
            let result: OperationResult = results.get(pos).cloned().unwrap_or_else(|| {
                Err(IndexOperationError::new(
                    IndexDocument::id_for(key),
                    "no result returned by index",
                ))
            });
            match result {
                Ok(()) if is_upsert => outcome.upserted += 1,
                Ok(()) => outcome.deleted += 1,
                Err(error) => {
                    tracing::warn!(dataset = %dataset, key = %key, error = %error, "index operation failed");
                    outcome.failed.push(FailedOperation {
                        key: key.clone(),
                        error,
                    });
                }
            }
        }
        tracing::debug!(
            dataset = %dataset,
            upserted = outcome.upserted,
            deleted = outcome.deleted,
            failed = outcome.failed.len(),
            "index batch done"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndex;
    use parking_lot::Mutex;
    use std::time::Duration;
    use taxosync_diff::diff;
    use taxosync_model::{Record, RevisionId, Snapshot};
    use taxosync_store::{CancelToken, MemoryStore, TransactionalWriter};

    const DS: DatasetId = DatasetId::new(3);

    fn name(id: &str) -> Record {
        Record::new(DS, RecordKind::Name, id)
            .with_field("scientificName", format!("Name {id}"))
            .with_field("rank", "species")
    }

    fn taxon(id: &str, parent: Option<&str>) -> Record {
        let t = Record::new(DS, RecordKind::Taxon, id).with_ref("name", RecordKey::name("N1"));
        match parent {
            Some(p) => t.with_ref("parent", RecordKey::taxon(p)),
            None => t.with_null("parent"),
        }
    }

    /// Index that rejects upserts of chosen keys.
    struct RejectingIndex {
        inner: MemoryIndex,
        reject: Mutex<HashSet<String>>,
    }

    impl RejectingIndex {
        fn new(keys: &[RecordKey]) -> Self {
            Self {
                inner: MemoryIndex::new(),
                reject: Mutex::new(keys.iter().map(IndexDocument::id_for).collect()),
            }
        }
    }

    impl SearchIndex for RejectingIndex {
        fn upsert(&self, documents: &[IndexDocument]) -> Vec<OperationResult> {
            let reject = self.reject.lock();
            documents
                .iter()
                .map(|doc| {
                    if reject.contains(&doc.id) {
                        Err(IndexOperationError::new(doc.id.clone(), "rejected"))
                    } else {
                        self.inner.upsert(std::slice::from_ref(doc)).remove(0)
                    }
                })
                .collect()
        }

        fn delete(&self, dataset: DatasetId, ids: &[String]) -> Vec<OperationResult> {
            self.inner.delete(dataset, ids)
        }

        fn delete_dataset(&self, dataset: DatasetId) -> IndexResult<u64> {
            self.inner.delete_dataset(dataset)
        }
    }

    fn commit(store: &Arc<MemoryStore>, next: &Snapshot) -> ChangeSet {
        let previous = store.load_snapshot(DS).unwrap();
        let cs = diff(&previous, next).unwrap();
        TransactionalWriter::new(store.clone())
            .apply(&cs, &CancelToken::new())
            .unwrap();
        cs
    }

    fn hierarchy(rev: u64, species_parent: &str) -> Snapshot {
        Snapshot::new(
            DS,
            RevisionId::new(rev),
            vec![
                name("N1"),
                taxon("G1", None),
                taxon("G2", None),
                taxon("S1", Some(species_parent)),
                taxon("SS1", Some("S1")),
                Record::new(DS, RecordKind::Synonym, "Y1")
                    .with_ref("name", RecordKey::name("N1"))
                    .with_ref("accepted", RecordKey::taxon("SS1")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn sync_indexes_inserted_records() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSynchronizer::new(store.clone(), index.clone(), IndexConfig::new()).unwrap();

        let cs = commit(&store, &hierarchy(1, "G1"));
        let report = sync.sync(&cs).unwrap();
        assert!(report.is_success());
        assert_eq!(report.upserted, 6);
        assert_eq!(index.len(DS), 6);
    }

    #[test]
    fn reparent_propagates_to_descendants() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSynchronizer::new(
            store.clone(),
            index.clone(),
            IndexConfig::new().with_batch_size(2),
        )
        .unwrap();

        sync.sync(&commit(&store, &hierarchy(1, "G1"))).unwrap();
        let cs = commit(&store, &hierarchy(2, "G2"));
        assert_eq!(cs.updated.len(), 1);

        let report = sync.sync(&cs).unwrap();
        assert_eq!(report.upserted, 3);
        assert_eq!(report.propagated, 2);

        let synonym = index.get(DS, &RecordKey::synonym("Y1")).unwrap();
        assert_eq!(synonym.classification.first(), Some(&RecordKey::taxon("G2")));
    }

    #[test]
    fn failures_are_isolated_and_retryable() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(RejectingIndex::new(&[RecordKey::taxon("G2")]));
        let sync = IndexSynchronizer::new(store.clone(), index.clone(), IndexConfig::new()).unwrap();

        let report = sync.sync(&commit(&store, &hierarchy(1, "G1"))).unwrap();
        assert_eq!(report.failed_keys(), vec![RecordKey::taxon("G2")]);
        assert_eq!(report.upserted, 5);

        index.reject.lock().clear();
        let retried = sync.retry(DS, &report.failed_keys()).unwrap();
        assert!(retried.is_success());
        assert_eq!(retried.upserted, 1);
        assert_eq!(index.inner.len(DS), 6);
    }

    #[test]
    fn retry_deletes_records_gone_from_store() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSynchronizer::new(store.clone(), index.clone(), IndexConfig::new()).unwrap();
        sync.sync(&commit(&store, &hierarchy(1, "G1"))).unwrap();

        let report = sync.retry(DS, &[RecordKey::taxon("ZZ")]).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(index.len(DS), 6);
    }

    #[test]
    fn exhausted_budget_fails_every_batch() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSynchronizer::new(
            store.clone(),
            index.clone(),
            IndexConfig::new().with_timeout(Duration::ZERO),
        )
        .unwrap();

        let report = sync.sync(&commit(&store, &hierarchy(1, "G1"))).unwrap();
        assert!(report.timed_out);
        assert_eq!(report.failed.len(), 6);
        assert!(index.is_empty(DS));
    }

    #[test]
    fn reindex_replaces_dataset_documents() {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        let sync = IndexSynchronizer::new(store.clone(), index.clone(), IndexConfig::new()).unwrap();
        commit(&store, &hierarchy(1, "G1"));

        let report = sync.reindex_dataset(DS).unwrap();
        assert_eq!(report.upserted, 6);
        assert_eq!(index.len(DS), 6);
    }
}
