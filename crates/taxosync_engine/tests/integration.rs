//! End-to-end synchronization runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taxosync_diff::diff;
use taxosync_engine::{
    EngineConfig, JsonFileSource, LockPolicy, RetryConfig, RunOutcome, SyncEngine, SyncError,
};
use taxosync_index::{IndexDocument, IndexResult, MemoryIndex, OperationResult, SearchIndex};
use taxosync_ledger::{LedgerConfig, RevisionLedger, RevisionStatus};
use taxosync_model::{DatasetId, KindCounts, Record, RecordKey, RevisionId, Snapshot};
use taxosync_store::{
    CancelToken, MemoryStore, Referrer, RelationalStore, StoreResult, StoreTransaction,
    TransactionalWriter,
};
use taxosync_testkit::{
    distribution, hierarchy, name, reparent_scenario, snapshot, synonym, taxon, FailingStore,
    FlakyIndex, TestStores,
};
use tempfile::tempdir;

const DS: DatasetId = DatasetId::new(1);

fn engine_with(
    store: Arc<dyn RelationalStore>,
    index: Arc<dyn SearchIndex>,
    config: EngineConfig,
) -> SyncEngine {
    SyncEngine::new(store, index, Arc::new(RevisionLedger::in_memory()), config).unwrap()
}

fn no_retry_delay() -> RetryConfig {
    RetryConfig::no_retry()
}

#[test]
fn reparent_scenario_on_every_store() {
    let stores = TestStores::new();
    for (label, store) in stores.iter() {
        let index = Arc::new(MemoryIndex::new());
        let engine = engine_with(store.clone(), index.clone(), EngineConfig::default());
        let (a, b) = reparent_scenario(DS);

        engine.run(&a).unwrap();
        let outcome = engine.run(&b).unwrap();

        let entry = outcome.entry().unwrap();
        assert_eq!(entry.status, RevisionStatus::Indexed, "{label}");
        assert_eq!(entry.source, Some(RevisionId::new(1)), "{label}");
        assert_eq!(entry.target, RevisionId::new(2), "{label}");
        assert_eq!(
            (entry.counts.inserted, entry.counts.updated, entry.counts.deleted),
            (1, 1, 1),
            "{label}"
        );

        assert_eq!(store.latest_revision(DS).unwrap(), Some(RevisionId::new(2)));
        assert!(store.get(DS, &RecordKey::taxon("T1")).unwrap().is_none());
        assert!(index.get(DS, &RecordKey::taxon("T1")).is_none(), "{label}");
        let t3 = index.get(DS, &RecordKey::taxon("T3")).unwrap();
        assert_eq!(
            t3.classification,
            vec![RecordKey::taxon("T2"), RecordKey::taxon("T3")],
            "{label}"
        );
    }
}

#[test]
fn one_failed_upsert_is_retried_alone() {
    let index = Arc::new(FlakyIndex::new());
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        index.clone(),
        EngineConfig::default().with_retry(no_retry_delay()),
    );

    engine.run(&snapshot(DS, 1, vec![name(DS, "N1")])).unwrap();

    index.reject(&[RecordKey::taxon("T2")]);
    let outcome = engine
        .run(&snapshot(
            DS,
            2,
            vec![
                name(DS, "N1"),
                taxon(DS, "T1", None),
                taxon(DS, "T2", Some("T1")),
                taxon(DS, "T3", Some("T1")),
            ],
        ))
        .unwrap();

    let RunOutcome::IndexFailed { entry, report } = outcome else {
        panic!("expected index-failed outcome");
    };
    assert_eq!(entry.status, RevisionStatus::IndexFailed);
    assert_eq!(entry.failed_keys, vec![RecordKey::taxon("T2")]);
    assert_eq!(report.upserted, 2);
    assert!(entry.error.as_deref().unwrap().starts_with("1 of 3"));
    // the commit stands
    assert_eq!(
        engine.store().latest_revision(DS).unwrap(),
        Some(RevisionId::new(2))
    );

    index.heal();
    index.reset_log();
    let pass = engine.retry_index_failures().unwrap();

    assert_eq!(pass.resolved.len(), 1);
    assert!(pass.still_failing.is_empty());
    assert_eq!(index.upserted(), vec![RecordKey::taxon("T2")]);
    assert_eq!(index.operations(), 1);

    let entry = engine.ledger().get(entry.id).unwrap();
    assert_eq!(entry.status, RevisionStatus::Indexed);
    assert!(entry.failed_keys.is_empty());
    assert_eq!(entry.index_attempts, 2);
    assert!(engine.ledger().retry_candidates().is_empty());
}

#[test]
fn retry_that_keeps_failing_stays_index_failed() {
    let index = Arc::new(FlakyIndex::new());
    let engine = engine_with(
        Arc::new(MemoryStore::new()),
        index.clone(),
        EngineConfig::default().with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        ),
    );
    index.reject(&[RecordKey::taxon("genus")]);
    engine.run(&hierarchy(DS, 1)).unwrap();

    let pass = engine.retry_index_failures().unwrap();
    assert!(pass.resolved.is_empty());
    let entry = &pass.still_failing[0];
    assert_eq!(entry.status, RevisionStatus::IndexFailed);
    assert_eq!(entry.failed_keys, vec![RecordKey::taxon("genus")]);
    assert_eq!(engine.stats().index_retries, 3);

    assert!(matches!(
        engine.retry_entry(999),
        Err(SyncError::UnknownEntry { entry: 999 })
    ));
}

#[test]
fn applying_the_same_revision_twice_is_a_no_op() {
    let index = Arc::new(FlakyIndex::new());
    let engine = engine_with(Arc::new(MemoryStore::new()), index.clone(), EngineConfig::default());
    let (a, _) = reparent_scenario(DS);

    engine.run(&a).unwrap();
    index.reset_log();
    let outcome = engine.run(&a).unwrap();

    assert!(outcome.is_already_applied());
    assert_eq!(index.operations(), 0);
    assert_eq!(engine.ledger().entries().len(), 1);
    assert_eq!(engine.store().load_snapshot(DS).unwrap().len(), 3);
}

#[test]
fn failed_write_rolls_back_every_store() {
    let stores = TestStores::new();
    for (label, inner) in stores.iter() {
        let store = Arc::new(FailingStore::new(inner.clone()));
        let index = Arc::new(MemoryIndex::new());
        let engine = engine_with(store.clone(), index.clone(), EngineConfig::default());
        let (a, b) = reparent_scenario(DS);
        engine.run(&a).unwrap();

        store.fail_write_of(Some(RecordKey::taxon("T3")));
        let err = engine.run(&b).unwrap_err();
        assert!(matches!(err, SyncError::Transaction(_)), "{label}: {err}");

        let entry = engine.ledger().latest(DS).unwrap();
        assert_eq!(entry.status, RevisionStatus::Failed, "{label}");
        assert!(entry.error.unwrap().contains("injected write failure"));

        // store and index still describe revision 1
        let committed = inner.load_snapshot(DS).unwrap();
        assert_eq!(committed.revision(), Some(RevisionId::new(1)), "{label}");
        assert!(committed.contains(&RecordKey::taxon("T1")), "{label}");
        assert!(index.get(DS, &RecordKey::taxon("T1")).is_some(), "{label}");

        // a later attempt of the same revision succeeds
        store.fail_write_of(None);
        let outcome = engine.run(&b).unwrap();
        assert_eq!(outcome.entry().unwrap().status, RevisionStatus::Indexed);
    }
}

#[test]
fn failed_commit_leaves_store_untouched() {
    let inner: Arc<dyn RelationalStore> = Arc::new(MemoryStore::new());
    let store = Arc::new(FailingStore::new(inner.clone()));
    let engine = engine_with(store.clone(), Arc::new(MemoryIndex::new()), EngineConfig::default());

    store.fail_commits(true);
    let err = engine.run(&hierarchy(DS, 1)).unwrap_err();
    assert!(matches!(err, SyncError::Transaction(_)));
    assert_eq!(inner.latest_revision(DS).unwrap(), None);
    assert!(inner.load_snapshot(DS).unwrap().is_empty());
    assert_eq!(engine.stats().runs_failed, 1);
}

#[test]
fn dangling_reference_fails_before_any_write() {
    let index = Arc::new(FlakyIndex::new());
    let engine = engine_with(Arc::new(MemoryStore::new()), index.clone(), EngineConfig::default());

    let broken = snapshot(
        DS,
        1,
        vec![
            name(DS, "N1"),
            taxon(DS, "T1", None),
            synonym(DS, "S1", "T9"),
            distribution(DS, "D1", "T1", "TZ"),
        ],
    );
    let err = engine.run(&broken).unwrap_err();

    assert!(matches!(err, SyncError::Referential(_)));
    let entry = engine.ledger().latest(DS).unwrap();
    assert_eq!(entry.status, RevisionStatus::Failed);
    assert_eq!(entry.kind_counts.synonyms, 1);
    assert_eq!(engine.store().latest_revision(DS).unwrap(), None);
    assert_eq!(index.operations(), 0);
}

/// Blocks upserts of one dataset until opened.
#[derive(Default)]
struct GateIndex {
    inner: MemoryIndex,
    gated: Option<DatasetId>,
    entered: AtomicBool,
    open: AtomicBool,
}

impl GateIndex {
    fn gating(dataset: DatasetId) -> Self {
        Self {
            gated: Some(dataset),
            ..Self::default()
        }
    }

    fn wait_entered(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "run never reached the index");
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl SearchIndex for GateIndex {
    fn upsert(&self, documents: &[IndexDocument]) -> Vec<OperationResult> {
        if documents.iter().any(|d| Some(d.dataset) == self.gated) {
            self.entered.store(true, Ordering::SeqCst);
            while !self.open.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
        }
        self.inner.upsert(documents)
    }

    fn delete(&self, dataset: DatasetId, ids: &[String]) -> Vec<OperationResult> {
        self.inner.delete(dataset, ids)
    }

    fn delete_dataset(&self, dataset: DatasetId) -> IndexResult<u64> {
        self.inner.delete_dataset(dataset)
    }
}

/// A store whose write transactions on one dataset wait until opened.
struct GateStore {
    inner: MemoryStore,
    gated: DatasetId,
    entered: AtomicBool,
    open: AtomicBool,
}

impl GateStore {
    fn gating(dataset: DatasetId) -> Self {
        Self {
            inner: MemoryStore::new(),
            gated: dataset,
            entered: AtomicBool::new(false),
            open: AtomicBool::new(false),
        }
    }

    fn wait_entered(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "run never reached the commit");
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl RelationalStore for GateStore {
    fn begin(&self, dataset: DatasetId) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        if dataset == self.gated {
            self.entered.store(true, Ordering::SeqCst);
            while !self.open.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
        }
        self.inner.begin(dataset)
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

#[test]
fn concurrent_run_on_busy_dataset_observes_contention() {
    let store = Arc::new(GateStore::gating(DS));
    let engine = Arc::new(engine_with(
        store.clone(),
        Arc::new(MemoryIndex::new()),
        EngineConfig::default(),
    ));
    let (a, b) = reparent_scenario(DS);

    let first = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run(&a).map(|o| o.entry().map(|e| e.status)))
    };
    store.wait_entered();
    assert!(engine.is_running(DS));

    let err = engine.run(&b).unwrap_err();
    assert!(err.is_lock_contention());
    assert!(err.is_retryable());

    // other datasets are not blocked
    let other = DatasetId::new(2);
    let outcome = engine.run(&hierarchy(other, 1)).unwrap();
    assert_eq!(outcome.entry().unwrap().status, RevisionStatus::Indexed);

    store.open.store(true, Ordering::SeqCst);
    assert_eq!(first.join().unwrap().unwrap(), Some(RevisionStatus::Indexed));

    assert_eq!(engine.ledger().entries_for(DS).len(), 1);
    assert_eq!(engine.stats().lock_contentions, 1);
    assert_eq!(
        engine.store().latest_revision(DS).unwrap(),
        Some(RevisionId::new(1))
    );
}

#[test]
fn waiting_run_applies_after_the_first_commits() {
    let store = Arc::new(GateStore::gating(DS));
    let engine = Arc::new(engine_with(
        store.clone(),
        Arc::new(MemoryIndex::new()),
        EngineConfig::default().with_lock_policy(LockPolicy::Wait(Duration::from_secs(10))),
    ));
    let (a, b) = reparent_scenario(DS);

    let first = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run(&a).map(|o| o.is_already_applied()))
    };
    store.wait_entered();

    let second = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run(&b).map(|o| o.is_already_applied()))
    };
    thread::sleep(Duration::from_millis(20));
    // the second run is still waiting for the lock
    assert_eq!(engine.ledger().entries().len(), 1);
    store.open.store(true, Ordering::SeqCst);

    assert!(!first.join().unwrap().unwrap());
    assert!(!second.join().unwrap().unwrap());

    let targets: Vec<RevisionId> = engine.ledger().entries().iter().map(|e| e.target).collect();
    assert_eq!(targets, vec![RevisionId::new(1), RevisionId::new(2)]);
    assert_eq!(
        engine.store().latest_revision(DS).unwrap(),
        Some(RevisionId::new(2))
    );
}

#[test]
fn stuck_index_call_does_not_hold_the_dataset() {
    let index = Arc::new(GateIndex::gating(DS));
    let engine = Arc::new(engine_with(
        Arc::new(MemoryStore::new()),
        index.clone(),
        EngineConfig::default(),
    ));
    let (a, b) = reparent_scenario(DS);

    let first = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run(&a).map(|o| o.entry().map(|e| e.status)))
    };
    index.wait_entered();
    assert!(!engine.is_running(DS));
    assert_eq!(
        engine.ledger().entries_for(DS)[0].status,
        RevisionStatus::Committed
    );

    let second = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.run(&b).map(|o| o.entry().map(|e| e.status)))
    };
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.store().latest_revision(DS).unwrap() != Some(RevisionId::new(2)) {
        assert!(Instant::now() < deadline, "second run never committed");
        thread::sleep(Duration::from_millis(2));
    }

    index.open.store(true, Ordering::SeqCst);
    assert_eq!(first.join().unwrap().unwrap(), Some(RevisionStatus::Indexed));
    assert_eq!(second.join().unwrap().unwrap(), Some(RevisionStatus::Indexed));
    assert_eq!(engine.stats().lock_contentions, 0);
}

#[test]
fn recover_resolves_interrupted_runs_after_restart() {
    let dir = tempdir().unwrap();
    let ledger_path = dir.path().join("revisions.log");
    let store: Arc<dyn RelationalStore> = Arc::new(MemoryStore::new());
    let (a, b) = reparent_scenario(DS);
    let other = DatasetId::new(5);

    // a run that committed then crashed, and one that crashed before commit
    {
        let ledger = RevisionLedger::open_file(&ledger_path, LedgerConfig::default()).unwrap();
        let committed = ledger
            .start(DS, None, RevisionId::new(1), KindCounts::default())
            .unwrap();
        let cs = diff(&Snapshot::empty(DS), &a).unwrap();
        TransactionalWriter::new(store.clone())
            .apply(&cs, &CancelToken::new())
            .unwrap();
        ledger
            .start(other, None, RevisionId::new(1), KindCounts::default())
            .unwrap();
        assert_eq!(committed.status, RevisionStatus::Pending);
    }

    let ledger = Arc::new(RevisionLedger::open_file(&ledger_path, LedgerConfig::default()).unwrap());
    let index = Arc::new(MemoryIndex::new());
    let engine =
        SyncEngine::new(store.clone(), index.clone(), ledger.clone(), EngineConfig::default())
            .unwrap();

    let recovery = engine.recover().unwrap();
    assert_eq!(recovery.failed.len(), 1);
    assert_eq!(recovery.failed[0].dataset, other);
    assert_eq!(recovery.reindexed.len(), 1);
    assert_eq!(recovery.reindexed[0].status, RevisionStatus::Indexed);
    assert_eq!(index.len(DS), 3);
    assert!(ledger.by_status(RevisionStatus::Pending).is_empty());

    // the dataset continues from the recovered revision
    let outcome = engine.run(&b).unwrap();
    assert_eq!(outcome.entry().unwrap().source, Some(RevisionId::new(1)));
}

#[test]
fn run_from_json_source() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    std::fs::write(&path, serde_json::to_vec(&hierarchy(DS, 4)).unwrap()).unwrap();

    let index = Arc::new(MemoryIndex::new());
    let engine = engine_with(Arc::new(MemoryStore::new()), index.clone(), EngineConfig::default());
    let outcome = engine.run_from(&JsonFileSource::new(&path)).unwrap();

    let entry = outcome.entry().unwrap();
    assert_eq!(entry.target, RevisionId::new(4));
    assert_eq!(entry.kind_counts.taxa, 3);
    assert_eq!(index.len(DS), 6);
}
