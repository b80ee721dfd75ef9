//! Synchronization run orchestration.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::lock::DatasetLocks;
use crate::source::SnapshotSource;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taxosync_diff::{diff, ChangeSet};
use taxosync_index::{
    FailedOperation, IndexDocument, IndexOperationError, IndexSynchronizer, SearchIndex, SyncReport,
};
use taxosync_ledger::{RevisionEntry, RevisionLedger, RevisionStatus};
use taxosync_model::{DatasetId, RecordKey, RevisionId, Snapshot, ValidationError};
use taxosync_store::{CancelToken, CommitResult, RelationalStore, TransactionalWriter};

/// Statistics about synchronization runs.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Runs that reached the index phase.
    pub runs_committed: u64,
    /// Runs whose relational phase failed.
    pub runs_failed: u64,
    /// Runs skipped because the store was already at the target revision.
    pub already_applied: u64,
    /// Runs refused because their dataset was busy.
    pub lock_contentions: u64,
    /// Index passes that left records stale.
    pub index_failures: u64,
    /// Index retry attempts made.
    pub index_retries: u64,
    /// Time of the last finished run.
    pub last_run_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// How a synchronization run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Committed and fully indexed.
    Indexed {
        /// The ledger entry, now `indexed`.
        entry: RevisionEntry,
        /// Index pass report.
        report: SyncReport,
    },
    /// Committed; some index operations failed and wait for a retry.
    IndexFailed {
        /// The ledger entry, now `index-failed`.
        entry: RevisionEntry,
        /// Index pass report listing the failures.
        report: SyncReport,
    },
    /// The store already holds the target revision; nothing was done.
    AlreadyApplied {
        /// The dataset.
        dataset: DatasetId,
        /// The revision already committed.
        revision: RevisionId,
    },
}

impl RunOutcome {
    /// Returns the ledger entry, if the run created one.
    #[must_use]
    pub fn entry(&self) -> Option<&RevisionEntry> {
        match self {
            Self::Indexed { entry, .. } | Self::IndexFailed { entry, .. } => Some(entry),
            Self::AlreadyApplied { .. } => None,
        }
    }

    /// Returns the index pass report, if there was one.
    #[must_use]
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Indexed { report, .. } | Self::IndexFailed { report, .. } => Some(report),
            Self::AlreadyApplied { .. } => None,
        }
    }

    /// Returns true if the store was already at the target revision.
    #[must_use]
    pub fn is_already_applied(&self) -> bool {
        matches!(self, Self::AlreadyApplied { .. })
    }
}

/// Result of a pass over the ledger's index retry candidates.
#[derive(Debug, Clone, Default)]
pub struct RetryPass {
    /// Entries moved to `indexed`.
    pub resolved: Vec<RevisionEntry>,
    /// Entries still `index-failed` after every attempt.
    pub still_failing: Vec<RevisionEntry>,
}

/// Result of resolving runs interrupted by a restart.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    /// Pending entries whose commit never happened, now `failed`.
    pub failed: Vec<RevisionEntry>,
    /// Entries whose commit happened, re-indexed from the store.
    pub reindexed: Vec<RevisionEntry>,
}

/// Drives synchronization runs.
///
/// A run diffs an incoming snapshot against the committed state, commits
/// the change set in one transaction and then propagates it to the search
/// index. Every run is recorded in the revision ledger; the relational
/// phase and the index phase are recorded separately, so an index failure
/// never hides or undoes a commit.
///
/// At most one run per dataset is in its relational phase. The dataset lock
/// is released as soon as the commit is resolved, so the index phase of one
/// run may overlap the next run. Runs on different datasets may execute
/// concurrently from different threads.
pub struct SyncEngine {
    config: EngineConfig,
    store: Arc<dyn RelationalStore>,
    ledger: Arc<RevisionLedger>,
    writer: TransactionalWriter,
    synchronizer: IndexSynchronizer,
    locks: DatasetLocks,
    stats: RwLock<EngineStats>,
}

impl SyncEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Fails if the index worker pool cannot start.
    pub fn new(
        store: Arc<dyn RelationalStore>,
        index: Arc<dyn SearchIndex>,
        ledger: Arc<RevisionLedger>,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        let synchronizer = IndexSynchronizer::new(Arc::clone(&store), index, config.index.clone())?;
        Ok(Self {
            writer: TransactionalWriter::new(Arc::clone(&store)),
            synchronizer,
            store,
            ledger,
            config,
            locks: DatasetLocks::new(),
            stats: RwLock::new(EngineStats::default()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the revision ledger.
    pub fn ledger(&self) -> &Arc<RevisionLedger> {
        &self.ledger
    }

    /// Returns the relational store.
    pub fn store(&self) -> &Arc<dyn RelationalStore> {
        &self.store
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Returns true if a run for the dataset is in its relational phase.
    pub fn is_running(&self, dataset: DatasetId) -> bool {
        self.locks.is_locked(dataset)
    }

    /// Synchronizes a snapshot.
    pub fn run(&self, snapshot: &Snapshot) -> SyncResult<RunOutcome> {
        self.run_with_cancel(snapshot, &CancelToken::new())
    }

    /// Pulls a snapshot from a source and synchronizes it.
    pub fn run_from(&self, source: &dyn SnapshotSource) -> SyncResult<RunOutcome> {
        let snapshot = source.pull()?;
        self.run(&snapshot)
    }

    /// Synchronizes a snapshot, aborting before commit if `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] if the snapshot has no revision
    /// - [`SyncError::LockContention`] if the dataset stays busy under the
    ///   configured lock policy
    /// - diff and transaction errors, after the ledger entry was marked
    ///   `failed` and the store was left untouched
    ///
    /// Index failures are not errors; they yield
    /// [`RunOutcome::IndexFailed`].
    pub fn run_with_cancel(&self, snapshot: &Snapshot, cancel: &CancelToken) -> SyncResult<RunOutcome> {
        let dataset = snapshot.dataset();
        let target = snapshot
            .revision()
            .ok_or(ValidationError::MissingRevision { dataset })?;

        let guard = match self.locks.acquire(dataset, self.config.lock_policy) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(dataset = %dataset, revision = %target, "dataset busy, run refused");
                let mut stats = self.stats.write();
                stats.lock_contentions += 1;
                stats.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let source = self.store.latest_revision(dataset)?;
        if source == Some(target) {
            tracing::info!(dataset = %dataset, revision = %target, "revision already applied");
            self.stats.write().already_applied += 1;
            return Ok(RunOutcome::AlreadyApplied {
                dataset,
                revision: target,
            });
        }

        let entry = self
            .ledger
            .start(dataset, source, target, snapshot.count_by_kind())?;
        tracing::info!(
            dataset = %dataset,
            revision = %target,
            entry = entry.id,
            records = snapshot.len(),
            "synchronization run started"
        );

        let change_set = match self.commit_phase(snapshot, cancel) {
            Ok(Some(change_set)) => change_set,
            Ok(None) => {
                self.ledger
                    .mark_failed(entry.id, "store reached the target revision during the run")?;
                self.stats.write().already_applied += 1;
                return Ok(RunOutcome::AlreadyApplied {
                    dataset,
                    revision: target,
                });
            }
            Err(e) => {
                tracing::warn!(dataset = %dataset, entry = entry.id, error = %e, "relational phase failed");
                self.ledger.mark_failed(entry.id, e.to_string())?;
                self.record_failure(&e);
                return Err(e);
            }
        };

        self.ledger.mark_committed(entry.id, change_set.counts())?;
        self.stats.write().runs_committed += 1;
        // the commit is resolved; a stuck index call must not block the dataset
        drop(guard);

        let report = self.index_phase(&change_set);
        self.finish_index(entry.id, report)
    }

    /// Retries the index operations of every `index-failed` entry, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Stops at the first entry whose dataset is busy or whose retry cannot
    /// run at all; entries already processed keep their new status.
    pub fn retry_index_failures(&self) -> SyncResult<RetryPass> {
        let mut pass = RetryPass::default();
        for candidate in self.ledger.retry_candidates() {
            let entry = self.retry_entry(candidate.id)?;
            if entry.status == RevisionStatus::Indexed {
                pass.resolved.push(entry);
            } else {
                pass.still_failing.push(entry);
            }
        }
        Ok(pass)
    }

    /// Retries the failed index operations of one entry.
    ///
    /// Current state is re-read from the store for exactly the entry's
    /// failed records. Attempts follow the retry configuration; each
    /// attempt re-issues only what the previous one left failing.
    ///
    /// # Errors
    ///
    /// - [`SyncError::UnknownEntry`] or [`SyncError::NotRetryable`] for an
    ///   entry that does not wait for a retry
    /// - [`SyncError::LockContention`] if the dataset is busy
    pub fn retry_entry(&self, id: u64) -> SyncResult<RevisionEntry> {
        let entry = self
            .ledger
            .get(id)
            .ok_or(SyncError::UnknownEntry { entry: id })?;
        if !entry.is_retry_candidate() {
            return Err(SyncError::NotRetryable {
                entry: id,
                status: entry.status,
            });
        }
        let _guard = self.locks.acquire(entry.dataset, self.config.lock_policy)?;

        let retry = &self.config.retry;
        let mut keys = entry.failed_keys.clone();
        let mut last = SyncReport::default();

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
            }
            self.stats.write().index_retries += 1;

            last = match self.synchronizer.retry(entry.dataset, &keys) {
                Ok(report) => report,
                Err(e) => whole_pass_failed(&keys, &e.to_string()),
            };
            tracing::debug!(
                entry = id,
                attempt,
                requested = keys.len(),
                failed = last.failed.len(),
                "index retry attempt"
            );
            if last.is_success() {
                let entry = self.ledger.mark_indexed(id)?;
                tracing::info!(dataset = %entry.dataset, entry = id, "index retry succeeded");
                return Ok(entry);
            }
            keys = last.failed_keys();
        }

        self.stats.write().index_failures += 1;
        tracing::warn!(entry = id, failed = keys.len(), "index retry left records stale");
        let summary = failure_summary(&last, keys.len() as u64);
        Ok(self.ledger.mark_index_failed(id, keys, summary)?)
    }

    /// Resolves runs left unfinished by a crash or restart.
    ///
    /// A `pending` entry whose target revision reached the store is moved
    /// to `committed`; otherwise it is marked `failed`. Every `committed`
    /// entry is then re-indexed from the store, since the change set that
    /// produced it is gone.
    pub fn recover(&self) -> SyncResult<Recovery> {
        let mut recovery = Recovery::default();

        for entry in self.ledger.by_status(RevisionStatus::Pending) {
            let _guard = self.locks.acquire(entry.dataset, self.config.lock_policy)?;
            if self.store.latest_revision(entry.dataset)? == Some(entry.target) {
                self.ledger.mark_committed(entry.id, entry.counts)?;
            } else {
                tracing::warn!(dataset = %entry.dataset, entry = entry.id, "marking interrupted run failed");
                recovery
                    .failed
                    .push(self.ledger.mark_failed(entry.id, "run interrupted before commit")?);
            }
        }

        for entry in self.ledger.by_status(RevisionStatus::Committed) {
            let _guard = self.locks.acquire(entry.dataset, self.config.lock_policy)?;
            let report = match self.synchronizer.reindex_dataset(entry.dataset) {
                Ok(report) => report,
                Err(e) => {
                    let keys: Vec<RecordKey> = self
                        .store
                        .load_snapshot(entry.dataset)?
                        .records()
                        .map(|r| r.key.clone())
                        .collect();
                    whole_pass_failed(&keys, &e.to_string())
                }
            };
            let entry = if report.is_success() {
                self.ledger.mark_indexed(entry.id)?
            } else {
                let keys = report.failed_keys();
                let summary = failure_summary(&report, report.operations());
                self.ledger.mark_index_failed(entry.id, keys, summary)?
            };
            recovery.reindexed.push(entry);
        }

        if !recovery.failed.is_empty() || !recovery.reindexed.is_empty() {
            tracing::info!(
                failed = recovery.failed.len(),
                reindexed = recovery.reindexed.len(),
                "recovered interrupted runs"
            );
        }
        Ok(recovery)
    }

    /// Diffs against the committed state and applies the change set.
    ///
    /// Returns `None` if the writer found the store already at the target.
    fn commit_phase(&self, snapshot: &Snapshot, cancel: &CancelToken) -> SyncResult<Option<ChangeSet>> {
        let previous = self.store.load_snapshot(snapshot.dataset())?;
        let change_set = diff(&previous, snapshot)?;
        cancel.check()?;

        match self.writer.apply(&change_set, cancel)? {
            CommitResult::Committed { .. } => Ok(Some(change_set)),
            CommitResult::AlreadyApplied { .. } => Ok(None),
        }
    }

    fn index_phase(&self, change_set: &ChangeSet) -> SyncReport {
        let started = Instant::now();
        let report = match self.synchronizer.sync(change_set) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(dataset = %change_set.dataset, error = %e, "index pass aborted");
                let keys: Vec<RecordKey> = change_set.touched_keys().cloned().collect();
                whole_pass_failed(&keys, &e.to_string())
            }
        };
        tracing::debug!(
            dataset = %change_set.dataset,
            elapsed_ms = duration_ms(started.elapsed()),
            "index phase finished"
        );
        report
    }

    fn finish_index(&self, id: u64, report: SyncReport) -> SyncResult<RunOutcome> {
        let mut stats = self.stats.write();
        stats.last_run_time = Some(Instant::now());

        if report.is_success() {
            let entry = self.ledger.mark_indexed(id)?;
            stats.last_error = None;
            tracing::info!(dataset = %entry.dataset, revision = %entry.target, entry = id, "synchronization run indexed");
            return Ok(RunOutcome::Indexed { entry, report });
        }

        let summary = failure_summary(&report, report.operations());
        let entry = self
            .ledger
            .mark_index_failed(id, report.failed_keys(), summary.clone())?;
        stats.index_failures += 1;
        stats.last_error = Some(summary);
        tracing::warn!(
            dataset = %entry.dataset,
            revision = %entry.target,
            entry = id,
            failed = entry.failed_keys.len(),
            "synchronization run committed with stale index records"
        );
        Ok(RunOutcome::IndexFailed { entry, report })
    }

    fn record_failure(&self, error: &SyncError) {
        let mut stats = self.stats.write();
        stats.runs_failed += 1;
        stats.last_run_time = Some(Instant::now());
        stats.last_error = Some(error.to_string());
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

/// Builds the report of a pass that issued no operation.
fn whole_pass_failed(keys: &[RecordKey], reason: &str) -> SyncReport {
    SyncReport {
        failed: keys
            .iter()
            .map(|key| FailedOperation {
                key: key.clone(),
                error: IndexOperationError::new(IndexDocument::id_for(key), reason),
            })
            .collect(),
        ..SyncReport::default()
    }
}

fn failure_summary(report: &SyncReport, attempted: u64) -> String {
    let failed = report.failed_keys().len();
    let mut summary = format!("{failed} of {attempted} index operations failed");
    if report.timed_out {
        summary.push_str(" (index phase timed out)");
    }
    if let Some(first) = report.failed.first() {
        summary.push_str(&format!(", first: {}", first.error.reason));
    }
    summary
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
