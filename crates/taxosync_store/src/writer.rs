//! Transactional writer.

use crate::cancel::CancelToken;
use crate::error::{StoreError, StoreResult};
use crate::store::{RelationalStore, StoreTransaction};
use std::sync::Arc;
use taxosync_diff::{ChangeCounts, ChangeSet, Operation};
use taxosync_model::RevisionId;

/// Outcome of applying a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// The change set was committed.
    Committed {
        /// Revision the dataset is now at.
        revision: RevisionId,
        /// Number of records written per group.
        counts: ChangeCounts,
    },
    /// The store already records the change set's target revision; nothing
    /// was written.
    AlreadyApplied {
        /// The target revision found in the store.
        revision: RevisionId,
    },
}

impl CommitResult {
    /// Returns the revision the dataset is at after the call.
    #[must_use]
    pub fn revision(&self) -> RevisionId {
        match self {
            Self::Committed { revision, .. } | Self::AlreadyApplied { revision } => *revision,
        }
    }

    /// Returns true if this call wrote to the store.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Applies change sets to a relational store as single units of work.
///
/// Inside the transaction deletions run first (children before parents),
/// then updates, then insertions (parents before children). Either every
/// operation is committed together with the new latest revision, or none is.
#[derive(Clone)]
pub struct TransactionalWriter {
    store: Arc<dyn RelationalStore>,
}

impl TransactionalWriter {
    /// Creates a writer over a store.
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RelationalStore> {
        &self.store
    }

    /// Applies a change set.
    ///
    /// Returns [`CommitResult::AlreadyApplied`] without writing if the store
    /// is already at the change set's target revision.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidOperation`] if the change set has no target
    ///   revision
    /// - [`StoreError::RevisionMismatch`] if the store is neither at the
    ///   source nor at the target revision
    /// - [`StoreError::Cancelled`] if `cancel` fires before commit
    /// - any store error raised while writing or committing
    ///
    /// In every error case the transaction is rolled back.
    pub fn apply(&self, change_set: &ChangeSet, cancel: &CancelToken) -> StoreResult<CommitResult> {
        let dataset = change_set.dataset;
        let target = change_set.target_revision.ok_or_else(|| {
            StoreError::invalid_operation("change set has no target revision")
        })?;

        let mut txn = self.store.begin(dataset)?;
        let latest = txn.latest_revision()?;

        if latest == Some(target) {
            tracing::info!(dataset = %dataset, revision = %target, "change set already applied");
            txn.rollback()?;
            return Ok(CommitResult::AlreadyApplied { revision: target });
        }
        if latest != change_set.source_revision {
            txn.rollback()?;
            return Err(StoreError::RevisionMismatch {
                dataset,
                expected: change_set.source_revision,
                actual: latest,
            });
        }

        for op in change_set.operations() {
            cancel.check()?;
            apply_operation(txn.as_mut(), op)?;
        }
        txn.set_latest_revision(target)?;
        cancel.check()?;
        txn.commit()?;

        let counts = change_set.counts();
        tracing::info!(
            dataset = %dataset,
            revision = %target,
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            "change set committed"
        );
        Ok(CommitResult::Committed {
            revision: target,
            counts,
        })
    }
}

fn apply_operation(txn: &mut dyn StoreTransaction, op: Operation<'_>) -> StoreResult<()> {
    match op {
        Operation::Delete(record) => txn.delete(&record.key),
        Operation::Update(update) => txn.update(&update.after),
        Operation::Insert(record) => txn.insert(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use taxosync_diff::diff;
    use taxosync_model::{DatasetId, Record, RecordKey, RecordKind, Snapshot};

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

    fn snapshot(rev: u64, records: Vec<Record>) -> Snapshot {
        Snapshot::new(DS, RevisionId::new(rev), records).unwrap()
    }

    #[test]
    fn applies_then_reports_already_applied() {
        let store = Arc::new(MemoryStore::new());
        let writer = TransactionalWriter::new(store.clone());
        let next = snapshot(1, vec![name("N1"), taxon("T1", None)]);
        let cs = diff(&Snapshot::empty(DS), &next).unwrap();

        let first = writer.apply(&cs, &CancelToken::new()).unwrap();
        assert!(first.is_committed());
        assert_eq!(store.record_count(DS), 2);

        let second = writer.apply(&cs, &CancelToken::new()).unwrap();
        assert_eq!(
            second,
            CommitResult::AlreadyApplied {
                revision: RevisionId::new(1)
            }
        );
        assert_eq!(store.load_snapshot(DS).unwrap(), next);
    }

    #[test]
    fn stale_base_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let writer = TransactionalWriter::new(store.clone());
        let a = snapshot(1, vec![name("N1")]);
        let b = snapshot(2, vec![name("N1"), taxon("T1", None)]);

        // Store never received revision 1.
        let cs = diff(&a, &b).unwrap();
        let err = writer.apply(&cs, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, StoreError::RevisionMismatch { actual: None, .. }));
        assert_eq!(store.record_count(DS), 0);
    }

    #[test]
    fn cancelled_run_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let writer = TransactionalWriter::new(store.clone());
        let cs = diff(&Snapshot::empty(DS), &snapshot(1, vec![name("N1")])).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            writer.apply(&cs, &cancel),
            Err(StoreError::Cancelled)
        ));
        assert_eq!(store.latest_revision(DS).unwrap(), None);
        assert_eq!(store.record_count(DS), 0);
    }
}
