//! Change sets: the classified difference between two snapshots.

use crate::error::{DiffError, DiffResult};
use crate::order::forward_order;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taxosync_model::{DatasetId, IdentityHash, Record, RecordKey, RevisionId, Snapshot, Value};

/// Change of a single field between two versions of a record.
///
/// An absent field is reported as [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name.
    pub field: String,
    /// Value in the source snapshot.
    pub old: Value,
    /// Value in the target snapshot.
    pub new: Value,
}

impl FieldChange {
    /// Returns the change with old and new swapped.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            field: self.field.clone(),
            old: self.new.clone(),
            new: self.old.clone(),
        }
    }
}

/// A record present in both snapshots with at least one changed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    /// The record as committed at the source revision.
    pub before: Record,
    /// The record as it appears in the target snapshot.
    pub after: Record,
    /// Per-field delta, sorted by field name.
    pub changes: Vec<FieldChange>,
}

impl RecordUpdate {
    /// Returns the identity of the updated record.
    #[must_use]
    pub fn key(&self) -> &RecordKey {
        &self.after.key
    }

    /// Returns the change of a field, if it changed.
    #[must_use]
    pub fn change(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    /// Returns the update that reverts this one.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            before: self.after.clone(),
            after: self.before.clone(),
            changes: self.changes.iter().map(FieldChange::inverted).collect(),
        }
    }
}

/// Classification of a record by the diff engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Only in the target snapshot.
    Inserted,
    /// Only in the source snapshot.
    Deleted,
    /// In both, with field differences.
    Updated,
    /// In both, identical.
    Unchanged,
}

/// Number of records per change group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    /// Inserted records.
    pub inserted: u64,
    /// Updated records.
    pub updated: u64,
    /// Deleted records.
    pub deleted: u64,
    /// Unchanged records.
    pub unchanged: u64,
}

impl ChangeCounts {
    /// Returns the number of records that require a write.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// One step of the apply plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    /// Remove a record.
    Delete(&'a Record),
    /// Replace a record's fields.
    Update(&'a RecordUpdate),
    /// Add a record.
    Insert(&'a Record),
}

impl Operation<'_> {
    /// Returns the identity the operation touches.
    #[must_use]
    pub fn key(&self) -> &RecordKey {
        match self {
            Operation::Delete(record) | Operation::Insert(record) => &record.key,
            Operation::Update(update) => update.key(),
        }
    }
}

/// The classified difference between a source and a target snapshot.
///
/// # Invariants
///
/// - The four groups are disjoint and together cover the identity union of
///   both snapshots exactly once
/// - `inserted` and `updated` are in dependency-safe forward order
///   (referenced records first)
/// - `deleted` is in dependency-safe reverse order (referencing records first)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Dataset both snapshots belong to.
    pub dataset: DatasetId,
    /// Revision of the source snapshot, `None` for a first import.
    pub source_revision: Option<RevisionId>,
    /// Revision of the target snapshot.
    pub target_revision: Option<RevisionId>,
    /// Records only in the target.
    pub inserted: Vec<Record>,
    /// Records only in the source.
    pub deleted: Vec<Record>,
    /// Records in both with changed fields.
    pub updated: Vec<RecordUpdate>,
    /// Records in both without changes.
    pub unchanged: Vec<Record>,
}

impl ChangeSet {
    /// Returns true if applying the change set writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }

    /// Returns the size of each group.
    #[must_use]
    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            inserted: self.inserted.len() as u64,
            updated: self.updated.len() as u64,
            deleted: self.deleted.len() as u64,
            unchanged: self.unchanged.len() as u64,
        }
    }

    /// Returns the group an identity falls into.
    #[must_use]
    pub fn kind_of(&self, key: &RecordKey) -> Option<ChangeKind> {
        if self.inserted.iter().any(|r| &r.key == key) {
            Some(ChangeKind::Inserted)
        } else if self.deleted.iter().any(|r| &r.key == key) {
            Some(ChangeKind::Deleted)
        } else if self.updated.iter().any(|u| u.key() == key) {
            Some(ChangeKind::Updated)
        } else if self.unchanged.iter().any(|r| &r.key == key) {
            Some(ChangeKind::Unchanged)
        } else {
            None
        }
    }

    /// Returns the apply plan: deletions, then updates, then insertions.
    pub fn operations(&self) -> impl Iterator<Item = Operation<'_>> {
        self.deleted
            .iter()
            .map(Operation::Delete)
            .chain(self.updated.iter().map(Operation::Update))
            .chain(self.inserted.iter().map(Operation::Insert))
    }

    /// Iterates over every identity that requires a write.
    pub fn touched_keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.operations().map(|op| match op {
            Operation::Delete(record) | Operation::Insert(record) => &record.key,
            Operation::Update(update) => &update.after.key,
        })
    }

    /// Returns the change set that reverts this one.
    ///
    /// Insertions become deletions and vice versa, field deltas are inverted
    /// and the revisions swap. The insert and delete groups are reversed and
    /// the updates are re-sorted by their restored references, so the result
    /// is still dependency-safe. If the restored states reference each other
    /// in a loop the updates keep their original order.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let mut updated: Vec<RecordUpdate> = self.updated.iter().map(RecordUpdate::inverted).collect();
        let order = {
            let targets: Vec<&Record> = updated.iter().map(|u| &u.after).collect();
            forward_order(&targets)
        };
        if let Ok(order) = order {
            let mut slots: Vec<Option<RecordUpdate>> = updated.into_iter().map(Some).collect();
            updated = order.into_iter().filter_map(|pos| slots[pos].take()).collect();
        }

        Self {
            dataset: self.dataset,
            source_revision: self.target_revision,
            target_revision: self.source_revision,
            inserted: self.deleted.iter().rev().cloned().collect(),
            deleted: self.inserted.iter().rev().cloned().collect(),
            updated,
            unchanged: self.unchanged.clone(),
        }
    }

    /// Applies the change set to an in-memory snapshot.
    ///
    /// The base must be at the change set's source revision and hold exactly
    /// the `before` state of every deleted and updated record. Surviving
    /// records keep their position; insertions are appended in plan order.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::RevisionMismatch`] or [`DiffError::BaseConflict`]
    /// if the base does not match, or a validation error if the result is
    /// not a valid snapshot.
    pub fn apply_to(&self, base: &Snapshot) -> DiffResult<Snapshot> {
        if base.dataset() != self.dataset {
            return Err(DiffError::DatasetMismatch {
                previous: base.dataset(),
                next: self.dataset,
            });
        }
        if base.revision() != self.source_revision {
            return Err(DiffError::RevisionMismatch {
                expected: self.source_revision,
                actual: base.revision(),
            });
        }

        let mut replaced: HashMap<IdentityHash, Option<&Record>> = HashMap::new();

        for record in &self.deleted {
            Self::expect_base(base, record, "deleted record")?;
            replaced.insert(record.identity_hash(), None);
        }
        for update in &self.updated {
            Self::expect_base(base, &update.before, "updated record")?;
            replaced.insert(update.before.identity_hash(), Some(&update.after));
        }
        for record in &self.inserted {
            if base.contains(&record.key) {
                return Err(DiffError::BaseConflict {
                    key: record.key.clone(),
                    reason: "inserted record already present".into(),
                });
            }
        }

        let mut records: Vec<Record> = base
            .records()
            .filter_map(|record| match replaced.get(&record.identity_hash()) {
                None => Some(record.clone()),
                Some(next) => next.cloned(),
            })
            .collect();
        records.extend(self.inserted.iter().cloned());

        Ok(Snapshot::with_revision(
            self.dataset,
            self.target_revision,
            records,
        )?)
    }

    fn expect_base(base: &Snapshot, expected: &Record, what: &str) -> DiffResult<()> {
        match base.get(&expected.key) {
            Some(found) if found == expected => Ok(()),
            Some(_) => Err(DiffError::BaseConflict {
                key: expected.key.clone(),
                reason: format!("{what} differs from base"),
            }),
            None => Err(DiffError::BaseConflict {
                key: expected.key.clone(),
                reason: format!("{what} missing from base"),
            }),
        }
    }
}
