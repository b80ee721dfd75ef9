//! Snapshot comparison.

use crate::changeset::{ChangeSet, FieldChange, RecordUpdate};
use crate::error::{DiffError, DiffResult, ReferentialError};
use crate::order::{forward_order, reverse_order};
use std::collections::BTreeSet;
use taxosync_model::{Record, Snapshot, Value};

enum Pending<'a> {
    Insert(&'a Record),
    Update(&'a Record, &'a Record, Vec<FieldChange>),
}

impl<'a> Pending<'a> {
    fn target(&self) -> &'a Record {
        match self {
            Pending::Insert(record) | Pending::Update(_, record, _) => *record,
        }
    }
}

/// Computes the change set that turns `previous` into `next`.
///
/// Records are matched by identity hash. Records only in `next` are
/// inserted, records only in `previous` are deleted, and records in both are
/// compared field by field. A kind change on the same stable ID is a delete
/// plus an insert since the kind is part of the identity.
///
/// # Errors
///
/// - [`DiffError::DatasetMismatch`] if the snapshots belong to different
///   datasets
/// - [`ReferentialError::Dangling`] if a reference in `next` does not
///   resolve within `next`
/// - [`ReferentialError::Cycle`] if the records to write or the records to
///   delete reference each other in a loop
pub fn diff(previous: &Snapshot, next: &Snapshot) -> DiffResult<ChangeSet> {
    if previous.dataset() != next.dataset() {
        return Err(DiffError::DatasetMismatch {
            previous: previous.dataset(),
            next: next.dataset(),
        });
    }

    let dangling = next.dangling_references();
    if !dangling.is_empty() {
        return Err(ReferentialError::Dangling {
            dataset: next.dataset(),
            references: dangling,
        }
        .into());
    }

    let mut writes: Vec<Pending<'_>> = Vec::new();
    let mut unchanged: Vec<Record> = Vec::new();

    for record in next.records() {
        match previous.get(&record.key) {
            None => writes.push(Pending::Insert(record)),
            Some(before) => {
                let changes = field_changes(before, record);
                if changes.is_empty() {
                    unchanged.push(record.clone());
                } else {
                    writes.push(Pending::Update(before, record, changes));
                }
            }
        }
    }

    let removed: Vec<&Record> = previous
        .records()
        .filter(|record| !next.contains(&record.key))
        .collect();

    let targets: Vec<&Record> = writes.iter().map(Pending::target).collect();
    let write_order = forward_order(&targets)?;
    let delete_order = reverse_order(&removed)?;

    let mut slots: Vec<Option<Pending<'_>>> = writes.into_iter().map(Some).collect();
    let mut inserted = Vec::new();
    let mut updated = Vec::new();
    for pos in write_order {
        match slots[pos].take() {
            Some(Pending::Insert(record)) => inserted.push(record.clone()),
            Some(Pending::Update(before, after, changes)) => updated.push(RecordUpdate {
                before: before.clone(),
                after: after.clone(),
                changes,
            }),
            None => {}
        }
    }

    let deleted: Vec<Record> = delete_order
        .into_iter()
        .map(|pos| removed[pos].clone())
        .collect();

    let change_set = ChangeSet {
        dataset: next.dataset(),
        source_revision: previous.revision(),
        target_revision: next.revision(),
        inserted,
        deleted,
        updated,
        unchanged,
    };

    tracing::debug!(
        dataset = %change_set.dataset,
        inserted = change_set.inserted.len(),
        updated = change_set.updated.len(),
        deleted = change_set.deleted.len(),
        unchanged = change_set.unchanged.len(),
        "computed change set"
    );

    Ok(change_set)
}

/// Compares two versions of a record over the union of their field names.
///
/// An absent field equals [`Value::Null`]. Values compare by the equality
/// contract of [`Value`]: references by target identity, sets by membership.
#[must_use]
pub fn field_changes(before: &Record, after: &Record) -> Vec<FieldChange> {
    let names: BTreeSet<&String> = before.fields.keys().chain(after.fields.keys()).collect();

    names
        .into_iter()
        .filter_map(|field| {
            let old = before.fields.get(field).unwrap_or(&Value::Null);
            let new = after.fields.get(field).unwrap_or(&Value::Null);
            (old != new).then(|| FieldChange {
                field: field.clone(),
                old: old.clone(),
                new: new.clone(),
            })
        })
        .collect()
}
