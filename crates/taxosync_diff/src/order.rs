//! Dependency-safe ordering of records.
//!
//! A record depends on every record it references. Only references between
//! records of the ordered set count; references to records outside the set
//! are already satisfied (or checked elsewhere).

use crate::error::ReferentialError;
use std::collections::{BTreeSet, HashMap};
use taxosync_model::{IdentityHash, Record};

/// Returns positions into `records` such that every record comes after the
/// records it references.
///
/// Records without a dependency between them keep their relative input
/// order, so the result is deterministic for a given input.
///
/// # Errors
///
/// Returns [`ReferentialError::Cycle`] with the keys that could not be
/// ordered if the references form a loop.
pub fn forward_order(records: &[&Record]) -> Result<Vec<usize>, ReferentialError> {
    let position: HashMap<IdentityHash, usize> = records
        .iter()
        .enumerate()
        .map(|(pos, record)| (record.identity_hash(), pos))
        .collect();

    // dependents[target] = records referencing target
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut pending: Vec<usize> = vec![0; records.len()];

    for (pos, record) in records.iter().enumerate() {
        for (_, target) in record.references() {
            if let Some(&target_pos) = position.get(&target.identity_hash()) {
                if records[target_pos].key == *target {
                    dependents[target_pos].push(pos);
                    pending[pos] += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, &count)| count == 0)
        .map(|(pos, _)| pos)
        .collect();
    let mut order = Vec::with_capacity(records.len());

    while let Some(pos) = ready.pop_first() {
        order.push(pos);
        for &dependent in &dependents[pos] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < records.len() {
        let mut keys: Vec<_> = pending
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(pos, _)| records[pos].key.clone())
            .collect();
        keys.sort();
        return Err(ReferentialError::Cycle { keys });
    }

    Ok(order)
}

/// Returns positions into `records` such that every record comes before the
/// records it references (referencing records first).
///
/// # Errors
///
/// Same as [`forward_order`].
pub fn reverse_order(records: &[&Record]) -> Result<Vec<usize>, ReferentialError> {
    let mut order = forward_order(records)?;
    order.reverse();
    Ok(order)
}
