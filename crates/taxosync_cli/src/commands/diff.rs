//! Diff command implementation.

use serde::Serialize;
use std::path::Path;
use taxosync_diff::{diff, ChangeCounts, ChangeSet, FieldChange, Operation};
use taxosync_engine::{JsonFileSource, SnapshotSource};

/// One planned write, for output.
#[derive(Debug, Serialize)]
pub struct OperationInfo {
    /// `delete`, `update` or `insert`.
    pub op: &'static str,
    /// Record identity.
    pub key: String,
    /// Field deltas of an update.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

/// Change set summary, for output.
#[derive(Debug, Serialize)]
pub struct DiffInfo {
    /// Dataset ID.
    pub dataset: u32,
    /// Source revision.
    pub source: Option<u64>,
    /// Target revision.
    pub target: Option<u64>,
    /// Group sizes.
    pub counts: ChangeCounts,
    /// Writes in apply order.
    pub operations: Vec<OperationInfo>,
}

impl DiffInfo {
    fn from_change_set(change_set: &ChangeSet) -> Self {
        let operations = change_set
            .operations()
            .map(|op| match op {
                Operation::Delete(record) => OperationInfo {
                    op: "delete",
                    key: record.key.to_string(),
                    changes: Vec::new(),
                },
                Operation::Update(update) => OperationInfo {
                    op: "update",
                    key: update.key().to_string(),
                    changes: update.changes.clone(),
                },
                Operation::Insert(record) => OperationInfo {
                    op: "insert",
                    key: record.key.to_string(),
                    changes: Vec::new(),
                },
            })
            .collect();

        Self {
            dataset: change_set.dataset.as_u32(),
            source: change_set.source_revision.map(|r| r.as_u64()),
            target: change_set.target_revision.map(|r| r.as_u64()),
            counts: change_set.counts(),
            operations,
        }
    }
}

/// Runs the diff command.
pub fn run(previous: &Path, next: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let previous = JsonFileSource::new(previous).pull()?;
    let next = JsonFileSource::new(next).pull()?;
    let change_set = diff(&previous, &next)?;
    let info = DiffInfo::from_change_set(&change_set);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        _ => {
            print_text_output(&info);
        }
    }

    Ok(())
}

fn print_text_output(info: &DiffInfo) {
    println!(
        "Change set for dataset:{} ({} -> {})",
        info.dataset,
        revision_label(info.source),
        revision_label(info.target)
    );
    println!("================");
    println!("  Inserted:  {}", info.counts.inserted);
    println!("  Updated:   {}", info.counts.updated);
    println!("  Deleted:   {}", info.counts.deleted);
    println!("  Unchanged: {}", info.counts.unchanged);
    println!();

    for (i, op) in info.operations.iter().enumerate() {
        println!("[{:04}] {:6} {}", i + 1, op.op, op.key);
        for change in &op.changes {
            println!("         {}: {} -> {}", change.field, change.old, change.new);
        }
    }
}

fn revision_label(revision: Option<u64>) -> String {
    revision.map_or_else(|| "empty".to_string(), |r| format!("rev:{r}"))
}
