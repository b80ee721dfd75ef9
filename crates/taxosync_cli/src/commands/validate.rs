//! Validate command implementation.

use std::path::Path;
use taxosync_engine::{JsonFileSource, SnapshotSource};
use taxosync_model::{DanglingReference, Snapshot};

/// Runs the validate command.
///
/// Loading the file already validates every record; this adds the
/// reference check the diff engine performs before a run.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = JsonFileSource::new(path).pull()?;
    print_summary(&snapshot);

    let dangling = snapshot.dangling_references();
    if dangling.is_empty() {
        println!();
        println!("Snapshot is valid");
        return Ok(());
    }

    println!();
    println!("Dangling references ({}):", dangling.len());
    for line in describe(&dangling) {
        println!("  {line}");
    }
    Err(format!("{} dangling reference(s)", dangling.len()).into())
}

fn print_summary(snapshot: &Snapshot) {
    let counts = snapshot.count_by_kind();
    println!("Snapshot of {}", snapshot.dataset());
    match snapshot.revision() {
        Some(revision) => println!("  Revision:      {revision}"),
        None => println!("  Revision:      (none)"),
    }
    println!("  Names:         {}", counts.names);
    println!("  Taxa:          {}", counts.taxa);
    println!("  Synonyms:      {}", counts.synonyms);
    println!("  Distributions: {}", counts.distributions);
}

fn describe(dangling: &[DanglingReference]) -> Vec<String> {
    dangling
        .iter()
        .map(|r| format!("{}.{} -> {}", r.from, r.field, r.target))
        .collect()
}
