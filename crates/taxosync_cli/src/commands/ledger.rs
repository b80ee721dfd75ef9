//! Ledger command implementation.

use std::path::Path;
use taxosync_ledger::{LedgerConfig, RevisionEntry, RevisionLedger, RevisionStatus};
use taxosync_model::DatasetId;
use tracing::info;

/// Runs the ledger command.
pub fn run(
    path: &Path,
    dataset: Option<u32>,
    status: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err("ledger file not found".into());
    }
    let status = status
        .map(|s| RevisionStatus::parse(s).ok_or_else(|| format!("unknown status '{s}'")))
        .transpose()?;

    info!("Reading revision ledger {:?}", path);
    let ledger = RevisionLedger::open_file(path, LedgerConfig::default())?;
    let entries = select(ledger.entries(), dataset.map(DatasetId::new), status);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

fn select(
    entries: Vec<RevisionEntry>,
    dataset: Option<DatasetId>,
    status: Option<RevisionStatus>,
) -> Vec<RevisionEntry> {
    entries
        .into_iter()
        .filter(|e| dataset.map_or(true, |d| e.dataset == d))
        .filter(|e| status.map_or(true, |s| e.status == s))
        .collect()
}

fn print_text_output(entries: &[RevisionEntry]) {
    println!("Revision entries ({} total)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        print!(
            "[#{:06}] {:12} {} {} -> {}",
            entry.id,
            entry.status.as_str(),
            entry.dataset,
            entry
                .source
                .map_or_else(|| "empty".to_string(), |r| r.to_string()),
            entry.target
        );
        print!(
            " +{} ~{} -{}",
            entry.counts.inserted, entry.counts.updated, entry.counts.deleted
        );
        print!(" started={}", entry.started.to_rfc3339());
        if !entry.failed_keys.is_empty() {
            print!(" stale={}", entry.failed_keys.len());
        }
        println!();
        if let Some(error) = &entry.error {
            println!("          error: {error}");
        }
    }
}
