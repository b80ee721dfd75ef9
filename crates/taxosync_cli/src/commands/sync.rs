//! Sync command implementation.

use std::path::Path;
use std::sync::Arc;
use taxosync_engine::{EngineConfig, JsonFileSource, RunOutcome, SyncEngine};
use taxosync_index::MemoryIndex;
use taxosync_ledger::RevisionLedger;
use taxosync_store::SqliteStore;
use tracing::info;

/// Runs the sync command.
///
/// The index phase targets an in-process index, so the report shows the
/// index operations a run issues without a search service.
pub fn run(
    db: &Path,
    ledger_path: &Path,
    batch_size: usize,
    snapshot: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::default().with_index_batch_size(batch_size);
    info!("Opening store {:?} and ledger {:?}", db, ledger_path);
    let store = Arc::new(SqliteStore::open(db)?);
    let ledger = Arc::new(RevisionLedger::open_file(ledger_path, config.ledger.clone())?);
    let engine = SyncEngine::new(store, Arc::new(MemoryIndex::new()), ledger, config)?;

    let recovery = engine.recover()?;
    if !recovery.failed.is_empty() || !recovery.reindexed.is_empty() {
        println!(
            "Recovered {} interrupted run(s): {} failed, {} re-indexed",
            recovery.failed.len() + recovery.reindexed.len(),
            recovery.failed.len(),
            recovery.reindexed.len()
        );
    }

    info!("Synchronizing snapshot {:?}", snapshot);
    let outcome = engine.run_from(&JsonFileSource::new(snapshot))?;
    for line in describe(&outcome) {
        println!("{line}");
    }
    Ok(())
}

fn describe(outcome: &RunOutcome) -> Vec<String> {
    let (entry, report) = match outcome {
        RunOutcome::AlreadyApplied { dataset, revision } => {
            return vec![format!("{dataset} is already at {revision}; nothing to do")];
        }
        RunOutcome::Indexed { entry, report } | RunOutcome::IndexFailed { entry, report } => {
            (entry, report)
        }
    };

    let mut lines = vec![
        format!(
            "Entry #{} for {}: {} -> {} [{}]",
            entry.id,
            entry.dataset,
            entry
                .source
                .map_or_else(|| "empty".to_string(), |r| r.to_string()),
            entry.target,
            entry.status
        ),
        format!(
            "  Relational: {} inserted, {} updated, {} deleted, {} unchanged",
            entry.counts.inserted, entry.counts.updated, entry.counts.deleted, entry.counts.unchanged
        ),
        format!(
            "  Index:      {} upserted ({} propagated), {} deleted, {} failed",
            report.upserted,
            report.propagated,
            report.deleted,
            report.failed.len()
        ),
    ];
    for failed in &report.failed {
        lines.push(format!("    {}: {}", failed.key, failed.error.reason));
    }
    lines
}
