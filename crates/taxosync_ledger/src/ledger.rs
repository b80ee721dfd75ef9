//! The revision ledger.

use crate::entry::{RevisionEntry, RevisionStatus};
use crate::error::{LedgerError, LedgerResult};
use crate::event::LedgerEvent;
use crate::journal::frame::{decode_frames, encode_frame};
use crate::journal::{FileJournal, JournalBackend, MemoryJournal};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use taxosync_diff::ChangeCounts;
use taxosync_model::{DatasetId, KindCounts, RecordKey, RevisionId};

/// Configuration for the revision ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Whether to sync the journal after every event.
    pub sync_on_append: bool,
}

impl LedgerConfig {
    /// Creates the default configuration (sync on every append).
    #[must_use]
    pub fn new() -> Self {
        Self {
            sync_on_append: true,
        }
    }

    /// Sets whether every append is synced.
    #[must_use]
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeMap<u64, RevisionEntry>,
    next_id: u64,
}

impl LedgerState {
    fn apply(&mut self, event: &LedgerEvent) -> LedgerResult<()> {
        let id = event.entry();
        match event.new_entry() {
            Some(entry) => {
                if let Some(existing) = self.entries.get(&id) {
                    return Err(LedgerError::InvalidTransition {
                        entry: id,
                        from: existing.status,
                        to: RevisionStatus::Pending,
                    });
                }
                self.entries.insert(id, entry);
                self.next_id = self.next_id.max(id + 1);
            }
            None => {
                let entry = self
                    .entries
                    .get_mut(&id)
                    .ok_or(LedgerError::UnknownEntry { entry: id })?;
                event.apply_to(entry)?;
            }
        }
        Ok(())
    }
}

/// Durable, append-only record of synchronization runs.
///
/// Every state change is appended to a journal as a [`LedgerEvent`] before
/// it becomes visible; opening a ledger replays the journal. Status changes
/// follow [`RevisionStatus::can_transition_to`]; entries in a terminal
/// status are never modified again.
pub struct RevisionLedger {
    journal: Mutex<Box<dyn JournalBackend>>,
    state: RwLock<LedgerState>,
    config: LedgerConfig,
}

impl RevisionLedger {
    /// Opens a ledger over a journal, replaying its events.
    ///
    /// A torn trailing record is cut off.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be read, a complete record is corrupt, or
    /// the events describe an impossible history.
    pub fn open(mut journal: Box<dyn JournalBackend>, config: LedgerConfig) -> LedgerResult<Self> {
        let image = journal.read_all()?;
        let decoded = decode_frames(&image)?;

        let mut state = LedgerState {
            next_id: 1,
            ..LedgerState::default()
        };
        for (offset, payload) in &decoded.frames {
            let event = LedgerEvent::decode(payload).map_err(|e| {
                LedgerError::corruption(format!("event at offset {offset}: {e}"))
            })?;
            state.apply(&event)?;
        }

        if decoded.valid_len < image.len() as u64 {
            tracing::warn!(
                valid = decoded.valid_len,
                size = image.len(),
                "dropping torn ledger tail"
            );
            journal.truncate(decoded.valid_len)?;
        }

        tracing::debug!(
            entries = state.entries.len(),
            events = decoded.frames.len(),
            "revision ledger opened"
        );

        Ok(Self {
            journal: Mutex::new(journal),
            state: RwLock::new(state),
            config,
        })
    }

    /// Creates a ledger backed by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            journal: Mutex::new(Box::new(MemoryJournal::new())),
            state: RwLock::new(LedgerState {
                next_id: 1,
                ..LedgerState::default()
            }),
            config: LedgerConfig::new().with_sync_on_append(false),
        }
    }

    /// Opens a ledger stored in a file.
    pub fn open_file(path: &Path, config: LedgerConfig) -> LedgerResult<Self> {
        Self::open(Box::new(FileJournal::open(path)?), config)
    }

    /// Starts an entry for a run in `pending`.
    pub fn start(
        &self,
        dataset: DatasetId,
        source: Option<RevisionId>,
        target: RevisionId,
        kind_counts: KindCounts,
    ) -> LedgerResult<RevisionEntry> {
        let mut state = self.state.write();
        let event = LedgerEvent::Started {
            entry: state.next_id,
            dataset,
            source,
            target,
            kind_counts,
            at: Utc::now(),
        };
        let id = self.append(&mut state, &event)?;
        tracing::debug!(entry = id, dataset = %dataset, target = %target, "revision entry started");
        self.entry_in(&state, id)
    }

    /// Moves an entry from `pending` to `committed`.
    pub fn mark_committed(&self, entry: u64, counts: ChangeCounts) -> LedgerResult<RevisionEntry> {
        self.record(LedgerEvent::Committed {
            entry,
            counts,
            at: Utc::now(),
        })
    }

    /// Moves an entry from `pending` to `failed`.
    pub fn mark_failed(&self, entry: u64, error: impl Into<String>) -> LedgerResult<RevisionEntry> {
        self.record(LedgerEvent::Failed {
            entry,
            error: error.into(),
            at: Utc::now(),
        })
    }

    /// Moves an entry to `indexed`.
    pub fn mark_indexed(&self, entry: u64) -> LedgerResult<RevisionEntry> {
        self.record(LedgerEvent::Indexed {
            entry,
            at: Utc::now(),
        })
    }

    /// Moves an entry to `index-failed`, recording the stale identities.
    pub fn mark_index_failed(
        &self,
        entry: u64,
        failed: Vec<RecordKey>,
        error: impl Into<String>,
    ) -> LedgerResult<RevisionEntry> {
        self.record(LedgerEvent::IndexFailed {
            entry,
            failed,
            error: error.into(),
            at: Utc::now(),
        })
    }

    /// Returns an entry by ID.
    #[must_use]
    pub fn get(&self, entry: u64) -> Option<RevisionEntry> {
        self.state.read().entries.get(&entry).cloned()
    }

    /// Returns all entries in start order.
    #[must_use]
    pub fn entries(&self) -> Vec<RevisionEntry> {
        self.state.read().entries.values().cloned().collect()
    }

    /// Returns the entries of one dataset in start order.
    #[must_use]
    pub fn entries_for(&self, dataset: DatasetId) -> Vec<RevisionEntry> {
        self.state
            .read()
            .entries
            .values()
            .filter(|e| e.dataset == dataset)
            .cloned()
            .collect()
    }

    /// Returns the most recent entry of a dataset.
    #[must_use]
    pub fn latest(&self, dataset: DatasetId) -> Option<RevisionEntry> {
        self.state
            .read()
            .entries
            .values()
            .rev()
            .find(|e| e.dataset == dataset)
            .cloned()
    }

    /// Returns the entries in a status, in start order.
    #[must_use]
    pub fn by_status(&self, status: RevisionStatus) -> Vec<RevisionEntry> {
        self.state
            .read()
            .entries
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect()
    }

    /// Returns the entries waiting for an index retry, oldest first.
    #[must_use]
    pub fn retry_candidates(&self) -> Vec<RevisionEntry> {
        self.by_status(RevisionStatus::IndexFailed)
    }

    /// Returns the target revision of the dataset's most recent committed
    /// run.
    #[must_use]
    pub fn latest_committed_revision(&self, dataset: DatasetId) -> Option<RevisionId> {
        self.state
            .read()
            .entries
            .values()
            .rev()
            .find(|e| e.dataset == dataset && e.status.is_committed())
            .map(|e| e.target)
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> LedgerResult<u64> {
        self.journal.lock().size()
    }

    fn record(&self, event: LedgerEvent) -> LedgerResult<RevisionEntry> {
        let mut state = self.state.write();
        let id = self.append(&mut state, &event)?;
        tracing::debug!(entry = id, status = %event.status(), "revision entry updated");
        self.entry_in(&state, id)
    }

    /// Validates, journals, then applies an event.
    fn append(&self, state: &mut LedgerState, event: &LedgerEvent) -> LedgerResult<u64> {
        let id = event.entry();
        match event.new_entry() {
            Some(_) => {}
            None => {
                let entry = state
                    .entries
                    .get(&id)
                    .ok_or(LedgerError::UnknownEntry { entry: id })?;
                if !entry.status.can_transition_to(event.status()) {
                    return Err(LedgerError::InvalidTransition {
                        entry: id,
                        from: entry.status,
                        to: event.status(),
                    });
                }
            }
        }

        let frame = encode_frame(&event.encode()?)?;
        {
            let mut journal = self.journal.lock();
            journal.append(&frame)?;
            if self.config.sync_on_append {
                journal.sync()?;
            }
        }
        state.apply(event)?;
        Ok(id)
    }

    fn entry_in(&self, state: &LedgerState, id: u64) -> LedgerResult<RevisionEntry> {
        state
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::UnknownEntry { entry: id })
    }
}

impl std::fmt::Debug for RevisionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionLedger")
            .field("entries", &self.state.read().entries.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DS: DatasetId = DatasetId::new(5);

    fn reopen(journal: &MemoryJournal) -> RevisionLedger {
        RevisionLedger::open(Box::new(journal.clone()), LedgerConfig::new()).unwrap()
    }

    #[test]
    fn success_path() {
        let ledger = RevisionLedger::in_memory();
        let entry = ledger
            .start(DS, None, RevisionId::new(1), KindCounts::default())
            .unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(entry.status, RevisionStatus::Pending);

        ledger.mark_committed(1, ChangeCounts::default()).unwrap();
        let entry = ledger.mark_indexed(1).unwrap();
        assert_eq!(entry.status, RevisionStatus::Indexed);
        assert_eq!(ledger.latest(DS).unwrap().id, 1);
        assert_eq!(ledger.latest_committed_revision(DS), Some(RevisionId::new(1)));
    }

    #[test]
    fn terminal_entries_are_immutable() {
        let ledger = RevisionLedger::in_memory();
        ledger
            .start(DS, None, RevisionId::new(1), KindCounts::default())
            .unwrap();
        ledger.mark_failed(1, "dangling reference").unwrap();

        let err = ledger.mark_committed(1, ChangeCounts::default()).unwrap_err();
        assert!(err.is_invalid_transition());
        let err = ledger.mark_failed(1, "again").unwrap_err();
        assert!(err.is_invalid_transition());

        let entry = ledger.get(1).unwrap();
        assert_eq!(entry.error.as_deref(), Some("dangling reference"));
        assert_eq!(ledger.latest_committed_revision(DS), None);
    }

    #[test]
    fn unknown_entry() {
        let ledger = RevisionLedger::in_memory();
        assert!(matches!(
            ledger.mark_indexed(42),
            Err(LedgerError::UnknownEntry { entry: 42 })
        ));
    }

    #[test]
    fn refused_transition_is_not_journaled() {
        let journal = MemoryJournal::new();
        let ledger = reopen(&journal);
        ledger
            .start(DS, None, RevisionId::new(1), KindCounts::default())
            .unwrap();
        let size = ledger.journal_size().unwrap();
        assert!(ledger.mark_indexed(1).is_err());
        assert_eq!(ledger.journal_size().unwrap(), size);
    }

    #[test]
    fn replay_restores_state() {
        let journal = MemoryJournal::new();
        {
            let ledger = reopen(&journal);
            ledger
                .start(DS, None, RevisionId::new(1), KindCounts::default())
                .unwrap();
            ledger.mark_committed(1, ChangeCounts::default()).unwrap();
            ledger
                .mark_index_failed(1, vec![RecordKey::taxon("T3")], "1 of 3 failed")
                .unwrap();
            ledger
                .start(DatasetId::new(6), None, RevisionId::new(9), KindCounts::default())
                .unwrap();
        }

        let ledger = reopen(&journal);
        assert_eq!(ledger.entries().len(), 2);
        let candidates = ledger.retry_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].failed_keys, vec![RecordKey::taxon("T3")]);
        assert_eq!(ledger.by_status(RevisionStatus::Pending).len(), 1);

        let next = ledger
            .start(DS, Some(RevisionId::new(1)), RevisionId::new(2), KindCounts::default())
            .unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let journal = MemoryJournal::new();
        {
            let ledger = reopen(&journal);
            ledger
                .start(DS, None, RevisionId::new(1), KindCounts::default())
                .unwrap();
        }
        let mut bytes = journal.data();
        let valid = bytes.len();
        bytes.extend_from_slice(b"TXLG\x01\x00");
        let torn = MemoryJournal::with_data(bytes);

        let ledger = reopen(&torn);
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.journal_size().unwrap(), valid as u64);
    }
}
