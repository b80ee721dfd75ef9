//! Ledger events, the unit appended to the journal.

use crate::entry::{RevisionEntry, RevisionStatus};
use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taxosync_diff::ChangeCounts;
use taxosync_model::{DatasetId, KindCounts, RecordKey, RevisionId};

/// A state change of one revision entry.
///
/// Entries are never rewritten in place; their current state is the fold
/// of their events in journal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A run started; creates the entry in `pending`.
    Started {
        /// Entry ID.
        entry: u64,
        /// Dataset synchronized.
        dataset: DatasetId,
        /// Revision the store was at.
        source: Option<RevisionId>,
        /// Revision being applied.
        target: RevisionId,
        /// Records per kind in the target snapshot.
        kind_counts: KindCounts,
        /// Event time.
        at: DateTime<Utc>,
    },
    /// The relational commit succeeded.
    Committed {
        /// Entry ID.
        entry: u64,
        /// Records per change group.
        counts: ChangeCounts,
        /// Event time.
        at: DateTime<Utc>,
    },
    /// Diff or write failed.
    Failed {
        /// Entry ID.
        entry: u64,
        /// Triggering error.
        error: String,
        /// Event time.
        at: DateTime<Utc>,
    },
    /// An index pass succeeded for every record.
    Indexed {
        /// Entry ID.
        entry: u64,
        /// Event time.
        at: DateTime<Utc>,
    },
    /// An index pass left records stale.
    IndexFailed {
        /// Entry ID.
        entry: u64,
        /// Records still needing an index operation.
        failed: Vec<RecordKey>,
        /// Summary of the failure.
        error: String,
        /// Event time.
        at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Returns the entry the event belongs to.
    #[must_use]
    pub fn entry(&self) -> u64 {
        match self {
            Self::Started { entry, .. }
            | Self::Committed { entry, .. }
            | Self::Failed { entry, .. }
            | Self::Indexed { entry, .. }
            | Self::IndexFailed { entry, .. } => *entry,
        }
    }

    /// Returns the status the entry has after this event.
    #[must_use]
    pub fn status(&self) -> RevisionStatus {
        match self {
            Self::Started { .. } => RevisionStatus::Pending,
            Self::Committed { .. } => RevisionStatus::Committed,
            Self::Failed { .. } => RevisionStatus::Failed,
            Self::Indexed { .. } => RevisionStatus::Indexed,
            Self::IndexFailed { .. } => RevisionStatus::IndexFailed,
        }
    }

    /// Encodes the event as CBOR.
    pub fn encode(&self) -> LedgerResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| LedgerError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes an event from CBOR.
    pub fn decode(bytes: &[u8]) -> LedgerResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    /// Applies a follow-up event to an existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] if the entry's status does
    /// not permit the event, including a second `Started` for the entry.
    pub fn apply_to(&self, entry: &mut RevisionEntry) -> LedgerResult<()> {
        let next = self.status();
        if matches!(self, Self::Started { .. }) || !entry.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                entry: entry.id,
                from: entry.status,
                to: next,
            });
        }

        match self {
            Self::Started { .. } => {}
            Self::Committed { counts, .. } => {
                entry.counts = *counts;
            }
            Self::Failed { error, at, .. } => {
                entry.error = Some(error.clone());
                entry.finished = Some(*at);
            }
            Self::Indexed { at, .. } => {
                entry.index_attempts += 1;
                entry.failed_keys.clear();
                entry.error = None;
                entry.finished = Some(*at);
            }
            Self::IndexFailed {
                failed, error, at, ..
            } => {
                entry.index_attempts += 1;
                entry.failed_keys = failed.clone();
                entry.error = Some(error.clone());
                entry.finished = Some(*at);
            }
        }
        entry.status = next;
        Ok(())
    }

    /// Creates the entry described by a `Started` event.
    #[must_use]
    pub fn new_entry(&self) -> Option<RevisionEntry> {
        match self {
            Self::Started {
                entry,
                dataset,
                source,
                target,
                kind_counts,
                at,
            } => Some(RevisionEntry {
                id: *entry,
                dataset: *dataset,
                source: *source,
                target: *target,
                started: *at,
                finished: None,
                counts: ChangeCounts::default(),
                kind_counts: *kind_counts,
                status: RevisionStatus::Pending,
                error: None,
                failed_keys: Vec::new(),
                index_attempts: 0,
            }),
            _ => None,
        }
    }
}
