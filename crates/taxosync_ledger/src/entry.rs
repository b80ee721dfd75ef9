//! Revision entries and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use taxosync_diff::ChangeCounts;
use taxosync_model::{DatasetId, KindCounts, RecordKey, RevisionId};

/// Status of a synchronization run.
///
/// ```text
/// pending ──► committed ──► indexed
///    │            │            ▲
///    ▼            ▼            │
///  failed    index-failed ─────┘
/// ```
///
/// `failed` and `indexed` are terminal. `index-failed` waits for a retry
/// pass and may be re-entered while retries keep failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevisionStatus {
    /// The run started; nothing is committed yet.
    Pending,
    /// The change set is committed to the relational store.
    Committed,
    /// Diff or write failed; the store is unchanged.
    Failed,
    /// The search index reflects the committed revision.
    Indexed,
    /// Some index operations failed and wait for a retry.
    IndexFailed,
}

impl RevisionStatus {
    /// All statuses.
    pub const ALL: [RevisionStatus; 5] = [
        RevisionStatus::Pending,
        RevisionStatus::Committed,
        RevisionStatus::Failed,
        RevisionStatus::Indexed,
        RevisionStatus::IndexFailed,
    ];

    /// Returns true if no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Indexed)
    }

    /// Returns true if the relational commit happened.
    #[must_use]
    pub const fn is_committed(self) -> bool {
        matches!(self, Self::Committed | Self::Indexed | Self::IndexFailed)
    }

    /// Returns true if `next` is a permitted successor.
    #[must_use]
    pub const fn can_transition_to(self, next: RevisionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Committed)
                | (Self::Pending, Self::Failed)
                | (Self::Committed, Self::Indexed)
                | (Self::Committed, Self::IndexFailed)
                | (Self::IndexFailed, Self::Indexed)
                | (Self::IndexFailed, Self::IndexFailed)
        )
    }

    /// Returns the status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Indexed => "indexed",
            Self::IndexFailed => "index-failed",
        }
    }

    /// Parses a status name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one synchronization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEntry {
    /// Ledger-assigned ID, increasing in start order.
    pub id: u64,
    /// Dataset synchronized.
    pub dataset: DatasetId,
    /// Revision the store was at, `None` for a first import.
    pub source: Option<RevisionId>,
    /// Revision being applied.
    pub target: RevisionId,
    /// When the run started.
    pub started: DateTime<Utc>,
    /// When the entry last left `pending` or `committed`.
    pub finished: Option<DateTime<Utc>>,
    /// Records per change group, known once committed.
    pub counts: ChangeCounts,
    /// Records per kind in the target snapshot.
    pub kind_counts: KindCounts,
    /// Current status.
    pub status: RevisionStatus,
    /// Message of the error that failed the run or the last index pass.
    pub error: Option<String>,
    /// Records whose index operations still need a retry.
    pub failed_keys: Vec<RecordKey>,
    /// Number of index passes made, including retries.
    pub index_attempts: u32,
}

impl RevisionEntry {
    /// Returns true if the entry waits for an index retry.
    #[must_use]
    pub fn is_retry_candidate(&self) -> bool {
        self.status == RevisionStatus::IndexFailed
    }
}
