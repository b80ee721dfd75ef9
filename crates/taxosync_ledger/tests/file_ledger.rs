//! Ledger persistence across reopen.

use std::fs::OpenOptions;
use std::io::Write;
use taxosync_diff::ChangeCounts;
use taxosync_ledger::{LedgerConfig, LedgerError, RevisionLedger, RevisionStatus};
use taxosync_model::{DatasetId, KindCounts, RecordKey, RevisionId};
use tempfile::tempdir;

const DS: DatasetId = DatasetId::new(1);

#[test]
fn entries_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger").join("revisions.log");

    {
        let ledger = RevisionLedger::open_file(&path, LedgerConfig::default()).unwrap();
        let kinds = KindCounts {
            names: 1,
            taxa: 3,
            ..KindCounts::default()
        };
        ledger.start(DS, None, RevisionId::new(1), kinds).unwrap();
        ledger
            .mark_committed(
                1,
                ChangeCounts {
                    inserted: 4,
                    ..ChangeCounts::default()
                },
            )
            .unwrap();
        ledger.mark_indexed(1).unwrap();

        ledger
            .start(DS, Some(RevisionId::new(1)), RevisionId::new(2), KindCounts::default())
            .unwrap();
        ledger
            .mark_committed(
                2,
                ChangeCounts {
                    updated: 1,
                    ..ChangeCounts::default()
                },
            )
            .unwrap();
        ledger
            .mark_index_failed(2, vec![RecordKey::taxon("T2")], "1 of 2 operations failed")
            .unwrap();
    }

    let ledger = RevisionLedger::open_file(&path, LedgerConfig::default()).unwrap();
    let first = ledger.get(1).unwrap();
    assert_eq!(first.status, RevisionStatus::Indexed);
    assert_eq!(first.counts.inserted, 4);
    assert_eq!(first.kind_counts.taxa, 3);

    let second = ledger.get(2).unwrap();
    assert_eq!(second.status, RevisionStatus::IndexFailed);
    assert_eq!(second.failed_keys, vec![RecordKey::taxon("T2")]);
    assert_eq!(second.index_attempts, 1);

    // a retry after restart resolves the entry
    let resolved = ledger.mark_indexed(2).unwrap();
    assert_eq!(resolved.index_attempts, 2);
    assert!(resolved.failed_keys.is_empty());
    assert!(ledger.retry_candidates().is_empty());
    assert_eq!(ledger.latest_committed_revision(DS), Some(RevisionId::new(2)));
}

#[test]
fn torn_write_is_dropped_and_journal_stays_appendable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("revisions.log");

    {
        let ledger = RevisionLedger::open_file(&path, LedgerConfig::default()).unwrap();
        ledger
            .start(DS, None, RevisionId::new(1), KindCounts::default())
            .unwrap();
    }
    let clean_len = std::fs::metadata(&path).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"TXLG\x01\x00\x40\x00\x00\x00partial").unwrap();
    }

    let ledger = RevisionLedger::open_file(&path, LedgerConfig::default()).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
    ledger.mark_failed(1, "run interrupted").unwrap();
    drop(ledger);

    let ledger = RevisionLedger::open_file(&path, LedgerConfig::default()).unwrap();
    assert_eq!(ledger.get(1).unwrap().status, RevisionStatus::Failed);
}

#[test]
fn corrupted_record_refuses_to_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("revisions.log");
    {
        let ledger = RevisionLedger::open_file(&path, LedgerConfig::default()).unwrap();
        ledger
            .start(DS, None, RevisionId::new(1), KindCounts::default())
            .unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[12] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    let err = RevisionLedger::open_file(&path, LedgerConfig::default()).unwrap_err();
    assert!(matches!(err, LedgerError::ChecksumMismatch { .. }));
}
