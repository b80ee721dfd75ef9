//! Dataset snapshots.

use crate::error::{ModelResult, ValidationError};
use crate::key::{DatasetId, IdentityHash, RecordKey, RecordKind, RevisionId};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The full record set of one dataset at one revision.
///
/// Records keep their source order. Identities are unique, every record
/// belongs to the snapshot's dataset and has passed [`Record::validate`].
/// Records are held in a flat arena addressed by identity hash; references
/// between them are keys, never pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SnapshotData", into = "SnapshotData")]
pub struct Snapshot {
    dataset: DatasetId,
    revision: Option<RevisionId>,
    records: Vec<Record>,
    by_hash: HashMap<IdentityHash, usize>,
}

/// Serialized form of a snapshot.
#[derive(Serialize, Deserialize)]
struct SnapshotData {
    dataset: DatasetId,
    #[serde(default)]
    revision: Option<RevisionId>,
    #[serde(default)]
    records: Vec<Record>,
}

impl TryFrom<SnapshotData> for Snapshot {
    type Error = ValidationError;

    fn try_from(data: SnapshotData) -> ModelResult<Self> {
        Self::build(data.dataset, data.revision, data.records)
    }
}

impl From<Snapshot> for SnapshotData {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            dataset: snapshot.dataset,
            revision: snapshot.revision,
            records: snapshot.records,
        }
    }
}

/// A reference whose target is not part of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// The referencing record.
    pub from: RecordKey,
    /// The reference field.
    pub field: String,
    /// The missing target.
    pub target: RecordKey,
}

/// Number of records per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCounts {
    /// Name records.
    pub names: u64,
    /// Taxon records.
    pub taxa: u64,
    /// Synonym records.
    pub synonyms: u64,
    /// Distribution records.
    pub distributions: u64,
}

impl KindCounts {
    /// Counts one record of the given kind.
    pub fn add(&mut self, kind: RecordKind) {
        *self.slot(kind) += 1;
    }

    /// Returns the count for a kind.
    #[must_use]
    pub fn get(&self, kind: RecordKind) -> u64 {
        match kind {
            RecordKind::Name => self.names,
            RecordKind::Taxon => self.taxa,
            RecordKind::Synonym => self.synonyms,
            RecordKind::Distribution => self.distributions,
        }
    }

    /// Returns the total over all kinds.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.names + self.taxa + self.synonyms + self.distributions
    }

    fn slot(&mut self, kind: RecordKind) -> &mut u64 {
        match kind {
            RecordKind::Name => &mut self.names,
            RecordKind::Taxon => &mut self.taxa,
            RecordKind::Synonym => &mut self.synonyms,
            RecordKind::Distribution => &mut self.distributions,
        }
    }
}

impl Snapshot {
    /// Creates a snapshot of a dataset revision.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if a record is invalid, belongs to
    /// another dataset, or an identity occurs twice.
    pub fn new(dataset: DatasetId, revision: RevisionId, records: Vec<Record>) -> ModelResult<Self> {
        Self::build(dataset, Some(revision), records)
    }

    /// Creates the empty snapshot that precedes a dataset's first import.
    #[must_use]
    pub fn empty(dataset: DatasetId) -> Self {
        Self {
            dataset,
            revision: None,
            records: Vec::new(),
            by_hash: HashMap::new(),
        }
    }

    /// Creates a snapshot with an optional revision.
    ///
    /// Stores use this to rebuild the last committed state, which has no
    /// revision before the first import.
    ///
    /// # Errors
    ///
    /// Same as [`Snapshot::new`].
    pub fn with_revision(
        dataset: DatasetId,
        revision: Option<RevisionId>,
        records: Vec<Record>,
    ) -> ModelResult<Self> {
        Self::build(dataset, revision, records)
    }

    fn build(
        dataset: DatasetId,
        revision: Option<RevisionId>,
        records: Vec<Record>,
    ) -> ModelResult<Self> {
        let mut by_hash: HashMap<IdentityHash, usize> = HashMap::with_capacity(records.len());

        for (pos, record) in records.iter().enumerate() {
            if record.dataset != dataset {
                return Err(ValidationError::DatasetMismatch {
                    key: record.key.clone(),
                    expected: dataset,
                    actual: record.dataset,
                });
            }
            record.validate()?;

            if let Some(&existing) = by_hash.get(&record.identity_hash()) {
                let other = &records[existing].key;
                if other == &record.key {
                    return Err(ValidationError::DuplicateRecord {
                        key: record.key.clone(),
                    });
                }
                return Err(ValidationError::HashCollision {
                    first: other.clone(),
                    second: record.key.clone(),
                });
            }
            by_hash.insert(record.identity_hash(), pos);
        }

        Ok(Self {
            dataset,
            revision,
            records,
            by_hash,
        })
    }

    /// Returns the dataset.
    #[must_use]
    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }

    /// Returns the revision, `None` before the first import.
    #[must_use]
    pub fn revision(&self) -> Option<RevisionId> {
        self.revision
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the snapshot has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over records in source order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Consumes the snapshot, returning its records.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Looks up a record by identity hash.
    #[must_use]
    pub fn get_by_hash(&self, hash: &IdentityHash) -> Option<&Record> {
        self.by_hash.get(hash).map(|&pos| &self.records[pos])
    }

    /// Looks up a record by key.
    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.get_by_hash(&key.identity_hash())
            .filter(|record| &record.key == key)
    }

    /// Returns true if the snapshot contains the identity.
    #[must_use]
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.get(key).is_some()
    }

    /// Returns every reference whose target is not in this snapshot.
    #[must_use]
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        self.records
            .iter()
            .flat_map(|record| {
                record
                    .references()
                    .filter(|(_, target)| !self.contains(target))
                    .map(|(field, target)| DanglingReference {
                        from: record.key.clone(),
                        field: field.to_string(),
                        target: target.clone(),
                    })
            })
            .collect()
    }

    /// Counts records per kind.
    #[must_use]
    pub fn count_by_kind(&self) -> KindCounts {
        let mut counts = KindCounts::default();
        for record in &self.records {
            counts.add(record.kind());
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DS: DatasetId = DatasetId::new(7);

    fn name(id: &str) -> Record {
        Record::new(DS, RecordKind::Name, id)
            .with_field("scientificName", format!("Name {id}"))
            .with_field("rank", "species")
    }

    fn taxon(id: &str, name_id: &str, parent: Option<&str>) -> Record {
        let t = Record::new(DS, RecordKind::Taxon, id).with_ref("name", RecordKey::name(name_id));
        match parent {
            Some(p) => t.with_ref("parent", RecordKey::taxon(p)),
            None => t.with_null("parent"),
        }
    }

    #[test]
    fn lookup_by_key() {
        let snap = Snapshot::new(
            DS,
            RevisionId::new(1),
            vec![name("N1"), taxon("T1", "N1", None)],
        )
        .unwrap();

        assert_eq!(snap.len(), 2);
        assert!(snap.contains(&RecordKey::taxon("T1")));
        assert!(!snap.contains(&RecordKey::synonym("T1")));
        assert_eq!(snap.revision(), Some(RevisionId::new(1)));
    }

    #[test]
    fn duplicate_identity_rejected() {
        let result = Snapshot::new(DS, RevisionId::new(1), vec![name("N1"), name("N1")]);
        assert!(matches!(
            result,
            Err(ValidationError::DuplicateRecord { .. })
        ));
    }

    #[test]
    fn same_id_different_kind_allowed() {
        let result = Snapshot::new(
            DS,
            RevisionId::new(1),
            vec![name("X"), taxon("X", "X", None)],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn dataset_mismatch_rejected() {
        let foreign = Record::new(DatasetId::new(8), RecordKind::Name, "N1")
            .with_field("scientificName", "Abies")
            .with_field("rank", "genus");
        let result = Snapshot::new(DS, RevisionId::new(1), vec![foreign]);
        assert!(matches!(
            result,
            Err(ValidationError::DatasetMismatch { .. })
        ));
    }

    #[test]
    fn invalid_record_rejected() {
        let result = Snapshot::new(
            DS,
            RevisionId::new(1),
            vec![Record::new(DS, RecordKind::Taxon, "T1")],
        );
        assert!(matches!(result, Err(ValidationError::MissingField { .. })));
    }

    #[test]
    fn dangling_references_reported() {
        let snap = Snapshot::new(
            DS,
            RevisionId::new(1),
            vec![name("N1"), taxon("T2", "N1", Some("T1"))],
        )
        .unwrap();

        let dangling = snap.dangling_references();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].from, RecordKey::taxon("T2"));
        assert_eq!(dangling[0].field, "parent");
        assert_eq!(dangling[0].target, RecordKey::taxon("T1"));
    }

    #[test]
    fn counts_by_kind() {
        let snap = Snapshot::new(
            DS,
            RevisionId::new(1),
            vec![name("N1"), name("N2"), taxon("T1", "N1", None)],
        )
        .unwrap();
        let counts = snap.count_by_kind();
        assert_eq!(counts.names, 2);
        assert_eq!(counts.taxa, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn json_roundtrip_revalidates() {
        let snap = Snapshot::new(DS, RevisionId::new(3), vec![name("N1")]).unwrap();
        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);

        let broken = r#"{"dataset":7,"revision":1,"records":[{"dataset":7,"key":{"kind":"taxon","id":"T1"},"fields":{}}]}"#;
        assert!(serde_json::from_str::<Snapshot>(broken).is_err());
    }

    #[test]
    fn empty_snapshot_has_no_revision() {
        let snap = Snapshot::empty(DS);
        assert!(snap.is_empty());
        assert_eq!(snap.revision(), None);
    }
}
