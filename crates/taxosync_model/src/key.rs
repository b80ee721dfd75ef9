//! Identifiers for datasets, revisions and records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a checklist dataset.
///
/// Every record, snapshot and revision entry is scoped by a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub u32);

impl DatasetId {
    /// Creates a new dataset ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataset:{}", self.0)
    }
}

/// Identifier of one revision of a dataset.
///
/// Revisions are assigned by the record source and increase with every
/// import of the same dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(pub u64);

impl RevisionId {
    /// Creates a new revision ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw revision value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev:{}", self.0)
    }
}

/// The partition a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A scientific name, independent of its taxonomic placement.
    Name,
    /// An accepted taxon in the classification tree.
    Taxon,
    /// A synonym pointing at its accepted taxon.
    Synonym,
    /// A geographic distribution of a taxon.
    Distribution,
}

impl RecordKind {
    /// All record kinds, in tie-break order.
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Name,
        RecordKind::Taxon,
        RecordKind::Synonym,
        RecordKind::Distribution,
    ];

    /// Returns the lowercase name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Name => "name",
            RecordKind::Taxon => "taxon",
            RecordKind::Synonym => "synonym",
            RecordKind::Distribution => "distribution",
        }
    }

    /// Parses a kind from its lowercase name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a record: its kind plus its stable ID.
///
/// Two records with the same stable ID but different kinds are different
/// records. Ordering is by kind first, which puts names before taxa.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Record kind.
    pub kind: RecordKind,
    /// Stable identifier assigned by the data publisher.
    pub id: String,
}

impl RecordKey {
    /// Creates a new record key.
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for a taxon key.
    pub fn taxon(id: impl Into<String>) -> Self {
        Self::new(RecordKind::Taxon, id)
    }

    /// Shorthand for a name key.
    pub fn name(id: impl Into<String>) -> Self {
        Self::new(RecordKind::Name, id)
    }

    /// Shorthand for a synonym key.
    pub fn synonym(id: impl Into<String>) -> Self {
        Self::new(RecordKind::Synonym, id)
    }

    /// Shorthand for a distribution key.
    pub fn distribution(id: impl Into<String>) -> Self {
        Self::new(RecordKind::Distribution, id)
    }

    /// Computes the identity hash of this key.
    #[must_use]
    pub fn identity_hash(&self) -> IdentityHash {
        IdentityHash::of(self.kind, &self.id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// 128-bit hash of a record's stable identity.
///
/// Derived from the kind and the stable ID only, so it survives any field
/// change and differs whenever the kind differs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityHash([u8; 16]);

impl IdentityHash {
    /// Hashes a kind and stable ID.
    #[must_use]
    pub fn of(kind: RecordKind, stable_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(stable_id.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }

    /// Creates an identity hash from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns the lowercase hex form, used as the search document ID.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityHash({})", self.to_hex())
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_display() {
        assert_eq!(DatasetId::new(42).to_string(), "dataset:42");
        assert_eq!(RevisionId::new(7).to_string(), "rev:7");
    }

    #[test]
    fn key_display_and_order() {
        let name = RecordKey::name("N1");
        let taxon = RecordKey::taxon("A");
        assert_eq!(taxon.to_string(), "taxon:A");
        assert!(name < taxon);
    }

    #[test]
    fn identity_hash_is_stable() {
        let a = RecordKey::taxon("T1").identity_hash();
        let b = RecordKey::taxon("T1").identity_hash();
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 32);
    }

    #[test]
    fn identity_hash_includes_kind() {
        let taxon = RecordKey::taxon("X").identity_hash();
        let synonym = RecordKey::synonym("X").identity_hash();
        assert_ne!(taxon, synonym);
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("vernacular"), None);
    }
}
