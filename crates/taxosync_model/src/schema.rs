//! Per-kind field schemas.

use crate::key::RecordKind;

/// A declared reference field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefSpec {
    /// Field name.
    pub field: &'static str,
    /// Kind of the referenced record.
    pub target: RecordKind,
    /// Whether the field may be absent or null.
    pub nullable: bool,
}

/// Field schema of one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSchema {
    /// The kind described.
    pub kind: RecordKind,
    /// Fields that must be present and non-null.
    pub required: &'static [&'static str],
    /// The only fields allowed to hold references.
    pub references: &'static [RefSpec],
}

impl KindSchema {
    /// Looks up a declared reference field.
    #[must_use]
    pub fn reference(&self, field: &str) -> Option<&RefSpec> {
        self.references.iter().find(|spec| spec.field == field)
    }

    /// Returns true if the field is a declared reference field.
    #[must_use]
    pub fn is_reference(&self, field: &str) -> bool {
        self.reference(field).is_some()
    }
}

const NAME: KindSchema = KindSchema {
    kind: RecordKind::Name,
    required: &["scientificName", "rank"],
    references: &[RefSpec {
        field: "basionym",
        target: RecordKind::Name,
        nullable: true,
    }],
};

const TAXON: KindSchema = KindSchema {
    kind: RecordKind::Taxon,
    required: &["name"],
    references: &[
        RefSpec {
            field: "name",
            target: RecordKind::Name,
            nullable: false,
        },
        RefSpec {
            field: "parent",
            target: RecordKind::Taxon,
            nullable: true,
        },
    ],
};

const SYNONYM: KindSchema = KindSchema {
    kind: RecordKind::Synonym,
    required: &["name", "accepted"],
    references: &[
        RefSpec {
            field: "name",
            target: RecordKind::Name,
            nullable: false,
        },
        RefSpec {
            field: "accepted",
            target: RecordKind::Taxon,
            nullable: false,
        },
    ],
};

const DISTRIBUTION: KindSchema = KindSchema {
    kind: RecordKind::Distribution,
    required: &["taxon", "area"],
    references: &[RefSpec {
        field: "taxon",
        target: RecordKind::Taxon,
        nullable: false,
    }],
};

impl RecordKind {
    /// Returns the schema of this kind.
    #[must_use]
    pub const fn schema(self) -> &'static KindSchema {
        match self {
            RecordKind::Name => &NAME,
            RecordKind::Taxon => &TAXON,
            RecordKind::Synonym => &SYNONYM,
            RecordKind::Distribution => &DISTRIBUTION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_matching_schema() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.schema().kind, kind);
        }
    }

    #[test]
    fn synonym_accepted_is_required_reference() {
        let spec = RecordKind::Synonym.schema().reference("accepted").unwrap();
        assert_eq!(spec.target, RecordKind::Taxon);
        assert!(!spec.nullable);
    }

    #[test]
    fn taxon_parent_is_nullable() {
        let schema = RecordKind::Taxon.schema();
        assert!(schema.reference("parent").unwrap().nullable);
        assert!(!schema.is_reference("rank"));
    }
}
