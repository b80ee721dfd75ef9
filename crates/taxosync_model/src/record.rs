//! Taxonomic records.

use crate::error::{ModelResult, ValidationError};
use crate::key::{DatasetId, IdentityHash, RecordKey, RecordKind};
use crate::schema::KindSchema;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed entity of a checklist dataset.
///
/// Fields are kept in a sorted map so that two records with the same content
/// always compare and serialize identically. References are ordinary fields
/// holding [`Value::Ref`]; which fields may hold them is declared by the
/// kind's [`KindSchema`].
///
/// # Example
///
/// ```rust
/// use taxosync_model::{DatasetId, Record, RecordKey, RecordKind};
///
/// let genus = Record::new(DatasetId::new(1), RecordKind::Taxon, "T1")
///     .with_ref("name", RecordKey::name("N1"))
///     .with_field("rank", "genus");
/// assert!(genus.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Dataset scope.
    pub dataset: DatasetId,
    /// Stable identity.
    pub key: RecordKey,
    /// Field values by name.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates a record without fields.
    pub fn new(dataset: DatasetId, kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            dataset,
            key: RecordKey::new(kind, id),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, returning the record.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a reference field, returning the record.
    #[must_use]
    pub fn with_ref(self, name: impl Into<String>, target: RecordKey) -> Self {
        self.with_field(name, Value::Ref(target))
    }

    /// Sets a field to null, returning the record.
    #[must_use]
    pub fn with_null(self, name: impl Into<String>) -> Self {
        self.with_field(name, Value::Null)
    }

    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.key.kind
    }

    /// Returns the stable ID.
    #[must_use]
    pub fn stable_id(&self) -> &str {
        &self.key.id
    }

    /// Returns the identity hash used as diff key.
    #[must_use]
    pub fn identity_hash(&self) -> IdentityHash {
        self.key.identity_hash()
    }

    /// Returns the schema of this record's kind.
    #[must_use]
    pub fn schema(&self) -> &'static KindSchema {
        self.key.kind.schema()
    }

    /// Gets a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Gets the target of a reference field, if set.
    #[must_use]
    pub fn reference(&self, field: &str) -> Option<&RecordKey> {
        self.fields.get(field).and_then(Value::as_ref_key)
    }

    /// Iterates over the non-null references of this record.
    pub fn references(&self) -> impl Iterator<Item = (&str, &RecordKey)> {
        self.fields
            .iter()
            .filter_map(|(field, value)| value.as_ref_key().map(|key| (field.as_str(), key)))
    }

    /// Validates the record against its kind's schema.
    ///
    /// Checks the stable ID, required fields, the shape of every reference
    /// and that decimals are finite.
    /// Whether a reference resolves is not checked here.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> ModelResult<()> {
        self.validate_stable_id()?;

        let schema = self.schema();
        for field in schema.required {
            match self.fields.get(*field) {
                None => {
                    return Err(ValidationError::MissingField {
                        key: self.key.clone(),
                        field: (*field).to_string(),
                    })
                }
                Some(Value::Null) if !schema.is_reference(field) => {
                    return Err(ValidationError::MissingField {
                        key: self.key.clone(),
                        field: (*field).to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        for (field, value) in &self.fields {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteDecimal {
                    key: self.key.clone(),
                    field: field.clone(),
                });
            }
            match schema.reference(field) {
                Some(spec) => match value {
                    Value::Null if spec.nullable => {}
                    Value::Null => {
                        return Err(ValidationError::NullReference {
                            key: self.key.clone(),
                            field: field.clone(),
                        })
                    }
                    Value::Ref(target) => {
                        if target.kind != spec.target {
                            return Err(ValidationError::WrongReferenceKind {
                                key: self.key.clone(),
                                field: field.clone(),
                                expected: spec.target,
                                actual: target.kind,
                            });
                        }
                        if target.id.trim().is_empty() {
                            return Err(ValidationError::MalformedReference {
                                key: self.key.clone(),
                                field: field.clone(),
                                reason: "empty target id".into(),
                            });
                        }
                        if target == &self.key {
                            return Err(ValidationError::MalformedReference {
                                key: self.key.clone(),
                                field: field.clone(),
                                reason: "record references itself".into(),
                            });
                        }
                    }
                    other => {
                        return Err(ValidationError::MalformedReference {
                            key: self.key.clone(),
                            field: field.clone(),
                            reason: format!("expected ref, found {}", other.tag()),
                        })
                    }
                },
                None if value.contains_reference() => {
                    return Err(ValidationError::UnexpectedReference {
                        key: self.key.clone(),
                        field: field.clone(),
                        tag: value.tag(),
                    })
                }
                None => {}
            }
        }

        Ok(())
    }

    fn validate_stable_id(&self) -> ModelResult<()> {
        let reason = if self.key.id.trim().is_empty() {
            Some("empty")
        } else if self.key.id.chars().any(char::is_control) {
            Some("contains control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ValidationError::InvalidStableId {
                key: self.key.clone(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }
}
