//! Tagged field values.

use crate::key::RecordKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// A record field value.
///
/// # Equality
///
/// Values of different tags are never equal: `Integer(1)` is not
/// `Decimal(1.0)` and `Text("2020-01-01")` is not a `Date`. Within a tag:
///
/// - `Decimal` compares by IEEE total order, so `0.0 != -0.0`; records
///   never hold NaN or infinities, [`Record::validate`] rejects them
///
/// [`Record::validate`]: crate::Record::validate
/// - `Ref` compares by target identity (kind and stable ID)
/// - `Set` compares by membership, element order is irrelevant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Explicit absence of a value.
    Null,
    /// Free text.
    Text(String),
    /// Whole number.
    Integer(i64),
    /// Floating point number.
    Decimal(f64),
    /// Boolean flag.
    Bool(bool),
    /// Calendar date without time zone.
    Date(NaiveDate),
    /// Reference to another record in the same dataset.
    Ref(RecordKey),
    /// Unordered multi-value field.
    Set(BTreeSet<Value>),
}

/// The tag of a [`Value`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueTag {
    /// [`Value::Null`].
    Null,
    /// [`Value::Text`].
    Text,
    /// [`Value::Integer`].
    Integer,
    /// [`Value::Decimal`].
    Decimal,
    /// [`Value::Bool`].
    Bool,
    /// [`Value::Date`].
    Date,
    /// [`Value::Ref`].
    Ref,
    /// [`Value::Set`].
    Set,
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueTag::Null => "null",
            ValueTag::Text => "text",
            ValueTag::Integer => "integer",
            ValueTag::Decimal => "decimal",
            ValueTag::Bool => "bool",
            ValueTag::Date => "date",
            ValueTag::Ref => "ref",
            ValueTag::Set => "set",
        };
        f.write_str(s)
    }
}

impl Value {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Creates a reference value.
    pub fn reference(key: RecordKey) -> Self {
        Value::Ref(key)
    }

    /// Creates a set value from any iterator of values.
    pub fn set<I: IntoIterator<Item = Value>>(values: I) -> Self {
        Value::Set(values.into_iter().collect())
    }

    /// Returns the tag of this value.
    #[must_use]
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Null => ValueTag::Null,
            Value::Text(_) => ValueTag::Text,
            Value::Integer(_) => ValueTag::Integer,
            Value::Decimal(_) => ValueTag::Decimal,
            Value::Bool(_) => ValueTag::Bool,
            Value::Date(_) => ValueTag::Date,
            Value::Ref(_) => ValueTag::Ref,
            Value::Set(_) => ValueTag::Set,
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the referenced key, if this is a reference.
    #[must_use]
    pub fn as_ref_key(&self) -> Option<&RecordKey> {
        match self {
            Value::Ref(key) => Some(key),
            _ => None,
        }
    }

    /// Returns the text, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns false if this value is or contains a NaN or infinite decimal.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Decimal(d) => d.is_finite(),
            Value::Set(values) => values.iter().all(Value::is_finite),
            _ => true,
        }
    }

    /// Returns true if this value is or contains a reference.
    #[must_use]
    pub fn contains_reference(&self) -> bool {
        match self {
            Value::Ref(_) => true,
            Value::Set(values) => values.iter().any(Value::contains_reference),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.total_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Ref(key) => write!(f, "-> {key}"),
            Value::Set(values) => {
                f.write_str("{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<RecordKey> for Value {
    fn from(key: RecordKey) -> Self {
        Value::Ref(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_tag_values_differ() {
        assert_ne!(Value::Integer(1), Value::Decimal(1.0));
        assert_ne!(Value::text("1"), Value::Integer(1));
        assert_ne!(Value::Null, Value::text(""));
    }

    #[test]
    fn decimal_total_equality() {
        assert_eq!(Value::Decimal(f64::NAN), Value::Decimal(f64::NAN));
        assert_ne!(Value::Decimal(0.0), Value::Decimal(-0.0));
        assert_eq!(Value::Decimal(1.5), Value::Decimal(1.5));
    }

    #[test]
    fn references_compare_by_identity() {
        let a = Value::Ref(RecordKey::taxon("T1"));
        let b = Value::Ref(RecordKey::taxon("T1"));
        let c = Value::Ref(RecordKey::synonym("T1"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn sets_ignore_order() {
        let a = Value::set(vec![Value::text("DE"), Value::text("FR")]);
        let b = Value::set(vec![Value::text("FR"), Value::text("DE"), Value::text("DE")]);
        assert_eq!(a, b);
    }

    #[test]
    fn contains_reference_looks_into_sets() {
        let v = Value::set(vec![Value::text("x"), Value::Ref(RecordKey::name("N"))]);
        assert!(v.contains_reference());
        assert!(!Value::text("x").contains_reference());
    }

    #[test]
    fn serde_shape() {
        let v = Value::Ref(RecordKey::taxon("T1"));
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"ref":{"kind":"taxon","id":"T1"}}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
