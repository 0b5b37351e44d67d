//! Document value model.
//!
//! Records flowing through the engine are [`Document`]s: ordered maps from
//! field name to [`FieldValue`]. Unlike plain JSON, values can carry native
//! dates and identifiers so that coerced filter values compare correctly
//! against stored data.

use crate::id::DocumentId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A stored record.
pub type Document = BTreeMap<String, FieldValue>;

/// A single value inside a document or a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Id(DocumentId),
    Array(Vec<FieldValue>),
    Document(Document),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            FieldValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Cross-type ordering rank. Values of different kinds sort by rank.
    fn type_rank(&self) -> u8 {
        match self {
            FieldValue::Null => 0,
            FieldValue::Int(_) | FieldValue::Float(_) => 1,
            FieldValue::String(_) => 2,
            FieldValue::Document(_) => 3,
            FieldValue::Array(_) => 4,
            FieldValue::Id(_) => 5,
            FieldValue::Bool(_) => 6,
            FieldValue::Date(_) => 7,
        }
    }

    /// Total ordering used for sorting. Numbers compare numerically
    /// regardless of integer/float representation.
    pub fn total_cmp(&self, other: &FieldValue) -> Ordering {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (a, b) if a.type_rank() == 1 && b.type_rank() == 1 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (FieldValue::String(a), FieldValue::String(b)) => a.cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
            (FieldValue::Id(a), FieldValue::Id(b)) => a.cmp(b),
            (FieldValue::Array(a), FieldValue::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (FieldValue::Document(a), FieldValue::Document(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    /// Ordering restricted to comparable kinds. Returns `None` when the two
    /// values are of different kinds, which makes range predicates fail
    /// instead of matching by type rank.
    pub fn partial_cmp_same_kind(&self, other: &FieldValue) -> Option<Ordering> {
        if self.type_rank() != other.type_rank() || self.is_null() {
            return None;
        }
        Some(self.total_cmp(other))
    }

    /// Equality with numeric widening (`Int(1) == Float(1.0)`).
    pub fn loose_eq(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Int(_), FieldValue::Float(_)) | (FieldValue::Float(_), FieldValue::Int(_)) => {
                self.as_f64() == other.as_f64()
            }
            (FieldValue::Array(a), FieldValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => self == other,
        }
    }

    /// Convert from JSON. Strings stay strings; callers decide on coercion.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Array(items) => {
                FieldValue::Array(items.into_iter().map(FieldValue::from_json).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Document(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as JSON. Dates become RFC 3339 strings, identifiers hex strings.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Date(d) => {
                serializer.serialize_str(&d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            FieldValue::Id(id) => id.serialize(serializer),
            FieldValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            FieldValue::Document(doc) => {
                let mut map = serializer.serialize_map(Some(doc.len()))?;
                for (k, v) in doc {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Date(v)
    }
}

impl From<DocumentId> for FieldValue {
    fn from(v: DocumentId) -> Self {
        FieldValue::Id(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::Array(v)
    }
}

impl From<Document> for FieldValue {
    fn from(v: Document) -> Self {
        FieldValue::Document(v)
    }
}

/// Build a document from a JSON object. Non-object input yields `None`.
pub fn document_from_json(value: serde_json::Value) -> Option<Document> {
    match FieldValue::from_json(value) {
        FieldValue::Document(doc) => Some(doc),
        _ => None,
    }
}

/// Resolve a dotted path (`user.address.city`) inside a document.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a FieldValue> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            FieldValue::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted path, creating intermediate documents as needed.
/// A non-document value in the middle of the path is replaced.
pub fn set_path(doc: &mut Document, path: &str, value: FieldValue) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| FieldValue::Document(Document::new()));
            if !matches!(entry, FieldValue::Document(_)) {
                *entry = FieldValue::Document(Document::new());
            }
            if let FieldValue::Document(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Remove a dotted path, returning the removed value.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<FieldValue> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head)? {
            FieldValue::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}
