//! Metadata rows and their canonical identifiers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Column carrying the archive-provided id, when the partition has one.
pub const ARCHIVE_ID_FIELD: &str = "cid";

/// Separator between canonical `name=value` entries (ASCII unit separator).
const CANONICAL_SEPARATOR: &[u8] = b"\x1f";

/// Scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Empty cell.
    Null,
    /// Integer value.
    Int(i64),
    /// Finite floating point value.
    Float(f64),
    /// Anything that is not numeric.
    Text(String),
}

impl FieldValue {
    /// Interprets one table cell. Empty and non-finite cells become `Null`.
    #[must_use]
    pub fn from_cell(raw: &str) -> Self {
        let cell = raw.trim();
        if cell.is_empty() || cell.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if let Ok(value) = cell.parse::<i64>() {
            return Self::Int(value);
        }
        if let Ok(value) = cell.parse::<f64>() {
            return if value.is_finite() {
                Self::Float(value)
            } else {
                Self::Null
            };
        }
        Self::Text(cell.to_string())
    }

    /// Returns `true` for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view; whole floats and numeric text are accepted.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => Some(*v as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            Self::Null => None,
        }
    }

    /// Textual view; whole numbers render without a decimal point.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.clone()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(_) => self
                .as_i64()
                .map(|v| v.to_string())
                .or_else(|| Some(self.to_string())),
        }
    }

    fn canonical(&self) -> String {
        match self {
            Self::Null => "n:".to_string(),
            Self::Int(v) => format!("i:{v}"),
            Self::Float(v) => format!("f:{v:?}"),
            Self::Text(s) => format!("s:{s}"),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            Self::Float(value)
        } else {
            Self::Null
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Stable identity of a metadata row within its partition.
///
/// `cid:<value>` when the archive supplies an id, otherwise
/// `sha256:<hex>` over the row's fields in name order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps an id string read back from the store.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// String form as persisted.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One archive file's metadata: field name to scalar value.
///
/// Field names containing `.` are stored with `-` instead so they remain
/// usable as JSON path components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl MetadataRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, normalizing its name.
    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(normalize_field_name(name), value.into());
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Non-null value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).filter(|value| !value.is_null())
    }

    /// Integer view of a field.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_i64)
    }

    /// Float view of a field.
    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    /// Text view of a field.
    #[must_use]
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(FieldValue::as_text)
    }

    /// Iterates fields in name order, nulls included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields, nulls included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` when the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical id of this row.
    #[must_use]
    pub fn id(&self) -> RecordId {
        if let Some(archive_id) = self.get_text(ARCHIVE_ID_FIELD) {
            return RecordId(format!("{ARCHIVE_ID_FIELD}:{archive_id}"));
        }

        let mut hasher = Sha256::new();
        for (index, (name, value)) in self.fields.iter().enumerate() {
            if index > 0 {
                hasher.update(CANONICAL_SEPARATOR);
            }
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.canonical().as_bytes());
        }
        RecordId(format!("sha256:{:x}", hasher.finalize()))
    }
}

impl FromIterator<(String, FieldValue)> for MetadataRecord {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(&name, value);
        }
        record
    }
}

/// Replaces `.` in a column name with `-`.
#[must_use]
pub fn normalize_field_name(name: &str) -> String {
    name.trim().replace('.', "-")
}
