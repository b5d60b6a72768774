// SPDX-License-Identifier: Apache-2.0

//! Structured records produced by the line parsers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Tag key the manager adds to every record with the source file's path.
pub const PATH_TAG: &str = "path";

/// Reserved row key whose string value names the record.
pub const MEASUREMENT_KEY: &str = "measurement";

/// Record name used when neither the line nor the config provides one.
pub const DEFAULT_RECORD_NAME: &str = "tail";

/// A typed field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    String(String),
}

impl FieldValue {
    /// Infer the narrowest type for a raw text value: integer, float, boolean, else string.
    pub fn infer(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            return FieldValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return FieldValue::Float(f);
            }
        }
        match raw {
            "true" => FieldValue::Bool(true),
            "false" => FieldValue::Bool(false),
            _ => FieldValue::String(raw.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}i", v),
            FieldValue::UInt(v) => write!(f, "{}u", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
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

/// A value produced by a row-shaped data source, before it is classified
/// into a tag or a field.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

/// One structured, timestamped unit of output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    name: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: DateTime<Utc>,
}

impl Record {
    pub fn new(
        name: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            tags,
            fields,
            timestamp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Consume the record and return it with `key` set to `value`, replacing
    /// any previous value for that tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Consume the record and return it with field `key` set to `value`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Build a record from a typed row.
///
/// String values become tags, except [`MEASUREMENT_KEY`] whose value names
/// the record. Every other non-null value becomes a field. Nulls are dropped.
/// When the row carries no measurement, `default_name` is used.
pub fn classify_row<I>(default_name: &str, row: I, timestamp: DateTime<Utc>) -> Record
where
    I: IntoIterator<Item = (String, RowValue)>,
{
    let mut name = None;
    let mut tags = BTreeMap::new();
    let mut fields = BTreeMap::new();

    for (key, value) in row {
        match value {
            RowValue::String(s) if key == MEASUREMENT_KEY => name = Some(s),
            RowValue::String(s) => {
                tags.insert(key, s);
            }
            RowValue::Int(i) => {
                fields.insert(key, FieldValue::Int(i));
            }
            RowValue::Float(f) => {
                fields.insert(key, FieldValue::Float(f));
            }
            RowValue::Bool(b) => {
                fields.insert(key, FieldValue::Bool(b));
            }
            RowValue::Null => {}
        }
    }

    Record::new(
        name.unwrap_or_else(|| default_name.to_string()),
        tags,
        fields,
        timestamp,
    )
}
