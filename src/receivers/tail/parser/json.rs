// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;

use super::traits::Parser;
use super::{parse_timestamp, record_name};
use crate::receivers::tail::config::ParserConfig;
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::record::{Record, RowValue, classify_row};

/// Parses one JSON object (or array of objects) per line.
///
/// Nested objects and arrays are flattened into `parent_child` and
/// `parent_0` keys. String values become tags unless listed in
/// `string_fields`; a string `measurement` key names the record.
#[derive(Debug, Clone)]
pub struct JsonParser {
    name: String,
    string_fields: HashSet<String>,
    time_key: Option<String>,
    time_format: Option<String>,
}

impl JsonParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            name: record_name(config),
            string_fields: config.json_string_fields.iter().cloned().collect(),
            time_key: config.json_time_key.clone(),
            time_format: config.json_time_format.clone(),
        }
    }

    fn object_to_record(&self, value: Value) -> Result<Record> {
        let mut row = Vec::new();
        flatten("", value, &mut row);

        let mut timestamp = None;
        let mut string_fields = Vec::new();
        let mut classified = Vec::with_capacity(row.len());
        for (key, value) in row {
            if self.time_key.as_deref() == Some(key.as_str()) {
                let raw = match &value {
                    RowValue::String(s) => s.clone(),
                    RowValue::Int(i) => i.to_string(),
                    RowValue::Float(f) => f.to_string(),
                    _ => return Err(Error::Format(format!("time key {} is not a timestamp", key))),
                };
                let format = self.time_format.as_deref().unwrap_or("rfc3339");
                timestamp = Some(parse_timestamp(&raw, format)?);
                continue;
            }
            match value {
                RowValue::String(s) if self.string_fields.contains(&key) => {
                    string_fields.push((key, s))
                }
                value => classified.push((key, value)),
            }
        }

        let record = classify_row(&self.name, classified, timestamp.unwrap_or_else(Utc::now));
        Ok(string_fields
            .into_iter()
            .fold(record, |record, (key, value)| record.with_field(key, value)))
    }
}

impl Parser for JsonParser {
    fn parse(&mut self, buf: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for line in buf.lines() {
            records.extend(self.parse_line(line)?);
        }
        Ok(records)
    }

    fn parse_line(&mut self, line: &str) -> Result<Vec<Record>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let parsed: Value =
            serde_json::from_str(line).map_err(|e| Error::Format(format!("invalid JSON: {}", e)))?;

        match parsed {
            Value::Object(_) => Ok(vec![self.object_to_record(parsed)?]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(_) => self.object_to_record(item),
                    _ => Err(Error::Format(
                        "JSON array must contain only objects".to_string(),
                    )),
                })
                .collect(),
            _ => Err(Error::Format(
                "JSON must be an object at the top level".to_string(),
            )),
        }
    }
}

fn flatten(prefix: &str, value: Value, out: &mut Vec<(String, RowValue)>) {
    let key = |k: &str| {
        if prefix.is_empty() {
            k.to_string()
        } else {
            format!("{}_{}", prefix, k)
        }
    };

    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten(&key(&k), v, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.into_iter().enumerate() {
                flatten(&key(&i.to_string()), v, out);
            }
        }
        Value::Null => out.push((prefix.to_string(), RowValue::Null)),
        Value::Bool(b) => out.push((prefix.to_string(), RowValue::Bool(b))),
        Value::Number(n) => {
            let value = match n.as_i64() {
                Some(i) => RowValue::Int(i),
                None => n.as_f64().map(RowValue::Float).unwrap_or(RowValue::Null),
            };
            out.push((prefix.to_string(), value));
        }
        Value::String(s) => out.push((prefix.to_string(), RowValue::String(s))),
    }
}
