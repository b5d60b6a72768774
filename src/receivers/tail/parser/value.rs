// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use chrono::Utc;

use super::record_name;
use super::traits::Parser;
use crate::receivers::tail::config::{ParserConfig, ValueType};
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::record::{FieldValue, Record};

/// Field name used by the value format
pub const VALUE_FIELD: &str = "value";

/// Turns the whole line into a single typed `value` field.
#[derive(Debug, Clone)]
pub struct ValueParser {
    name: String,
    value_type: ValueType,
}

impl ValueParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            name: record_name(config),
            value_type: config.value_type,
        }
    }

    fn convert(&self, raw: &str) -> Result<FieldValue> {
        let invalid = |kind: &str| Error::Format(format!("cannot parse {:?} as {}", raw, kind));
        match self.value_type {
            ValueType::String => Ok(FieldValue::String(raw.to_string())),
            ValueType::Integer => raw
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| invalid("integer")),
            ValueType::Float => raw
                .parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|_| invalid("float")),
            ValueType::Boolean => raw
                .to_lowercase()
                .parse::<bool>()
                .map(FieldValue::Bool)
                .map_err(|_| invalid("boolean")),
        }
    }
}

impl Parser for ValueParser {
    /// A buffer holding several values yields the last one.
    fn parse(&mut self, buf: &str) -> Result<Vec<Record>> {
        match buf.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
            Some(last) => self.parse_line(last),
            None => Ok(Vec::new()),
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<Vec<Record>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let mut fields = BTreeMap::new();
        fields.insert(VALUE_FIELD.to_string(), self.convert(line)?);
        Ok(vec![Record::new(
            self.name.clone(),
            BTreeMap::new(),
            fields,
            Utc::now(),
        )])
    }
}
