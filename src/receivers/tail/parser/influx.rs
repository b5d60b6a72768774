// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use super::traits::Parser;
use crate::receivers::tail::config::ParserConfig;
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::record::{FieldValue, Record};

/// Parses line protocol:
///
/// ```text
/// measurement[,tag=value...] field=value[,field=value...] [unix_nanos]
/// ```
#[derive(Debug, Clone, Default)]
pub struct InfluxParser {
    name_override: Option<String>,
}

impl InfluxParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            name_override: config.name_override.clone(),
        }
    }

    fn parse_point(&self, line: &str) -> Result<Record> {
        let sections = split_unescaped(line, ' ', true);
        let sections: Vec<&str> = sections.into_iter().filter(|s| !s.is_empty()).collect();
        if sections.len() < 2 || sections.len() > 3 {
            return Err(Error::Format(format!(
                "expected measurement, fields and optional timestamp, found {} sections",
                sections.len()
            )));
        }

        let mut series = split_unescaped(sections[0], ',', false).into_iter();
        let measurement = series
            .next()
            .map(unescape)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::Format("missing measurement".to_string()))?;

        let mut tags = BTreeMap::new();
        for tag in series {
            let (key, value) = split_pair(tag)?;
            tags.insert(unescape(key), unescape(value));
        }

        let mut fields = BTreeMap::new();
        for field in split_unescaped(sections[1], ',', true) {
            let (key, value) = split_pair(field)?;
            fields.insert(unescape(key), parse_field_value(value)?);
        }

        let timestamp = match sections.get(2) {
            Some(raw) => parse_nanos(raw)?,
            None => Utc::now(),
        };

        Ok(Record::new(
            self.name_override.clone().unwrap_or(measurement),
            tags,
            fields,
            timestamp,
        ))
    }
}

impl Parser for InfluxParser {
    fn parse(&mut self, buf: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for line in buf.lines() {
            records.extend(self.parse_line(line)?);
        }
        Ok(records)
    }

    fn parse_line(&mut self, line: &str) -> Result<Vec<Record>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Vec::new());
        }
        Ok(vec![self.parse_point(line)?])
    }
}

/// Split on `sep` where it is not escaped with `\` and, when `quotes` is
/// set, not inside a double-quoted string.
fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut in_quotes = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quotes => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn split_pair(s: &str) -> Result<(&str, &str)> {
    let mut parts = split_unescaped(s, '=', false);
    if parts.len() < 2 {
        return Err(Error::Format(format!("expected key=value, found {:?}", s)));
    }
    let key = parts.remove(0);
    // The value keeps any further separators, e.g. `a="x=y"`
    let value = &s[key.len() + 1..];
    if key.is_empty() || value.is_empty() {
        return Err(Error::Format(format!("expected key=value, found {:?}", s)));
    }
    Ok((key, value))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ' ' | ',' | '=' | '\\' | '"') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn parse_field_value(raw: &str) -> Result<FieldValue> {
    if let Some(inner) = raw.strip_prefix('"') {
        let inner = inner
            .strip_suffix('"')
            .ok_or_else(|| Error::Format(format!("unterminated string field {:?}", raw)))?;
        return Ok(FieldValue::String(unescape(inner)));
    }

    let invalid = || Error::Format(format!("invalid field value {:?}", raw));
    if let Some(int) = raw.strip_suffix('i') {
        return int.parse::<i64>().map(FieldValue::Int).map_err(|_| invalid());
    }
    if let Some(uint) = raw.strip_suffix('u') {
        return uint.parse::<u64>().map(FieldValue::UInt).map_err(|_| invalid());
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Bool(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Bool(false)),
        _ => {}
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(FieldValue::Float)
        .ok_or_else(invalid)
}

fn parse_nanos(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<i64>()
        .map(|ns| Utc.timestamp_nanos(ns))
        .map_err(|_| Error::Format(format!("invalid timestamp {:?}", raw)))
}
