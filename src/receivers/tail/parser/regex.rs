// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use regex::Regex;

use super::traits::Parser;
use super::{parse_timestamp, record_name};
use crate::receivers::tail::config::ParserConfig;
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::record::{FieldValue, Record};

/// A parser that extracts fields from a line using a regular expression
/// with named capture groups.
pub struct RegexParser {
    regex: Regex,
    /// Names of the capture groups (excluding the full match)
    group_names: Vec<String>,
    name: String,
    tag_groups: HashSet<String>,
    /// Optional group that contains a timestamp to parse
    timestamp_group: Option<String>,
    /// Chrono format string for parsing the timestamp group
    timestamp_format: Option<String>,
}

impl RegexParser {
    /// Create a new RegexParser from a regex pattern string.
    ///
    /// The pattern must contain at least one named capture group using
    /// the `(?P<name>...)` syntax.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid regex pattern: {}", e)))?;

        let group_names: Vec<String> = regex
            .capture_names()
            .skip(1)
            .filter_map(|name| name.map(|s| s.to_string()))
            .collect();

        if group_names.is_empty() {
            return Err(Error::Config(
                "regex pattern must contain at least one named capture group (use (?P<name>...) syntax)".to_string()
            ));
        }

        Ok(Self {
            regex,
            group_names,
            name: record_name(&ParserConfig::default()),
            tag_groups: HashSet::new(),
            timestamp_group: None,
            timestamp_format: None,
        })
    }

    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        let pattern = config.regex_pattern.as_deref().ok_or_else(|| {
            Error::Config("Regex pattern must be specified when format is 'regex'".to_string())
        })?;

        let mut parser = Self::new(pattern)?;
        parser.name = record_name(config);
        parser.tag_groups = config.regex_tag_groups.iter().cloned().collect();
        if let Some(group) = &config.regex_timestamp_group {
            let format = config
                .regex_timestamp_format
                .clone()
                .unwrap_or_else(|| "rfc3339".to_string());
            parser = parser.with_timestamp(group.clone(), format);
        }
        Ok(parser)
    }

    /// Configure a capture group to be parsed as the record timestamp.
    ///
    /// # Arguments
    /// * `group` - The name of the capture group containing the timestamp
    /// * `format` - A chrono format string (e.g., "%d/%b/%Y:%H:%M:%S %z")
    pub fn with_timestamp(mut self, group: impl Into<String>, format: impl Into<String>) -> Self {
        self.timestamp_group = Some(group.into());
        self.timestamp_format = Some(format.into());
        self
    }

    /// Get the names of the capture groups in this regex
    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }
}

impl Parser for RegexParser {
    fn parse(&mut self, buf: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for line in buf.lines() {
            records.extend(self.parse_line(line)?);
        }
        Ok(records)
    }

    fn parse_line(&mut self, line: &str) -> Result<Vec<Record>> {
        let captures = self.regex.captures(line).ok_or_else(|| {
            Error::Format(format!(
                "regex pattern does not match input: {:?}",
                line.chars().take(100).collect::<String>()
            ))
        })?;

        let mut tags = BTreeMap::new();
        let mut fields = BTreeMap::new();
        let mut timestamp = None;

        for name in &self.group_names {
            let Some(m) = captures.name(name) else {
                continue;
            };
            let value = m.as_str();

            if let (Some(group), Some(format)) = (&self.timestamp_group, &self.timestamp_format) {
                if name == group {
                    // An unparseable timestamp falls back to the read time
                    timestamp = parse_timestamp(value, format).ok();
                    continue;
                }
            }

            if self.tag_groups.contains(name) {
                tags.insert(name.clone(), value.to_string());
            } else {
                fields.insert(name.clone(), FieldValue::String(value.to_string()));
            }
        }

        Ok(vec![Record::new(
            self.name.clone(),
            tags,
            fields,
            timestamp.unwrap_or_else(Utc::now),
        )])
    }
}
