// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};

use super::traits::Parser;
use super::{parse_timestamp, record_name};
use crate::receivers::tail::config::ParserConfig;
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::record::{FieldValue, Record};

/// Parses delimited rows. Column names come from the configuration or from
/// a header row, which is only recognised through [`Parser::parse`].
pub struct CsvParser {
    name: String,
    delimiter: u8,
    comment: Option<u8>,
    /// Header rows still expected at the start of the input
    header_rows_remaining: usize,
    /// Configured names; they win over a header row
    configured_columns: Vec<String>,
    header_columns: Vec<String>,
    tag_columns: HashSet<String>,
    measurement_column: Option<String>,
    timestamp_column: Option<String>,
    timestamp_format: Option<String>,
}

impl CsvParser {
    pub fn new(config: &ParserConfig) -> Self {
        Self {
            name: record_name(config),
            delimiter: config.csv_delimiter as u8,
            comment: config.csv_comment.map(|c| c as u8),
            header_rows_remaining: config.csv_header_row_count,
            configured_columns: config.csv_column_names.clone(),
            header_columns: Vec::new(),
            tag_columns: config.csv_tag_columns.iter().cloned().collect(),
            measurement_column: config.csv_measurement_column.clone(),
            timestamp_column: config.csv_timestamp_column.clone(),
            timestamp_format: config.csv_timestamp_format.clone(),
        }
    }

    fn columns(&self) -> &[String] {
        if self.configured_columns.is_empty() {
            &self.header_columns
        } else {
            &self.configured_columns
        }
    }

    fn read_rows(&self, buf: &str) -> Result<Vec<StringRecord>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .comment(self.comment)
            .from_reader(buf.as_bytes());

        reader
            .records()
            .collect::<std::result::Result<Vec<_>, csv::Error>>()
            .map_err(|e| Error::Format(format!("invalid csv: {}", e)))
    }

    fn row_to_record(&self, row: &StringRecord) -> Result<Record> {
        let columns = self.columns();
        if columns.is_empty() {
            return Err(Error::Format("no column names known for csv row".to_string()));
        }
        if row.len() > columns.len() {
            return Err(Error::Format(format!(
                "csv row has {} values but only {} columns are known",
                row.len(),
                columns.len()
            )));
        }

        let mut name = None;
        let mut timestamp: Option<DateTime<Utc>> = None;
        let mut tags = BTreeMap::new();
        let mut fields = BTreeMap::new();

        for (column, value) in columns.iter().zip(row.iter()) {
            if value.is_empty() {
                continue;
            }
            if self.measurement_column.as_deref() == Some(column.as_str()) {
                name = Some(value.to_string());
            } else if self.timestamp_column.as_deref() == Some(column.as_str()) {
                let format = self.timestamp_format.as_deref().unwrap_or("rfc3339");
                timestamp = Some(parse_timestamp(value, format)?);
            } else if self.tag_columns.contains(column) {
                tags.insert(column.clone(), value.to_string());
            } else {
                fields.insert(column.clone(), FieldValue::infer(value));
            }
        }

        Ok(Record::new(
            name.unwrap_or_else(|| self.name.clone()),
            tags,
            fields,
            timestamp.unwrap_or_else(Utc::now),
        ))
    }
}

impl Parser for CsvParser {
    fn parse(&mut self, buf: &str) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for row in self.read_rows(buf)? {
            if self.header_rows_remaining > 0 {
                self.header_rows_remaining -= 1;
                self.header_columns = row.iter().map(str::to_string).collect();
                continue;
            }
            records.push(self.row_to_record(&row)?);
        }
        Ok(records)
    }

    fn parse_line(&mut self, line: &str) -> Result<Vec<Record>> {
        self.read_rows(line)?
            .iter()
            .map(|row| self.row_to_record(row))
            .collect()
    }

    fn header_sensitive(&self) -> bool {
        true
    }
}
