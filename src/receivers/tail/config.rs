// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tail receiver.

use std::time::Duration;

use serde::Deserialize;

use crate::receivers::tail::watcher::WatchMode;

/// Where to start reading when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

/// Line format bound to each newly tracked file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Line protocol: `name,tag=v field=v timestamp`
    #[default]
    Influx,
    /// Delimited rows, optionally preceded by a header row
    Csv,
    /// One JSON object per line
    Json,
    /// Regex with named capture groups
    Regex,
    /// The whole line is a single value
    Value,
}

/// Type of the single field produced by the `value` format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
}

/// Options for the configured data format. Each format reads only its own options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    pub format: DataFormat,
    /// Record name when the line does not provide one
    pub name_override: Option<String>,

    pub csv_header_row_count: usize,
    pub csv_column_names: Vec<String>,
    pub csv_delimiter: char,
    pub csv_comment: Option<char>,
    pub csv_tag_columns: Vec<String>,
    pub csv_measurement_column: Option<String>,
    pub csv_timestamp_column: Option<String>,
    pub csv_timestamp_format: Option<String>,

    /// String keys kept as fields instead of tags
    pub json_string_fields: Vec<String>,
    pub json_time_key: Option<String>,
    pub json_time_format: Option<String>,

    pub regex_pattern: Option<String>,
    pub regex_tag_groups: Vec<String>,
    pub regex_timestamp_group: Option<String>,
    pub regex_timestamp_format: Option<String>,

    pub value_type: ValueType,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            format: DataFormat::default(),
            name_override: None,
            csv_header_row_count: 1,
            csv_column_names: Vec::new(),
            csv_delimiter: ',',
            csv_comment: None,
            csv_tag_columns: Vec::new(),
            csv_measurement_column: None,
            csv_timestamp_column: None,
            csv_timestamp_format: None,
            json_string_fields: Vec::new(),
            json_time_key: None,
            json_time_format: None,
            regex_pattern: None,
            regex_tag_groups: Vec::new(),
            regex_timestamp_group: None,
            regex_timestamp_format: None,
            value_type: ValueType::default(),
        }
    }
}

impl ParserConfig {
    pub fn new(format: DataFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Validate the options of the selected format
    pub fn validate(&self) -> Result<(), String> {
        match self.format {
            DataFormat::Csv => {
                if self.csv_header_row_count > 1 {
                    return Err("csv_header_row_count must be 0 or 1".to_string());
                }
                if self.csv_header_row_count == 0 && self.csv_column_names.is_empty() {
                    return Err(
                        "csv_column_names must be set when csv_header_row_count is 0".to_string(),
                    );
                }
                if !self.csv_delimiter.is_ascii() {
                    return Err("csv_delimiter must be an ASCII character".to_string());
                }
                if self.csv_comment.is_some_and(|c| !c.is_ascii()) {
                    return Err("csv_comment must be an ASCII character".to_string());
                }
                if self.csv_timestamp_column.is_some() && self.csv_timestamp_format.is_none() {
                    return Err(
                        "csv_timestamp_format must be set with csv_timestamp_column".to_string(),
                    );
                }
            }
            DataFormat::Regex => {
                if self.regex_pattern.is_none() {
                    return Err("Regex pattern must be specified when format is 'regex'".to_string());
                }
            }
            DataFormat::Json => {
                if self.json_time_key.is_some() && self.json_time_format.is_none() {
                    return Err("json_time_format must be set with json_time_key".to_string());
                }
            }
            DataFormat::Influx | DataFormat::Value => {}
        }
        Ok(())
    }
}

/// Configuration for the tail receiver
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Glob patterns for files to tail
    pub files: Vec<String>,
    /// Glob patterns for files to skip
    pub exclude: Vec<String>,
    /// Where newly discovered files start on the first discovery pass
    pub start_at: StartAt,
    /// Treat files as named pipes: no seeking, no rotation handling
    pub pipe: bool,
    /// How followers detect new data
    pub watch_mode: WatchMode,
    /// Stat interval in poll mode
    pub poll_interval: Duration,
    /// Interval between discovery passes when driven by `TailManager::run`
    pub rescan_interval: Duration,
    /// Maximum line size in bytes, longer lines are truncated
    pub max_line_size: usize,
    pub parser: ParserConfig,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            exclude: Vec::new(),
            start_at: StartAt::End,
            pipe: false,
            watch_mode: WatchMode::Native,
            poll_interval: Duration::from_millis(250),
            rescan_interval: Duration::from_secs(10),
            max_line_size: 1024 * 1024,
            parser: ParserConfig::default(),
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.files.is_empty() {
            return Err("At least one file pattern must be specified".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("poll_interval must be positive".to_string());
        }

        if self.rescan_interval.is_zero() {
            return Err("rescan_interval must be positive".to_string());
        }

        if self.max_line_size == 0 {
            return Err("max_line_size must be positive".to_string());
        }

        self.parser.validate()
    }
}
