// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::time::Duration;

use crate::receivers::tail::config::{DataFormat, ParserConfig, StartAt, TailConfig, ValueType};
use crate::receivers::tail::watcher::WatchMode;

/// Line format of the tailed files
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataFormatArg {
    /// Line protocol
    #[default]
    Influx,
    /// Delimited rows with an optional header row
    Csv,
    /// One JSON object per line
    Json,
    /// Regex with named capture groups
    Regex,
    /// The whole line as a single value
    Value,
}

impl From<DataFormatArg> for DataFormat {
    fn from(f: DataFormatArg) -> Self {
        match f {
            DataFormatArg::Influx => DataFormat::Influx,
            DataFormatArg::Csv => DataFormat::Csv,
            DataFormatArg::Json => DataFormat::Json,
            DataFormatArg::Regex => DataFormat::Regex,
            DataFormatArg::Value => DataFormat::Value,
        }
    }
}

/// How followers notice new data
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchMethodArg {
    /// Native file system notifications (inotify/kqueue/FSEvents)
    #[default]
    #[value(aliases = ["event", "native"])]
    Inotify,
    /// Periodic polling (use for NFS or when native watching is unreliable)
    Poll,
}

impl From<WatchMethodArg> for WatchMode {
    fn from(w: WatchMethodArg) -> Self {
        match w {
            WatchMethodArg::Inotify => WatchMode::Native,
            WatchMethodArg::Poll => WatchMode::Poll,
        }
    }
}

/// Type of the field produced by the value format
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueTypeArg {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
}

impl From<ValueTypeArg> for ValueType {
    fn from(v: ValueTypeArg) -> Self {
        match v {
            ValueTypeArg::String => ValueType::String,
            ValueTypeArg::Integer => ValueType::Integer,
            ValueTypeArg::Float => ValueType::Float,
            ValueTypeArg::Boolean => ValueType::Boolean,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct TailReceiverArgs {
    /// Comma-separated glob patterns for files to tail (e.g., "/var/log/**.log,/tmp/*.log")
    #[arg(long, env = "LOGTAIL_FILES", value_delimiter = ',')]
    pub files: Vec<String>,

    /// Comma-separated glob patterns for files to skip
    #[arg(long, env = "LOGTAIL_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Read files found on startup from the beginning instead of the end
    #[arg(long, env = "LOGTAIL_FROM_BEGINNING")]
    pub from_beginning: bool,

    /// Treat files as named pipes: never seek, never handle rotation
    #[arg(long, env = "LOGTAIL_PIPE")]
    pub pipe: bool,

    /// Watch method: inotify (default) or poll (for NFS)
    #[arg(
        value_enum,
        long,
        env = "LOGTAIL_WATCH_METHOD",
        default_value = "inotify"
    )]
    pub watch_method: WatchMethodArg,

    /// Poll interval in milliseconds (poll watch method)
    #[arg(long, env = "LOGTAIL_POLL_INTERVAL_MS", default_value = "250")]
    pub poll_interval_ms: u64,

    /// Interval in milliseconds between discovery passes for new files
    #[arg(long, env = "LOGTAIL_RESCAN_INTERVAL_MS", default_value = "10000")]
    pub rescan_interval_ms: u64,

    /// Maximum line size in bytes (longer lines are truncated)
    #[arg(long, env = "LOGTAIL_MAX_LINE_SIZE", default_value = "1048576")]
    pub max_line_size: usize,

    /// Data format: influx, csv, json, regex, value
    #[arg(value_enum, long, env = "LOGTAIL_DATA_FORMAT", default_value = "influx")]
    pub data_format: DataFormatArg,

    /// Record name used instead of the default ("tail") or the parsed one
    #[arg(long, env = "LOGTAIL_NAME_OVERRIDE")]
    pub name_override: Option<String>,

    /// Number of header rows at the start of each csv file (0 or 1)
    #[arg(long, env = "LOGTAIL_CSV_HEADER_ROW_COUNT", default_value = "1")]
    pub csv_header_row_count: usize,

    /// Comma-separated csv column names; required without a header row
    #[arg(long, env = "LOGTAIL_CSV_COLUMN_NAMES", value_delimiter = ',')]
    pub csv_column_names: Vec<String>,

    #[arg(long, env = "LOGTAIL_CSV_DELIMITER", default_value = ",")]
    pub csv_delimiter: char,

    /// Lines starting with this character are skipped
    #[arg(long, env = "LOGTAIL_CSV_COMMENT")]
    pub csv_comment: Option<char>,

    /// Comma-separated csv columns emitted as tags
    #[arg(long, env = "LOGTAIL_CSV_TAG_COLUMNS", value_delimiter = ',')]
    pub csv_tag_columns: Vec<String>,

    /// Csv column whose value names the record
    #[arg(long, env = "LOGTAIL_CSV_MEASUREMENT_COLUMN")]
    pub csv_measurement_column: Option<String>,

    #[arg(long, env = "LOGTAIL_CSV_TIMESTAMP_COLUMN")]
    pub csv_timestamp_column: Option<String>,

    /// Chrono format, or unix, unix_ms, unix_us, unix_ns, rfc3339
    #[arg(long, env = "LOGTAIL_CSV_TIMESTAMP_FORMAT")]
    pub csv_timestamp_format: Option<String>,

    /// Comma-separated JSON keys whose string values are fields rather than tags
    #[arg(long, env = "LOGTAIL_JSON_STRING_FIELDS", value_delimiter = ',')]
    pub json_string_fields: Vec<String>,

    #[arg(long, env = "LOGTAIL_JSON_TIME_KEY")]
    pub json_time_key: Option<String>,

    #[arg(long, env = "LOGTAIL_JSON_TIME_FORMAT")]
    pub json_time_format: Option<String>,

    /// Regex pattern with named capture groups (data format regex)
    #[arg(long, env = "LOGTAIL_REGEX_PATTERN")]
    pub regex_pattern: Option<String>,

    /// Comma-separated capture groups emitted as tags
    #[arg(long, env = "LOGTAIL_REGEX_TAG_GROUPS", value_delimiter = ',')]
    pub regex_tag_groups: Vec<String>,

    #[arg(long, env = "LOGTAIL_REGEX_TIMESTAMP_GROUP")]
    pub regex_timestamp_group: Option<String>,

    #[arg(long, env = "LOGTAIL_REGEX_TIMESTAMP_FORMAT")]
    pub regex_timestamp_format: Option<String>,

    /// Value type: string, integer, float, boolean (data format value)
    #[arg(value_enum, long, env = "LOGTAIL_VALUE_TYPE", default_value = "string")]
    pub value_type: ValueTypeArg,
}

impl Default for TailReceiverArgs {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            exclude: Vec::new(),
            from_beginning: false,
            pipe: false,
            watch_method: WatchMethodArg::Inotify,
            poll_interval_ms: 250,
            rescan_interval_ms: 10_000,
            max_line_size: 1024 * 1024,
            data_format: DataFormatArg::Influx,
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
            value_type: ValueTypeArg::String,
        }
    }
}

impl TailReceiverArgs {
    /// Build the tail config from command line args
    pub fn build_config(&self) -> TailConfig {
        TailConfig {
            files: self.files.clone(),
            exclude: self.exclude.clone(),
            start_at: if self.from_beginning {
                StartAt::Beginning
            } else {
                StartAt::End
            },
            pipe: self.pipe,
            watch_mode: self.watch_method.into(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            rescan_interval: Duration::from_millis(self.rescan_interval_ms),
            max_line_size: self.max_line_size,
            parser: ParserConfig {
                format: self.data_format.into(),
                name_override: self.name_override.clone(),
                csv_header_row_count: self.csv_header_row_count,
                csv_column_names: self.csv_column_names.clone(),
                csv_delimiter: self.csv_delimiter,
                csv_comment: self.csv_comment,
                csv_tag_columns: self.csv_tag_columns.clone(),
                csv_measurement_column: self.csv_measurement_column.clone(),
                csv_timestamp_column: self.csv_timestamp_column.clone(),
                csv_timestamp_format: self.csv_timestamp_format.clone(),
                json_string_fields: self.json_string_fields.clone(),
                json_time_key: self.json_time_key.clone(),
                json_time_format: self.json_time_format.clone(),
                regex_pattern: self.regex_pattern.clone(),
                regex_tag_groups: self.regex_tag_groups.clone(),
                regex_timestamp_group: self.regex_timestamp_group.clone(),
                regex_timestamp_format: self.regex_timestamp_format.clone(),
                value_type: self.value_type.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestArgs {
        #[command(flatten)]
        tail: TailReceiverArgs,
    }

    #[test]
    fn test_parse_args_into_config() {
        let args = TestArgs::try_parse_from([
            "logtail",
            "--files",
            "/var/log/*.log,/tmp/**.log",
            "--from-beginning",
            "--watch-method",
            "poll",
            "--data-format",
            "csv",
            "--csv-tag-columns",
            "host",
            "--csv-delimiter",
            ";",
        ])
        .unwrap();

        let config = args.tail.build_config();
        assert_eq!(config.files, vec!["/var/log/*.log", "/tmp/**.log"]);
        assert_eq!(config.start_at, StartAt::Beginning);
        assert_eq!(config.watch_mode, WatchMode::Poll);
        assert_eq!(config.parser.format, DataFormat::Csv);
        assert_eq!(config.parser.csv_tag_columns, vec!["host"]);
        assert_eq!(config.parser.csv_delimiter, ';');
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_watch_method_aliases() {
        let args =
            TestArgs::try_parse_from(["logtail", "--files", "a.log", "--watch-method", "event"])
                .unwrap();
        assert_eq!(args.tail.watch_method, WatchMethodArg::Inotify);
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let config = TailReceiverArgs::default().build_config();
        let defaults = TailConfig::default();
        assert_eq!(config.start_at, defaults.start_at);
        assert_eq!(config.watch_mode, defaults.watch_mode);
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.rescan_interval, defaults.rescan_interval);
        assert_eq!(config.max_line_size, defaults.max_line_size);
        assert_eq!(config.parser, defaults.parser);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let args: TailReceiverArgs =
            serde_json::from_str(r#"{"files": ["/var/log/*.log"], "data_format": "json"}"#)
                .unwrap();
        assert_eq!(args.data_format, DataFormatArg::Json);
        assert_eq!(args.poll_interval_ms, 250);
    }
}
