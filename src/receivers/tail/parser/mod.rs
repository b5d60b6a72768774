// SPDX-License-Identifier: Apache-2.0

//! Line parsers.
//!
//! # Available formats
//!
//! - [`CsvParser`] - delimited rows, header-sensitive
//! - [`JsonParser`] - one JSON object per line
//! - [`InfluxParser`] - line protocol
//! - [`RegexParser`] - named capture groups
//! - [`ValueParser`] - the whole line as a single field

mod csv;
mod influx;
mod json;
mod regex;
mod traits;
mod value;

pub use self::csv::CsvParser;
pub use self::influx::InfluxParser;
pub use self::json::JsonParser;
pub use self::regex::RegexParser;
pub use self::traits::{LineParser, Parser};
pub use self::value::ValueParser;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::receivers::tail::config::{DataFormat, ParserConfig};
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::record::DEFAULT_RECORD_NAME;

/// Create a fresh parser for the configured format.
pub fn build_parser(config: &ParserConfig) -> Result<Box<dyn Parser>> {
    config.validate().map_err(Error::Config)?;

    let parser: Box<dyn Parser> = match config.format {
        DataFormat::Csv => Box::new(CsvParser::new(config)),
        DataFormat::Json => Box::new(JsonParser::new(config)),
        DataFormat::Influx => Box::new(InfluxParser::new(config)),
        DataFormat::Regex => Box::new(RegexParser::from_config(config)?),
        DataFormat::Value => Box::new(ValueParser::new(config)),
    };
    Ok(parser)
}

pub(crate) fn record_name(config: &ParserConfig) -> String {
    config
        .name_override
        .clone()
        .unwrap_or_else(|| DEFAULT_RECORD_NAME.to_string())
}

/// Formats tried when a timestamp does not match the configured one.
/// Timestamps without a timezone are taken as UTC.
const FALLBACK_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%d/%b/%Y %H:%M:%S",
];

/// Parse `value` with a chrono format string, or one of the epoch formats
/// `unix`, `unix_ms`, `unix_us`, `unix_ns`, or `rfc3339`.
pub(crate) fn parse_timestamp(value: &str, format: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    let invalid = || Error::Format(format!("cannot parse timestamp {:?} as {}", value, format));

    let parsed = match format {
        "unix" => match value.parse::<i64>() {
            Ok(secs) => Utc.timestamp_opt(secs, 0).single(),
            Err(_) => value
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .and_then(|f| {
                    let secs = f.floor();
                    Utc.timestamp_opt(secs as i64, ((f - secs) * 1e9) as u32)
                        .single()
                }),
        },
        "unix_ms" => value
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        "unix_us" => value
            .parse::<i64>()
            .ok()
            .and_then(|us| Utc.timestamp_micros(us).single()),
        "unix_ns" => value.parse::<i64>().ok().map(|ns| Utc.timestamp_nanos(ns)),
        "rfc3339" => DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        format => DateTime::parse_from_str(value, format)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(value, format)
                    .ok()
                    .map(|dt| dt.and_utc())
            })
            .or_else(|| {
                FALLBACK_TIMESTAMP_FORMATS.iter().find_map(|fallback| {
                    NaiveDateTime::parse_from_str(value, fallback)
                        .ok()
                        .map(|dt| dt.and_utc())
                })
            }),
    };

    parsed.ok_or_else(invalid)
}
