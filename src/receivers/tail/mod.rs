// SPDX-License-Identifier: Apache-2.0

//! Tail receiver for log files.
//!
//! This receiver resolves glob patterns to files, follows each file as it is
//! appended to, parses every new line with the configured format, and hands
//! the resulting records to a [`Sink`] tagged with the file's path.
//!
//! Features:
//! - `**` patterns that match any directory depth
//! - Inode-based rotation and truncation handling
//! - Native (inotify/FSEvents) or polling watchers
//! - Named pipe support
//! - CSV, JSON, line protocol, regex and single-value parsers

pub mod config;
pub mod error;
pub mod input;
pub mod manager;
pub mod parser;
pub mod record;
pub mod sink;
pub mod watcher;

pub use config::{DataFormat, ParserConfig, StartAt, TailConfig, ValueType};
pub use error::{Error, Result};
pub use input::{FileFinder, FileFollower, FollowEvent, FollowerConfig, GlobFileFinder, LineStream};
pub use manager::{TailManager, TrackState};
pub use parser::{LineParser, Parser, build_parser};
pub use record::{FieldValue, Record, RowValue, classify_row};
pub use sink::{ChannelSink, MemorySink, Sink, SinkMessage};
pub use watcher::{WatchMode, WatchSource};
