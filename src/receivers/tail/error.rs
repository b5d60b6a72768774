// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("glob {pattern} failed to compile: {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to watch {}: {reason}", path.display())]
    Watch { path: PathBuf, reason: String },

    #[error("file watcher initialization failed: {0}")]
    WatcherInit(String),

    #[error("error tailing file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed log line in {}: [{line}]: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: String,
        reason: String,
    },

    #[error("format error: {0}")]
    Format(String),

    #[error("file {} is gone", .0.display())]
    FileGone(PathBuf),

    #[error("error stopping tail on file {}: {reason}", path.display())]
    Stop { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("tail manager is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_names_file_and_line() {
        let err = Error::Parse {
            path: PathBuf::from("/var/log/a.log"),
            line: "x,y".to_string(),
            reason: "bad row".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed log line in /var/log/a.log: [x,y]: bad row"
        );
    }

    #[test]
    fn test_invalid_glob_display() {
        let err = Error::InvalidGlob {
            pattern: "/var/[log".to_string(),
            reason: "invalid range".to_string(),
        };
        assert!(err.to_string().contains("/var/[log"));
    }
}
