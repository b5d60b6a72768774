// SPDX-License-Identifier: Apache-2.0

use glob::{MatchOptions, Pattern, glob_with};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::debug;

use crate::receivers::tail::error::{Error, Result};

/// Resolves one glob pattern into the files it currently matches
pub trait FileFinder: Send + Sync {
    fn resolve(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}

/// FileFinder backed by the `glob` crate, with optional exclude patterns
#[derive(Debug, Clone, Default)]
pub struct GlobFileFinder {
    exclude: Vec<Pattern>,
}

impl GlobFileFinder {
    pub fn new(exclude: &[String]) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|p| {
                Pattern::new(&normalize_pattern(p)).map_err(|e| Error::InvalidGlob {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { exclude })
    }

    fn is_excluded(&self, path: &std::path::Path) -> bool {
        self.exclude.iter().any(|p| p.matches_path(path))
    }
}

impl FileFinder for GlobFileFinder {
    /// Returns the non-directory paths matching `pattern` as sorted, absolute paths
    fn resolve(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let options = MatchOptions {
            require_literal_leading_dot: false,
            ..MatchOptions::new()
        };
        let matches =
            glob_with(&normalize_pattern(pattern), options).map_err(|e| Error::InvalidGlob {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        let mut paths = BTreeSet::new();
        for entry in matches {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!("Skipping unreadable glob entry for {}: {}", pattern, e);
                    continue;
                }
            };

            // Skip directories; named pipes are kept for pipe mode
            if path.is_dir() {
                continue;
            }

            let path = std::path::absolute(&path).unwrap_or(path);
            if self.is_excluded(&path) {
                continue;
            }
            paths.insert(path);
        }

        Ok(paths.into_iter().collect())
    }
}

/// Rewrite a "super asterisk" component such as `**.log` into the form the
/// `glob` crate understands (`**/*.log`). A `**` elsewhere inside a component
/// degrades to `*`.
pub fn normalize_pattern(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|component| {
            if component == "**" || !component.contains("**") {
                return component.to_string();
            }
            match component.strip_prefix("**") {
                Some(rest) => format!("**/*{}", rest.replace("**", "*")),
                None => component.replace("**", "*"),
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
