// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("watcher initialization failed: {0}")]
    Init(String),

    #[error("cannot watch {}: {reason}", path.display())]
    Watch { path: PathBuf, reason: String },

    /// The notification source went away; no further wake-ups will arrive
    #[error("watcher event channel disconnected")]
    Disconnected,
}

/// Blocks a follower thread until its file may have changed.
///
/// A watcher is owned by exactly one follower thread, so implementations only
/// need to be `Send`.
pub trait FileWatcher: Send {
    /// Wait at most `timeout`. Returns true when the followed path may have
    /// new data, a new identity, or has disappeared; false on timeout or when
    /// only unrelated activity was seen.
    fn wait(&mut self, timeout: Duration) -> Result<bool, WatcherError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
