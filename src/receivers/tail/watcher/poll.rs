// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use super::traits::{FileWatcher, WatcherError};
use crate::receivers::tail::input::FileId;

/// What one stat of the followed path showed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    id: FileId,
    len: u64,
    modified: Option<SystemTime>,
}

impl Snapshot {
    fn take(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            id: FileId::from_metadata(&metadata),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Stats the followed path every `interval` and reports any difference from
/// the previous stat, including the path appearing, disappearing, or being
/// replaced by a file of the same size.
pub struct PollWatcher {
    path: PathBuf,
    interval: Duration,
    last: Option<Snapshot>,
    next_poll: Instant,
}

impl PollWatcher {
    pub fn new(path: &Path, interval: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            interval,
            last: Snapshot::take(path),
            next_poll: Instant::now() + interval,
        }
    }

    fn poll(&mut self) -> bool {
        let current = Snapshot::take(&self.path);
        self.next_poll = Instant::now() + self.interval;
        let changed = current != self.last;
        self.last = current;
        changed
    }
}

impl FileWatcher for PollWatcher {
    fn wait(&mut self, timeout: Duration) -> Result<bool, WatcherError> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= self.next_poll && self.poll() {
                return Ok(true);
            }
            if now >= deadline {
                return Ok(false);
            }

            let wake_at = self.next_poll.min(deadline);
            std::thread::sleep(wake_at.saturating_duration_since(Instant::now()));
        }
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}
