// SPDX-License-Identifier: Apache-2.0

//! Wake-ups for a follower sitting at the end of its file.
//!
//! A manager holds one [`WatchSource`] and hands every follower a watcher for
//! its path:
//! - **Native** subscribes the path on a single shared OS notification
//!   instance. The file's directory is watched, so renames and recreates of
//!   the followed name wake the follower as well as appends.
//! - **Poll** stats the path on an interval, for NFS and other file systems
//!   where notifications are missing or unreliable.

mod native;
mod poll;
mod traits;

pub use native::{NativeWatcher, Subscription};
pub use poll::PollWatcher;
pub use traits::{FileWatcher, WatcherError};

use std::path::Path;
use std::time::Duration;

/// How a follower learns that its file changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// OS notifications (inotify, kqueue, FSEvents)
    #[default]
    Native,
    /// Periodic stat of the followed path
    Poll,
}

/// Hands out per-path watchers. Clones share the same OS instance.
#[derive(Clone)]
pub enum WatchSource {
    Native(NativeWatcher),
    Poll(Duration),
}

impl WatchSource {
    /// There is no automatic fallback: a native instance that cannot be set
    /// up is an error.
    pub fn new(mode: WatchMode, poll_interval: Duration) -> Result<Self, WatcherError> {
        match mode {
            WatchMode::Native => Ok(Self::Native(NativeWatcher::new()?)),
            WatchMode::Poll => Ok(Self::Poll(poll_interval)),
        }
    }

    pub fn watch(&self, path: &Path) -> Result<Box<dyn FileWatcher>, WatcherError> {
        match self {
            Self::Native(native) => Ok(Box::new(native.subscribe(path)?)),
            Self::Poll(interval) => Ok(Box::new(PollWatcher::new(path, *interval))),
        }
    }
}

impl std::fmt::Debug for WatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(native) => f
                .debug_struct("Native")
                .field("watched_dirs", &native.watched_dirs())
                .finish(),
            Self::Poll(interval) => f.debug_tuple("Poll").field(interval).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn test_watch_source_backends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");

        let poll = WatchSource::new(WatchMode::Poll, INTERVAL).unwrap();
        assert_eq!(poll.watch(&path).unwrap().backend_name(), "poll");

        let native = WatchSource::new(WatchMode::Native, INTERVAL).unwrap();
        assert_ne!(native.watch(&path).unwrap().backend_name(), "poll");
    }

    #[test]
    fn test_native_watch_needs_existing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("a.log");

        let native = WatchSource::new(WatchMode::Native, INTERVAL).unwrap();
        assert!(native.watch(&path).is_err());
        // Polling a missing path is fine, it reports the path once it appears
        let poll = WatchSource::new(WatchMode::Poll, INTERVAL).unwrap();
        assert!(poll.watch(&path).is_ok());
    }

    #[test]
    fn test_clones_share_one_native_instance() {
        let dir = TempDir::new().unwrap();
        let source = WatchSource::new(WatchMode::Native, INTERVAL).unwrap();
        let clone = source.clone();

        let _a = source.watch(&dir.path().join("a.log")).unwrap();
        let _b = clone.watch(&dir.path().join("b.log")).unwrap();

        let WatchSource::Native(native) = &source else {
            panic!("expected native source");
        };
        assert_eq!(native.watched_dirs(), 1);
    }
}
