// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::traits::{FileWatcher, WatcherError};

/// Per-path wake-up senders and the directories currently watched
#[derive(Default)]
struct Routes {
    files: HashMap<PathBuf, HashMap<u64, Sender<()>>>,
    dirs: HashMap<PathBuf, usize>,
}

impl Routes {
    fn notify(&self, event: &Event) {
        for path in &event.paths {
            if let Some(subscribers) = self.files.get(path) {
                for tx in subscribers.values() {
                    // A full channel already holds a pending wake-up
                    let _ = tx.try_send(());
                }
            }
        }
    }

    /// Drop one subscription. Returns true when `dir` has no subscribers left.
    fn remove(&mut self, file: &Path, dir: &Path, id: u64) -> bool {
        if let Some(subscribers) = self.files.get_mut(file) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                self.files.remove(file);
            }
        }
        match self.dirs.get_mut(dir) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.dirs.remove(dir);
                true
            }
            None => false,
        }
    }
}

struct Shared {
    // Serializes watch/unwatch so directory reference counts match the
    // registrations in the notify backend
    watcher: Mutex<RecommendedWatcher>,
    routes: Arc<Mutex<Routes>>,
    next_id: AtomicU64,
}

impl Shared {
    fn unsubscribe(&self, file: &Path, dir: &Path, id: u64) {
        let mut watcher = lock(&self.watcher);
        let last_in_dir = lock(&self.routes).remove(file, dir, id);
        if last_in_dir {
            match watcher.unwatch(dir) {
                Ok(()) => debug!(dir = %dir.display(), "Stopped watching directory"),
                Err(e) => debug!(dir = %dir.display(), error = %e, "Failed to unwatch directory"),
            }
        }
    }
}

/// One OS notification instance shared by every follower of a manager.
///
/// Followers subscribe to their path; the parent directory is watched once,
/// however many subscribed files it holds, and unwatched when the last
/// subscription in it is dropped.
#[derive(Clone)]
pub struct NativeWatcher {
    shared: Arc<Shared>,
}

impl NativeWatcher {
    pub fn new() -> Result<Self, WatcherError> {
        let routes = Arc::new(Mutex::new(Routes::default()));

        let handler_routes = routes.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
                Ok(event) => lock(&handler_routes).notify(&event),
                Err(e) => warn!(error = %e, "File watcher error"),
            },
            Config::default(),
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(Shared {
                watcher: Mutex::new(watcher),
                routes,
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Start delivering wake-ups for `path`
    pub fn subscribe(&self, path: &Path) -> Result<Subscription, WatcherError> {
        let dir = parent_dir(path);
        let file = dir.join(path.file_name().ok_or_else(|| WatcherError::Watch {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        })?);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded(1);

        let mut watcher = lock(&self.shared.watcher);
        let first_in_dir = {
            let mut routes = lock(&self.shared.routes);
            routes.files.entry(file.clone()).or_default().insert(id, tx);
            let count = routes.dirs.entry(dir.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first_in_dir {
            // The routes lock is released: the backend may deliver events
            // while registering the directory
            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                let mut routes = lock(&self.shared.routes);
                routes.remove(&file, &dir, id);
                return Err(WatcherError::Watch {
                    path: dir,
                    reason: e.to_string(),
                });
            }
            debug!(dir = %dir.display(), "Watching directory");
        }

        Ok(Subscription {
            shared: self.shared.clone(),
            file,
            dir,
            id,
            rx,
        })
    }

    /// Number of directories currently registered with the OS
    pub fn watched_dirs(&self) -> usize {
        lock(&self.shared.routes).dirs.len()
    }
}

/// Wake-ups for one followed path. Dropping it releases the registration.
pub struct Subscription {
    shared: Arc<Shared>,
    file: PathBuf,
    dir: PathBuf,
    id: u64,
    rx: Receiver<()>,
}

impl FileWatcher for Subscription {
    fn wait(&mut self, timeout: Duration) -> Result<bool, WatcherError> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => return Ok(false),
            Err(RecvTimeoutError::Disconnected) => return Err(WatcherError::Disconnected),
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Empty) => Ok(true),
            Err(TryRecvError::Disconnected) => Err(WatcherError::Disconnected),
        }
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            "native"
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.unsubscribe(&self.file, &self.dir, self.id);
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    // FSEvents on macOS can have noticeable latency
    const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

    fn append(path: &Path, data: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data.as_bytes()).unwrap();
    }

    #[test]
    fn test_wakes_on_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "first\n").unwrap();
        let watcher = NativeWatcher::new().unwrap();
        let mut sub = watcher.subscribe(&path).unwrap();

        append(&path, "second\n");

        assert!(sub.wait(EVENT_TIMEOUT).unwrap());
    }

    #[test]
    fn test_wakes_when_file_is_rotated_away() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "first\n").unwrap();
        let watcher = NativeWatcher::new().unwrap();
        let mut sub = watcher.subscribe(&path).unwrap();

        fs::rename(&path, dir.path().join("app.log.1")).unwrap();

        assert!(sub.wait(EVENT_TIMEOUT).unwrap());
    }

    #[test]
    fn test_routes_events_to_the_named_file_only() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();
        let watcher = NativeWatcher::new().unwrap();
        let mut sub_a = watcher.subscribe(&a).unwrap();
        let mut sub_b = watcher.subscribe(&b).unwrap();

        append(&b, "noise\n");

        assert!(sub_b.wait(EVENT_TIMEOUT).unwrap());
        assert!(!sub_a.wait(Duration::from_millis(200)).unwrap());
    }

    #[test]
    fn test_many_files_share_one_instance() {
        let dir = TempDir::new().unwrap();
        let watcher = NativeWatcher::new().unwrap();

        // Well past the default per-user inotify instance limit
        let mut subs: Vec<Subscription> = (0..300)
            .map(|i| {
                let path = dir.path().join(format!("f{}.log", i));
                fs::write(&path, "").unwrap();
                watcher.subscribe(&path).unwrap()
            })
            .collect();
        assert_eq!(watcher.watched_dirs(), 1);

        append(&dir.path().join("f299.log"), "line\n");
        let last = subs.last_mut().unwrap();
        assert!(last.wait(EVENT_TIMEOUT).unwrap());
    }

    #[test]
    fn test_dropping_last_subscription_unwatches_directory() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let watcher = NativeWatcher::new().unwrap();

        let one = watcher.subscribe(&dir_a.path().join("one.log")).unwrap();
        let two = watcher.subscribe(&dir_a.path().join("two.log")).unwrap();
        let three = watcher.subscribe(&dir_b.path().join("three.log")).unwrap();
        assert_eq!(watcher.watched_dirs(), 2);

        drop(one);
        assert_eq!(watcher.watched_dirs(), 2);
        drop(two);
        assert_eq!(watcher.watched_dirs(), 1);
        drop(three);
        assert_eq!(watcher.watched_dirs(), 0);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let watcher = NativeWatcher::new().unwrap();

        let result = watcher.subscribe(&dir.path().join("missing").join("a.log"));
        assert!(matches!(result, Err(WatcherError::Watch { .. })));
        assert_eq!(watcher.watched_dirs(), 0);
    }

    #[test]
    fn test_times_out_without_activity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();
        let watcher = NativeWatcher::new().unwrap();
        let mut sub = watcher.subscribe(&path).unwrap();

        assert!(!sub.wait(Duration::from_millis(50)).unwrap());
        #[cfg(target_os = "linux")]
        assert_eq!(sub.backend_name(), "inotify");
    }
}
