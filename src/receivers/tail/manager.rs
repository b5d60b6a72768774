// SPDX-License-Identifier: Apache-2.0

//! The tail manager owns one follower and one consumer task per tracked file.
//!
//! Every discovery pass resolves all configured patterns and starts tracking
//! paths it has not seen before. Tracked files are never removed or restarted
//! while the manager runs; they are only torn down by [`TailManager::stop`].
//!
//! All followers share the manager's [`WatchSource`], so native mode uses a
//! single OS notification instance however many files are tracked.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::receivers::tail::config::{StartAt, TailConfig};
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::input::{
    FileFinder, FileFollower, FollowEvent, FollowerConfig, GlobFileFinder, LineStream,
};
use crate::receivers::tail::parser::{LineParser, build_parser};
use crate::receivers::tail::record::PATH_TAG;
use crate::receivers::tail::sink::Sink;
use crate::receivers::tail::watcher::WatchSource;

/// Lifecycle of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Lines are being read and parsed
    Streaming,
    /// The follower hit a fatal error; the file is not retried
    Failed,
    /// The follower was stopped
    Stopped,
}

struct TrackedFile {
    follower: FileFollower,
    state: watch::Receiver<TrackState>,
}

#[derive(Default)]
struct ManagerState {
    tailers: HashMap<PathBuf, TrackedFile>,
    tasks: JoinSet<()>,
    task_paths: HashMap<Id, PathBuf>,
    stopped: bool,
}

pub struct TailManager<S: Sink> {
    config: TailConfig,
    finder: Box<dyn FileFinder>,
    watchers: WatchSource,
    sink: Arc<S>,
    state: Mutex<ManagerState>,
}

impl<S: Sink> TailManager<S> {
    pub fn new(config: TailConfig, sink: Arc<S>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        let finder = GlobFileFinder::new(&config.exclude)?;
        let watchers = WatchSource::new(config.watch_mode, config.poll_interval)
            .map_err(|e| Error::WatcherInit(e.to_string()))?;

        Ok(Self {
            config,
            finder: Box::new(finder),
            watchers,
            sink,
            state: Mutex::new(ManagerState::default()),
        })
    }

    /// Replace the path resolver
    pub fn with_finder(mut self, finder: impl FileFinder + 'static) -> Self {
        self.finder = Box::new(finder);
        self
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    /// First discovery pass. New files start where `start_at` says.
    pub async fn start(&self) -> Result<()> {
        info!(
            files = ?self.config.files,
            exclude = ?self.config.exclude,
            format = ?self.config.parser.format,
            watch_mode = ?self.config.watch_mode,
            start_at = ?self.config.start_at,
            pipe = self.config.pipe,
            "Starting tail manager"
        );

        let added = self.discover(self.config.start_at).await?;
        if added == 0 {
            warn!(files = ?self.config.files, "No files matched the configured patterns");
        }
        Ok(())
    }

    /// Later discovery pass. Files found here are read from the beginning,
    /// since they appeared after tailing started. Returns how many files
    /// were added.
    pub async fn rescan(&self) -> Result<usize> {
        self.discover(StartAt::Beginning).await
    }

    /// Run until `cancel` fires: one discovery pass, then a rescan every
    /// `rescan_interval`, then [`TailManager::stop`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.start().await?;

        let mut rescan = tokio::time::interval(self.config.rescan_interval);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        rescan.tick().await;

        loop {
            tokio::select! {
                _ = rescan.tick() => {
                    match self.rescan().await {
                        Ok(added) if added > 0 => debug!(added, "Rescan found new files"),
                        Ok(_) => {}
                        Err(Error::Stopped) => break,
                        Err(e) => warn!(error = %e, "Rescan failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Tail manager cancelled, stopping followers");
                    break;
                }
            }
        }

        self.stop().await
    }

    /// Stop every follower, release its resources and wait for every consumer
    /// task to exit. Per-file failures go to the sink. Calling this again is
    /// a no-op.
    pub async fn stop(&self) -> Result<()> {
        let (tailers, mut tasks, mut task_paths) = {
            let mut state = self.lock_state();
            if state.stopped {
                return Ok(());
            }
            state.stopped = true;
            (
                std::mem::take(&mut state.tailers),
                std::mem::take(&mut state.tasks),
                std::mem::take(&mut state.task_paths),
            )
        };

        info!(files = tailers.len(), "Stopping tail manager");

        for tracked in tailers.values() {
            tracked.follower.stop();
        }

        let mut errors = Vec::new();
        for (_, mut tracked) in tailers {
            if let Err(e) = tracked.follower.release().await {
                errors.push(e);
            }
        }

        while let Some(result) = tasks.join_next_with_id().await {
            if let Err(e) = result {
                let path = task_paths.remove(&e.id()).unwrap_or_default();
                errors.push(Error::Stop {
                    path,
                    reason: e.to_string(),
                });
            }
        }

        for err in errors {
            self.sink.add_error(err).await;
        }

        info!("Tail manager stopped");
        Ok(())
    }

    /// Tracked paths, sorted
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let state = self.lock_state();
        let mut paths: Vec<PathBuf> = state.tailers.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn state(&self, path: &Path) -> Option<TrackState> {
        self.lock_state()
            .tailers
            .get(path)
            .map(|tracked| *tracked.state.borrow())
    }

    pub fn len(&self) -> usize {
        self.lock_state().tailers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().tailers.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn discover(&self, start_at: StartAt) -> Result<usize> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }

        let mut errors = Vec::new();
        let mut paths = BTreeSet::new();
        for pattern in &self.config.files {
            match self.finder.resolve(pattern) {
                Ok(found) => paths.extend(found),
                Err(e) => errors.push(e),
            }
        }

        let follower_config =
            FollowerConfig::from_tail_config(&self.config, start_at, self.watchers.clone());
        let mut added = 0;
        {
            let mut state = self.lock_state();
            if state.stopped {
                return Err(Error::Stopped);
            }
            for path in paths {
                if state.tailers.contains_key(&path) {
                    continue;
                }
                match self.track(&mut state, path, &follower_config) {
                    Ok(()) => added += 1,
                    Err(e) => errors.push(e),
                }
            }
        }

        for err in errors {
            self.sink.add_error(err).await;
        }
        Ok(added)
    }

    /// Start a follower and its consumer task. Map insertion and task
    /// registration happen under the same lock.
    fn track(
        &self,
        state: &mut ManagerState,
        path: PathBuf,
        follower_config: &FollowerConfig,
    ) -> Result<()> {
        let parser = build_parser(&self.config.parser)?;
        let (follower, lines) = FileFollower::start(&path, follower_config)?;
        let (state_tx, state_rx) = watch::channel(TrackState::Streaming);

        let consumer = Consumer {
            path_tag: path.to_string_lossy().into_owned(),
            lines,
            parser: LineParser::new(parser),
            sink: self.sink.clone(),
            state: state_tx,
        };
        let handle = state.tasks.spawn(consumer.run());
        state.task_paths.insert(handle.id(), path.clone());

        debug!(path = %path.display(), "tail added for file");
        state.tailers.insert(
            path,
            TrackedFile {
                follower,
                state: state_rx,
            },
        );
        Ok(())
    }
}

/// Reads one follower's lines, parses them and forwards tagged records
struct Consumer<S: Sink> {
    path_tag: String,
    lines: LineStream,
    parser: LineParser,
    sink: Arc<S>,
    state: watch::Sender<TrackState>,
}

impl<S: Sink> Consumer<S> {
    async fn run(mut self) {
        while let Some(event) = self.lines.next().await {
            match event {
                FollowEvent::Line(line) => self.handle_line(line).await,
                FollowEvent::ReadError(err) => self.sink.add_error(err).await,
                FollowEvent::Fatal(err) => {
                    warn!(path = %self.path_tag, error = %err, "Giving up on file");
                    self.state.send_replace(TrackState::Failed);
                    self.sink.add_error(err).await;
                }
            }
        }

        if *self.state.borrow() != TrackState::Failed {
            self.state.send_replace(TrackState::Stopped);
        }
        debug!(path = %self.path_tag, "tail removed for file");
    }

    async fn handle_line(&mut self, line: String) {
        match self.parser.parse_line(&line) {
            Ok(records) => {
                for record in records {
                    self.sink
                        .add_record(record.with_tag(PATH_TAG, self.path_tag.clone()))
                        .await;
                }
            }
            Err(err) => {
                let reason = match err {
                    Error::Format(reason) => reason,
                    other => other.to_string(),
                };
                self.sink
                    .add_error(Error::Parse {
                        path: PathBuf::from(self.lines.path()),
                        line,
                        reason,
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::receivers::tail::config::{DataFormat, ParserConfig};
    use crate::receivers::tail::sink::MemorySink;
    use crate::receivers::tail::watcher::WatchMode;
    use std::io;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir, format: DataFormat) -> TailConfig {
        TailConfig {
            files: vec![format!("{}/*.log", dir.path().display())],
            start_at: StartAt::Beginning,
            watch_mode: WatchMode::Poll,
            poll_interval: Duration::from_millis(20),
            parser: ParserConfig::new(format),
            ..Default::default()
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Resolves every pattern to the same fixed list
    struct FixedFinder(Vec<PathBuf>);

    impl FileFinder for FixedFinder {
        fn resolve(&self, _pattern: &str) -> Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = TailManager::new(TailConfig::default(), Arc::new(MemorySink::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_tags_records_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "cpu v=1\n").unwrap();

        let sink = Arc::new(MemorySink::new());
        let manager = TailManager::new(config(&dir, DataFormat::Influx), sink.clone()).unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.state(&path), Some(TrackState::Streaming));

        wait_for(|| sink.record_count() == 1).await;
        let records = sink.records();
        assert_eq!(records[0].tag(PATH_TAG), Some(path.to_str().unwrap()));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_parse_error_is_reported_and_following_continues() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "not line protocol\ncpu v=1\n").unwrap();

        let sink = Arc::new(MemorySink::new());
        let manager = TailManager::new(config(&dir, DataFormat::Influx), sink.clone()).unwrap();
        manager.start().await.unwrap();

        wait_for(|| sink.record_count() == 1).await;
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("malformed log line in"));
        assert!(errors[0].contains("[not line protocol]"));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_same_path_from_two_patterns_is_tracked_once() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "").unwrap();

        let mut cfg = config(&dir, DataFormat::Influx);
        cfg.files.push(format!("{}/a.*", dir.path().display()));
        let manager = TailManager::new(cfg, Arc::new(MemorySink::new())).unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.len(), 1);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_pattern_does_not_abort_pass() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.log"), "").unwrap();

        let mut cfg = config(&dir, DataFormat::Influx);
        cfg.files.insert(0, "/tmp/[broken".to_string());
        let sink = Arc::new(MemorySink::new());
        let manager = TailManager::new(cfg, sink.clone()).unwrap();
        manager.start().await.unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(sink.errors().len(), 1);
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_failure_is_reported_and_retried() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.log");

        let sink = Arc::new(MemorySink::new());
        let manager = TailManager::new(config(&dir, DataFormat::Influx), sink.clone())
            .unwrap()
            .with_finder(FixedFinder(vec![missing.clone()]));

        manager.start().await.unwrap();
        assert!(manager.is_empty());
        assert_eq!(sink.errors().len(), 1);

        fs::write(&missing, "").unwrap();
        assert_eq!(manager.rescan().await.unwrap(), 1);
        assert_eq!(manager.tracked_paths(), vec![missing]);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_follower_error_marks_failed() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("logs");
        fs::create_dir(&sub).unwrap();
        let path = sub.join("a.log");
        fs::write(&path, "").unwrap();

        let sink = Arc::new(MemorySink::new());
        let manager = TailManager::new(config(&dir, DataFormat::Influx), sink.clone())
            .unwrap()
            .with_finder(FixedFinder(vec![path.clone()]));
        manager.start().await.unwrap();

        fs::remove_dir_all(&sub).unwrap();
        wait_for(|| manager.state(&path) == Some(TrackState::Failed)).await;
        assert!(sink.errors().iter().any(|e| e.contains("is gone")));

        // A failed file keeps its entry and is not retried
        fs::create_dir(&sub).unwrap();
        fs::write(&path, "").unwrap();
        assert_eq!(manager.rescan().await.unwrap(), 0);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_after_stop() {
        let dir = TempDir::new().unwrap();
        let manager =
            TailManager::new(config(&dir, DataFormat::Influx), Arc::new(MemorySink::new()))
                .unwrap();
        manager.start().await.unwrap();
        manager.stop().await.unwrap();
        manager.stop().await.unwrap();

        assert!(manager.is_stopped());
        assert!(matches!(manager.start().await, Err(Error::Stopped)));
        assert!(matches!(manager.rescan().await, Err(Error::Stopped)));
    }

    #[tokio::test]
    async fn test_run_rescans_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, DataFormat::Value);
        cfg.rescan_interval = Duration::from_millis(50);

        let sink = Arc::new(MemorySink::new());
        let manager = Arc::new(TailManager::new(cfg, sink.clone()).unwrap());
        let cancel = CancellationToken::new();
        let runner = {
            let manager = manager.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.run(cancel).await })
        };

        fs::write(dir.path().join("late.log"), "hello\n").unwrap();
        wait_for(|| sink.record_count() == 1).await;

        cancel.cancel();
        runner.await.unwrap().unwrap();
        assert!(manager.is_stopped());
    }

    #[tokio::test]
    async fn test_native_mode_tracks_many_files_on_one_instance() {
        let dir = TempDir::new().unwrap();
        for i in 0..200 {
            fs::write(dir.path().join(format!("f{:03}.log", i)), "").unwrap();
        }
        let mut cfg = config(&dir, DataFormat::Influx);
        cfg.watch_mode = WatchMode::Native;

        let sink = Arc::new(MemorySink::new());
        let manager = TailManager::new(cfg, sink.clone()).unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.len(), 200);
        assert!(sink.errors().is_empty(), "{:?}", sink.errors());

        let WatchSource::Native(native) = &manager.watchers else {
            panic!("expected a native watch source");
        };
        assert_eq!(native.watched_dirs(), 1);

        fs::write(dir.path().join("f199.log"), "cpu v=1\n").unwrap();
        wait_for(|| sink.record_count() == 1).await;

        // Released followers drop their registrations
        manager.stop().await.unwrap();
        assert_eq!(native.watched_dirs(), 0);
    }

    #[tokio::test]
    async fn test_read_error_reaches_sink_and_later_lines_still_parse() {
        let path = PathBuf::from("/var/log/app.log");
        let sink = Arc::new(MemorySink::new());
        let (tx, rx) = bounded(8);
        let (state_tx, state_rx) = watch::channel(TrackState::Streaming);
        let parser = build_parser(&ParserConfig::new(DataFormat::Influx)).unwrap();
        let consumer = Consumer {
            path_tag: path.to_string_lossy().into_owned(),
            lines: LineStream::from_receiver(path.clone(), rx),
            parser: LineParser::new(parser),
            sink: sink.clone(),
            state: state_tx,
        };

        tx.send(FollowEvent::Line("cpu v=1".to_string())).await.unwrap();
        tx.send(FollowEvent::ReadError(Error::Read {
            path: path.clone(),
            source: io::Error::other("device went away"),
        }))
        .await
        .unwrap();
        tx.send(FollowEvent::Line("cpu v=2".to_string())).await.unwrap();
        drop(tx);
        consumer.run().await;

        assert_eq!(sink.record_count(), 2);
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0],
            "error tailing file /var/log/app.log: device went away"
        );
        // A read error is not fatal
        assert_eq!(*state_rx.borrow(), TrackState::Stopped);
    }
}
