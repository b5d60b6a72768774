// SPDX-License-Identifier: Apache-2.0

//! File follower: turns one growing file into an ordered stream of lines.
//!
//! The read loop runs on a dedicated OS thread and hands lines to the async
//! side through a bounded channel. The follower survives truncation and
//! rotation (rename + recreate) by comparing the identity of its open handle
//! with whatever currently lives at the followed path, and recognises a file
//! rewritten in place by the first bytes of the generation it is reading.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::file_id::FileId;
use super::fingerprint::{FINGERPRINT_SIZE, Fingerprint};
use crate::bounded_channel::{BoundedReceiver, BoundedSender, SendTimeoutError, bounded};
use crate::receivers::tail::config::{StartAt, TailConfig};
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::watcher::{FileWatcher, WatchSource};

/// Capacity of the channel between the follower thread and its consumer
pub const LINE_CHANNEL_SIZE: usize = 1024;

/// Longest a follower waits before checking for a stop request
pub const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Longest a follower waits for a watcher event before re-reading anyway
const RECHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FollowerConfig {
    pub start_at: StartAt,
    pub pipe: bool,
    /// Shared by every follower of a manager
    pub watchers: WatchSource,
    pub max_line_size: usize,
}

impl FollowerConfig {
    pub fn new(watchers: WatchSource) -> Self {
        Self {
            start_at: StartAt::End,
            pipe: false,
            watchers,
            max_line_size: 1024 * 1024,
        }
    }

    pub fn from_tail_config(config: &TailConfig, start_at: StartAt, watchers: WatchSource) -> Self {
        Self {
            start_at,
            pipe: config.pipe,
            watchers,
            max_line_size: config.max_line_size,
        }
    }
}

/// What a follower hands to its consumer
#[derive(Debug)]
pub enum FollowEvent {
    /// One line, without its trailing newline
    Line(String),
    /// A read failed; the follower retries from the same position
    ReadError(Error),
    /// The follower gave up; the stream ends after this event
    Fatal(Error),
}

/// Receiving half of a follower
pub struct LineStream {
    path: PathBuf,
    rx: BoundedReceiver<FollowEvent>,
}

impl LineStream {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next event, or `None` once the follower has exited
    pub async fn next(&mut self) -> Option<FollowEvent> {
        self.rx.next().await
    }

    #[cfg(test)]
    pub(crate) fn from_receiver(path: PathBuf, rx: BoundedReceiver<FollowEvent>) -> Self {
        Self { path, rx }
    }
}

/// Handle to a running follower thread
pub struct FileFollower {
    path: PathBuf,
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl FileFollower {
    /// Open `path` and start following it.
    pub fn start(path: impl Into<PathBuf>, config: &FollowerConfig) -> Result<(Self, LineStream)> {
        let path = path.into();
        let file = open_file(&path, config.pipe).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;

        let mut file_id = None;
        let mut offset = 0;
        let mut head = Fingerprint::new(FINGERPRINT_SIZE);
        let mut reader = BufReader::new(file);
        if !config.pipe {
            let open_err = |source: io::Error| Error::Open {
                path: path.clone(),
                source,
            };
            let metadata = reader.get_ref().metadata().map_err(open_err)?;
            file_id = Some(FileId::from_metadata(&metadata));
            if config.start_at == StartAt::End {
                offset = reader.seek(SeekFrom::End(0)).map_err(open_err)?;
                head = Fingerprint::read(reader.get_ref(), &path, FINGERPRINT_SIZE, offset)
                    .map_err(open_err)?;
            }
        }

        let watcher = config.watchers.watch(&path).map_err(|e| Error::Watch {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let backend = watcher.backend_name();

        let (tx, rx) = bounded(LINE_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let state = FollowerState {
            path: path.clone(),
            reader,
            file_id,
            offset,
            generation: 0,
            head,
            partial: Vec::new(),
            truncated: false,
            pipe: config.pipe,
            max_line_size: config.max_line_size,
            watcher,
            cancel: cancel.clone(),
            tx,
        };

        let thread = std::thread::Builder::new()
            .name("logtail-follow".into())
            .spawn(move || state.run())?;

        debug!(
            path = %path.display(),
            offset,
            pipe = config.pipe,
            watcher = backend,
            "Started follower"
        );

        let follower = Self {
            path: path.clone(),
            cancel,
            thread: Some(thread),
        };
        Ok((follower, LineStream { path, rx }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask the follower to stop. The line stream ends shortly after.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the follower thread to exit, dropping its file handle and
    /// watcher. Stops the follower first if that has not happened yet.
    pub async fn release(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.cancel.cancel();

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Stop {
                path: self.path.clone(),
                reason: "follower thread panicked".to_string(),
            }),
            Err(e) => Err(Error::Stop {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for FileFollower {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(unix)]
fn open_file(path: &Path, pipe: bool) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.read(true);
    if pipe {
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path)
}

#[cfg(not(unix))]
fn open_file(path: &Path, _pipe: bool) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

/// Owned by the follower thread
struct FollowerState {
    path: PathBuf,
    reader: BufReader<File>,
    file_id: Option<FileId>,
    /// Bytes consumed from the current generation
    offset: u64,
    generation: u64,
    head: Fingerprint,
    /// Bytes of a line whose newline has not arrived yet
    partial: Vec<u8>,
    /// The current line hit `max_line_size` and the rest is being discarded
    truncated: bool,
    pipe: bool,
    max_line_size: usize,
    watcher: Box<dyn FileWatcher>,
    cancel: CancellationToken,
    tx: BoundedSender<FollowEvent>,
}

enum Rotation {
    None,
    /// Same path, new file
    Replaced(File, FileId),
    Truncated,
}

impl FollowerState {
    fn run(mut self) {
        if let Err(e) = self.follow() {
            self.emit(FollowEvent::Fatal(e));
        }
        debug!(path = %self.path.display(), generation = self.generation, "Follower exited");
    }

    /// Read loop. Returns `Ok` when stopped, `Err` on a fatal error.
    fn follow(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            match self.read_line() {
                Ok(Some(line)) => {
                    if !self.emit(FollowEvent::Line(line)) {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    if !self.pipe && self.check_rotation()? {
                        continue;
                    }
                    self.wait()?;
                    // A rewrite that grew past the offset must not be read
                    // from the old position
                    if !self.pipe {
                        self.check_rotation()?;
                    }
                }
                Err(source) => {
                    let err = Error::Read {
                        path: self.path.clone(),
                        source,
                    };
                    if !self.emit(FollowEvent::ReadError(err)) {
                        return Ok(());
                    }
                    self.wait()?;
                }
            }
        }
    }

    /// Next complete line, or `None` when no complete line is available yet.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(None);
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.head.record(&available[..=pos]);
                    let chunk = &available[..pos];
                    append_limited(&mut self.partial, &mut self.truncated, chunk, self.max_line_size);
                    self.reader.consume(pos + 1);
                    self.offset += pos as u64 + 1;
                    return Ok(Some(self.take_partial()));
                }
                None => {
                    let len = available.len();
                    let chunk = available;
                    self.head.record(chunk);
                    append_limited(&mut self.partial, &mut self.truncated, chunk, self.max_line_size);
                    self.reader.consume(len);
                    self.offset += len as u64;
                }
            }
        }
    }

    fn take_partial(&mut self) -> String {
        let bytes = std::mem::take(&mut self.partial);
        if self.truncated {
            debug!(path = %self.path.display(), max = self.max_line_size, "Truncated long line");
            self.truncated = false;
        }
        let mut line = String::from_utf8_lossy(&bytes).into_owned();
        if line.len() > self.max_line_size {
            let mut end = self.max_line_size;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
        }
        line
    }

    /// Called at EOF. Returns true when a new generation was opened and
    /// reading should resume immediately.
    fn check_rotation(&mut self) -> Result<bool> {
        match self.detect_rotation() {
            Rotation::None => Ok(false),
            Rotation::Truncated => {
                self.flush_partial();
                self.reader.seek(SeekFrom::Start(0)).map_err(|source| Error::Read {
                    path: self.path.clone(),
                    source,
                })?;
                self.offset = 0;
                self.head.reset();
                self.generation += 1;
                info!(path = %self.path.display(), generation = self.generation, "File truncated, reading from the start");
                Ok(true)
            }
            Rotation::Replaced(file, id) => {
                // Lines the writer appended to the old file before renaming it
                self.drain_current()?;
                self.flush_partial();
                self.reader = BufReader::new(file);
                self.file_id = Some(id);
                self.offset = 0;
                self.head.reset();
                self.generation += 1;
                info!(path = %self.path.display(), generation = self.generation, file_id = %id, "File rotated, following new file");
                Ok(true)
            }
        }
    }

    fn detect_rotation(&mut self) -> Rotation {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "Failed to stat followed file");
                }
                return Rotation::None;
            }
        };

        let id = FileId::from_metadata(&metadata);
        if self.file_id.is_some_and(|current| current != id) {
            return match open_file(&self.path, false) {
                Ok(file) => Rotation::Replaced(file, id),
                // Renamed again between stat and open; try next round
                Err(_) => Rotation::None,
            };
        }
        if metadata.len() < self.offset {
            return Rotation::Truncated;
        }
        match self.head.matches(self.reader.get_ref(), &self.path) {
            Ok(true) => Rotation::None,
            Ok(false) => Rotation::Truncated,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Failed to read file head");
                Rotation::None
            }
        }
    }

    /// Emit every complete line still readable from the current handle
    fn drain_current(&mut self) -> Result<()> {
        loop {
            match self.read_line() {
                Ok(Some(line)) => {
                    if !self.emit(FollowEvent::Line(line)) {
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(source) => {
                    self.emit(FollowEvent::ReadError(Error::Read {
                        path: self.path.clone(),
                        source,
                    }));
                    return Ok(());
                }
            }
        }
    }

    /// A generation ends: an unterminated last line becomes its own line
    fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            let line = self.take_partial();
            self.emit(FollowEvent::Line(line));
        }
    }

    /// Block until the watcher reports activity, a stop is requested, or
    /// the recheck interval passes.
    fn wait(&mut self) -> Result<()> {
        if !self.pipe && self.is_gone() {
            return Err(Error::FileGone(self.path.clone()));
        }

        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match self.watcher.wait(STOP_CHECK_INTERVAL) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    return Err(Error::Watch {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            if self.pipe || started.elapsed() >= RECHECK_INTERVAL {
                return Ok(());
            }
        }
    }

    /// The path is missing and so is its directory
    fn is_gone(&self) -> bool {
        if self.path.exists() {
            return false;
        }
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => !dir.exists(),
            _ => false,
        }
    }

    /// Send an event, checking for a stop request while the channel is full.
    /// Returns false when the follower should exit.
    fn emit(&self, mut event: FollowEvent) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match self.tx.send_timeout(event, STOP_CHECK_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(e)) => event = e,
                Err(SendTimeoutError::Disconnected) => return false,
            }
        }
    }
}

fn append_limited(buf: &mut Vec<u8>, truncated: &mut bool, chunk: &[u8], max: usize) {
    let room = max.saturating_sub(buf.len());
    if chunk.len() > room {
        *truncated = true;
    }
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
}
