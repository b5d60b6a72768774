// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io;
use std::path::Path;

/// Bytes of a file's head kept to recognise rewrites that reuse the inode
pub const FINGERPRINT_SIZE: usize = 1000;

/// The first bytes of the generation a follower is reading.
///
/// Holds exactly the first `min(size, offset)` bytes the follower has
/// consumed. If the file no longer starts with them, it was truncated and
/// rewritten, even when it has since grown past the follower's offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    first_bytes: Vec<u8>,
    size: usize,
}

impl Fingerprint {
    pub fn new(size: usize) -> Self {
        Self {
            first_bytes: Vec::new(),
            size,
        }
    }

    /// Fingerprint of a file opened part way through, `consumed` bytes in
    pub fn read(file: &File, path: &Path, size: usize, consumed: u64) -> io::Result<Self> {
        let len = size.min(usize::try_from(consumed).unwrap_or(usize::MAX));
        Ok(Self {
            first_bytes: read_head(file, path, len)?,
            size,
        })
    }

    /// Account for bytes the follower just consumed
    pub fn record(&mut self, consumed: &[u8]) {
        let room = self.size.saturating_sub(self.first_bytes.len());
        self.first_bytes
            .extend_from_slice(&consumed[..consumed.len().min(room)]);
    }

    /// Whether the file still starts with the recorded bytes
    pub fn matches(&self, file: &File, path: &Path) -> io::Result<bool> {
        if self.first_bytes.is_empty() {
            return Ok(true);
        }
        let head = read_head(file, path, self.first_bytes.len())?;
        Ok(head == self.first_bytes)
    }

    pub fn reset(&mut self) {
        self.first_bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.first_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }
}

/// Positional read, leaving the handle's cursor alone
#[cfg(unix)]
fn read_head(file: &File, _path: &Path, len: usize) -> io::Result<Vec<u8>> {
    use std::os::unix::fs::FileExt;

    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match file.read_at(&mut buf[filled..], filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(not(unix))]
fn read_head(_file: &File, path: &Path, len: usize) -> io::Result<Vec<u8>> {
    use std::io::Read;

    let mut buf = Vec::with_capacity(len);
    File::open(path)?.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}
