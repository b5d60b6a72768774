// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::fs::Metadata;

/// Device and inode of a file. A follower compares the id of its open handle
/// with the id of whatever currently lives at the followed path; a mismatch
/// means the path now names a different file.
///
/// Without inode numbers (non-unix) every file shares one id, and only
/// truncation can be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Self {
        Self { dev: 0, ino: 0 }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn id_of(path: &std::path::Path) -> FileId {
        FileId::from_metadata(&fs::metadata(path).unwrap())
    }

    #[test]
    fn test_handle_and_path_agree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "line\n").unwrap();

        let handle = File::open(&path).unwrap();
        assert_eq!(FileId::from_metadata(&handle.metadata().unwrap()), id_of(&path));
    }

    #[test]
    fn test_stable_across_appends_and_truncation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\n").unwrap();
        let before = id_of(&path);

        fs::write(&path, "one\ntwo\n").unwrap();
        File::create(&path).unwrap();
        assert_eq!(id_of(&path), before);
    }

    #[cfg(unix)]
    #[test]
    fn test_differs_after_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "gen 1\n").unwrap();
        let held = File::open(&path).unwrap();
        let old = FileId::from_metadata(&held.metadata().unwrap());

        fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        fs::write(&path, "gen 2\n").unwrap();

        assert_ne!(id_of(&path), old);
        // The open handle still names the rotated file
        assert_eq!(FileId::from_metadata(&held.metadata().unwrap()), old);
        assert!(old.to_string().contains(':'));
    }
}
