// SPDX-License-Identifier: Apache-2.0

pub mod file_id;
pub mod finder;
pub mod fingerprint;
pub mod follower;

pub use file_id::FileId;
pub use finder::{FileFinder, GlobFileFinder};
pub use fingerprint::{FINGERPRINT_SIZE, Fingerprint};
pub use follower::{FileFollower, FollowEvent, FollowerConfig, LineStream};
