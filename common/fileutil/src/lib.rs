// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Filesystem helpers shared across the builder: advisory path locks and
//! atomic file replacement.

use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::Path;

use anyhow::{Context, Result};
use nix::fcntl::{flock, FlockArg};
use tracing::instrument;

/// An exclusive advisory lock on a named lock file.
///
/// The lock file is created if missing and the lock is released on drop.
/// Lock files are never deleted, so the path stays a stable rendezvous
/// point for every process that names it.
pub struct PathLock {
    _file: File,
}

impl PathLock {
    /// Blocks until the exclusive lock on `path` is acquired.
    #[instrument]
    pub fn acquire(path: &Path) -> Result<PathLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::options()
            .create(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        flock(file.as_raw_fd(), FlockArg::LockExclusive)
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(PathLock { _file: file })
    }
}

/// Writes `contents` to `path` atomically.
///
/// The data is staged in a temporary file in the destination directory and
/// renamed over the target, so readers observe either the old or the new
/// contents, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to stage a file in {}", dir.display()))?;
    staged.write_all(contents)?;
    staged.flush()?;
    staged
        .persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
