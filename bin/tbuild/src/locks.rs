// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-architecture package-manager mutexes.
//!
//! Every invocation touching an architecture's repository or root state
//! holds that arch's lock. The lock covers exactly one search batch or one
//! add/fix transaction; it is never held across recursive sub-builds. When
//! both are needed, the host lock is always taken before the target lock.

use std::path::{Path, PathBuf};

use anyhow::Result;
use fileutil::PathLock;

pub struct Locks {
    statedir: PathBuf,
}

impl Locks {
    pub fn new(statedir: &Path) -> Self {
        Self {
            statedir: statedir.to_path_buf(),
        }
    }

    /// The lock file naming the mutex for `arch`.
    pub fn apk_lock_path(&self, arch: &str) -> PathBuf {
        self.statedir.join(format!("apk.{arch}.lock"))
    }

    /// Blocks until the mutex for `arch` is held.
    pub fn lock(&self, arch: &str) -> Result<PathLock> {
        PathLock::acquire(&self.apk_lock_path(arch))
    }
}
