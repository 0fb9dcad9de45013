// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Facade over the `apk` package manager.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::RwLock;

use anyhow::{Context, Result};
use tracing::instrument;

use crate::config::BuilderConfig;

/// Options common to every package-manager invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CallOpts<'a> {
    pub root: Option<&'a Path>,
    pub arch: Option<&'a str>,
    pub allow_untrusted: bool,
    /// Return the consulted repository list in priority order.
    pub return_repos: bool,
    /// Leave out the configured repositories, for calls that bring their own.
    pub skip_repositories: bool,
}

/// Captured result of one package-manager invocation.
#[derive(Clone, Debug)]
pub struct PmOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub repos: Option<Vec<String>>,
}

impl PmOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// The operations the resolution core needs from a package manager.
///
/// Verbs in use are `search`, `add` and `fix`. `call_chroot` executes the
/// same operation against the build root, the way it would run inside the
/// chroot.
pub trait PackageManager: Send + Sync {
    fn call(&self, verb: &str, args: &[String], opts: &CallOpts) -> Result<PmOutput>;
    fn call_chroot(&self, verb: &str, args: &[String], opts: &CallOpts) -> Result<PmOutput>;
    /// Makes `path` the executable used by subsequent operations.
    fn register_program(&self, path: &Path);
}

/// The real `apk` command runner.
pub struct Apk {
    program: RwLock<PathBuf>,
    bldroot: PathBuf,
    repositories: Vec<String>,
}

impl Apk {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            program: RwLock::new(config.apk_command.clone()),
            bldroot: config.bldroot.clone(),
            repositories: config.repositories.clone(),
        }
    }

    pub fn program(&self) -> PathBuf {
        self.program.read().unwrap().clone()
    }
}

impl PackageManager for Apk {
    #[instrument(skip_all, fields(verb = verb))]
    fn call(&self, verb: &str, args: &[String], opts: &CallOpts) -> Result<PmOutput> {
        let program = self.program();
        let mut cmd = Command::new(&program);
        cmd.arg(verb);
        if let Some(root) = opts.root {
            cmd.arg("--root").arg(root);
        }
        if let Some(arch) = opts.arch {
            cmd.arg("--arch").arg(arch);
        }
        if !opts.skip_repositories {
            for repo in &self.repositories {
                cmd.arg("--repository").arg(repo);
            }
        }
        if opts.allow_untrusted {
            cmd.arg("--allow-untrusted");
        }
        cmd.arg("--no-interactive");
        cmd.args(args);

        let output = cmd
            .output()
            .with_context(|| format!("Failed to run {} {}", program.display(), verb))?;
        Ok(PmOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            repos: opts.return_repos.then(|| self.repositories.clone()),
        })
    }

    fn call_chroot(&self, verb: &str, args: &[String], opts: &CallOpts) -> Result<PmOutput> {
        // Paths in `opts.root` are the ones a process inside the chroot
        // would see; rebase them onto the build root.
        let root = match opts.root {
            Some(inner) => self
                .bldroot
                .join(inner.strip_prefix("/").unwrap_or(inner)),
            None => self.bldroot.clone(),
        };
        let opts = CallOpts {
            root: Some(&root),
            ..*opts
        };
        self.call(verb, args, &opts)
    }

    fn register_program(&self, path: &Path) {
        *self.program.write().unwrap() = path.to_path_buf();
    }
}
