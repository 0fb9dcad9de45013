// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared fakes and fixtures for unit tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;

use crate::apk::{CallOpts, PackageManager, PmOutput};
use crate::config::BuilderConfig;
use crate::depends::{BuildStatus, Builder, ChildRequest};

/// One recorded package-manager invocation.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub verb: String,
    pub args: Vec<String>,
    pub root: Option<PathBuf>,
    pub arch: Option<String>,
    pub allow_untrusted: bool,
    pub chroot: bool,
}

struct SearchExpectation {
    names: HashSet<String>,
    lines: Vec<String>,
    code: i32,
}

type AddHook = Box<dyn Fn(&Path) -> Result<()> + Send + Sync>;

/// A scripted package manager. Batched and per-repository searches return
/// canned output; add/fix succeed unless a failure is injected.
pub struct FakeApk {
    repositories: Vec<String>,
    pub calls: Mutex<Vec<RecordedCall>>,
    searches: Mutex<Vec<SearchExpectation>>,
    repo_searches: Mutex<Vec<(String, String, Vec<String>)>>,
    fail: Mutex<Option<(String, i32, String, String)>>,
    add_hook: Mutex<Option<AddHook>>,
    pub registered: Mutex<Option<PathBuf>>,
}

impl FakeApk {
    pub fn new(repositories: &[&str]) -> Self {
        Self {
            repositories: repositories.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
            repo_searches: Mutex::new(Vec::new()),
            fail: Mutex::new(None),
            add_hook: Mutex::new(None),
            registered: Mutex::new(None),
        }
    }

    /// Scripts the batched `search` reply for exactly this set of names.
    pub fn expect_search(&self, names: &[&str], lines: &[&str], code: i32) {
        self.searches.lock().unwrap().push(SearchExpectation {
            names: names.iter().map(|s| s.to_string()).collect(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
            code,
        });
    }

    /// Scripts a single-name `search --repository` reply.
    pub fn expect_repo_search(&self, repo: &str, name: &str, lines: &[&str]) {
        self.repo_searches.lock().unwrap().push((
            repo.to_string(),
            name.to_string(),
            lines.iter().map(|s| s.to_string()).collect(),
        ));
    }

    /// Makes the next invocation of `verb` fail with the given output.
    pub fn fail_verb(&self, verb: &str, code: i32, stderr: &str, stdout: &str) {
        *self.fail.lock().unwrap() = Some((
            verb.to_string(),
            code,
            stderr.to_string(),
            stdout.to_string(),
        ));
    }

    /// Runs `hook` with the target root on every `add`, standing in for the
    /// package manager's extraction side effects.
    pub fn on_add(&self, hook: impl Fn(&Path) -> Result<()> + Send + Sync + 'static) {
        *self.add_hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn respond(&self, verb: &str, args: &[String], opts: &CallOpts) -> Result<PmOutput> {
        let pending_failure = self.fail.lock().unwrap().take();
        if let Some((fail_verb, code, stderr, stdout)) = pending_failure {
            if fail_verb == verb {
                return Ok(PmOutput {
                    code,
                    stdout,
                    stderr,
                    repos: None,
                });
            }
            *self.fail.lock().unwrap() = Some((fail_verb, code, stderr, stdout));
        }

        let repos = opts.return_repos.then(|| self.repositories.clone());

        if verb == "search" {
            if let Some(at) = args.iter().position(|a| a == "--repository") {
                let repo = &args[at + 1];
                let name = args.last().unwrap();
                let lines = self
                    .repo_searches
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|(r, n, _)| r == repo && n == name)
                    .map(|(_, _, lines)| lines.clone())
                    .unwrap_or_default();
                return Ok(PmOutput {
                    code: 0,
                    stdout: lines.join("\n"),
                    stderr: String::new(),
                    repos,
                });
            }

            let at = args
                .iter()
                .position(|a| a == "-a")
                .expect("batched search must pass -a");
            let requested: HashSet<String> = args[at + 1..].iter().cloned().collect();
            let searches = self.searches.lock().unwrap();
            let reply = searches.iter().find(|e| e.names == requested);
            return Ok(match reply {
                Some(e) => PmOutput {
                    code: e.code,
                    stdout: e.lines.join("\n"),
                    stderr: String::new(),
                    repos,
                },
                // Nothing scripted means nothing found for any name.
                None => PmOutput {
                    code: requested.len() as i32,
                    stdout: String::new(),
                    stderr: String::new(),
                    repos,
                },
            });
        }

        if verb == "add" {
            if let (Some(hook), Some(root)) = (self.add_hook.lock().unwrap().as_ref(), opts.root) {
                hook(root)?;
            }
        }

        Ok(PmOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
            repos,
        })
    }

    fn record(&self, verb: &str, args: &[String], opts: &CallOpts, chroot: bool) {
        self.calls.lock().unwrap().push(RecordedCall {
            verb: verb.to_string(),
            args: args.to_vec(),
            root: opts.root.map(Path::to_path_buf),
            arch: opts.arch.map(str::to_string),
            allow_untrusted: opts.allow_untrusted,
            chroot,
        });
    }
}

impl PackageManager for FakeApk {
    fn call(&self, verb: &str, args: &[String], opts: &CallOpts) -> Result<PmOutput> {
        self.record(verb, args, opts, false);
        self.respond(verb, args, opts)
    }

    fn call_chroot(&self, verb: &str, args: &[String], opts: &CallOpts) -> Result<PmOutput> {
        self.record(verb, args, opts, true);
        self.respond(verb, args, opts)
    }

    fn register_program(&self, path: &Path) {
        *self.registered.lock().unwrap() = Some(path.to_path_buf());
    }
}

/// A recording builder; specific templates can be scripted to skip.
#[derive(Default)]
pub struct FakeBuilder {
    pub requests: Mutex<Vec<ChildRequest>>,
    pub skip: Mutex<HashSet<String>>,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_template(&self, full_pkgname: &str) {
        self.skip.lock().unwrap().insert(full_pkgname.to_string());
    }
}

impl Builder for FakeBuilder {
    fn build(&self, request: &ChildRequest) -> Result<BuildStatus> {
        self.requests.lock().unwrap().push(request.clone());
        if self.skip.lock().unwrap().contains(&request.full_pkgname) {
            Ok(BuildStatus::Skipped)
        } else {
            Ok(BuildStatus::Built)
        }
    }
}

/// A builder configuration rooted in a temporary directory.
pub fn test_config(root: &Path) -> BuilderConfig {
    BuilderConfig {
        distdir: root.join("ports"),
        bldroot: root.join("bldroot"),
        statedir: root.join("state"),
        source_repositories: vec!["main".to_string(), "contrib".to_string()],
        repositories: vec![
            "https://repo/high".to_string(),
            "https://repo/low".to_string(),
        ],
        world_base: vec!["base-chroot".to_string()],
        signing_key: None,
        apk_command: PathBuf::from("apk"),
        depcheck: true,
        bootstrap: Default::default(),
    }
}

/// Writes `<distdir>/<repo>/<name>/template.toml` with the given body.
pub fn write_template(
    config: &BuilderConfig,
    repo: &str,
    name: &str,
    body: &str,
) -> Result<PathBuf> {
    let dir = config.distdir.join(repo).join(name);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("template.toml");
    std::fs::write(&path, body)?;
    Ok(dir)
}
