// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Staging of the static package manager into the build root.
//!
//! Stage > 0 operations run the package manager from inside the build
//! root, so a statically linked binary has to be present there before the
//! first install cycle.

use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use crate::apk::{CallOpts, PackageManager};
use crate::config::BuilderConfig;
use crate::context::ChrootFacts;
use crate::error::BuildError;

/// Downloads a URL to a local file.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// The stock [`Fetcher`] going over HTTP.
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = reqwest::blocking::get(url)
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("GET {url}"))?;
        let mut out =
            File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
        std::io::copy(&mut response, &mut out)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        Ok(())
    }
}

/// Ensures `usr/bin/apk.static` exists in the build root and is the active
/// package-manager executable.
///
/// When missing, the `apk-tools-static-bin` archive is fetched from the
/// configured repository and extracted by the currently available package
/// manager into a throwaway root. Any failure carries the source URL.
pub fn ensure_apk_static(
    pm: &dyn PackageManager,
    config: &BuilderConfig,
    facts: &ChrootFacts,
    fetcher: &dyn Fetcher,
) -> Result<()> {
    let dest = config.bldroot.join("usr/bin/apk.static");
    if dest.is_file() {
        return Ok(());
    }

    let url = format!(
        "{}/{}/apk-tools-static-bin-{}.apk",
        config.bootstrap.repository, facts.host_cpu, config.bootstrap.version
    );
    stage_static(pm, fetcher, &url, &dest).map_err(|source| {
        BuildError::Bootstrap {
            url: url.clone(),
            source,
        }
        .into()
    })
}

fn stage_static(
    pm: &dyn PackageManager,
    fetcher: &dyn Fetcher,
    url: &str,
    dest: &Path,
) -> Result<()> {
    tracing::info!("fetching apk-tools-static-bin from {}", url);

    let download = tempfile::tempdir()?;
    let apk_file = download.path().join("apk-tools-static-bin.apk");
    fetcher.fetch(url, &apk_file)?;

    let staging = tempfile::tempdir()?;
    seed_installed_db(staging.path())?;

    let args: Vec<String> = [
        "--repositories-file",
        "/dev/null",
        "--no-scripts",
        "--allow-untrusted",
        "--no-interactive",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain([apk_file.display().to_string()])
    .collect();
    let out = pm.call(
        "add",
        &args,
        &CallOpts {
            root: Some(staging.path()),
            skip_repositories: true,
            ..Default::default()
        },
    )?;
    if !out.success() {
        let detail = if out.stderr.trim().is_empty() {
            "unknown error"
        } else {
            out.stderr.trim()
        };
        bail!("failed to extract apk-tools-static-bin: {detail}");
    }

    let source = locate_static(staging.path())?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::copy(&source, dest)
        .with_context(|| format!("Failed to install {}", dest.display()))?;
    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))?;

    pm.register_program(dest);
    Ok(())
}

/// Pre-seeds an empty installed-package database so the extraction
/// transaction has a root to operate on.
fn seed_installed_db(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root.join("etc/apk"))?;
    let db = root.join("usr/lib/apk/db");
    std::fs::create_dir_all(&db)?;
    File::create(db.join("installed"))?;
    Ok(())
}

fn locate_static(root: &Path) -> Result<PathBuf> {
    for candidate in ["usr/bin/apk.static", "bin/apk.static", "apk.static"] {
        let path = root.join(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() && entry.file_name() == std::ffi::OsStr::new("apk.static") {
            return Ok(entry.into_path());
        }
    }
    bail!("apk.static binary not found in extracted package");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use crate::testutil::{test_config, FakeApk};

    struct FileFetcher {
        fetches: Arc<AtomicUsize>,
    }

    impl Fetcher for FileFetcher {
        fn fetch(&self, _url: &str, dest: &Path) -> Result<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, b"archive")?;
            Ok(())
        }
    }

    struct FailingFetcher;

    impl Fetcher for FailingFetcher {
        fn fetch(&self, _url: &str, _dest: &Path) -> Result<()> {
            bail!("connection refused");
        }
    }

    #[test]
    fn stages_and_registers_static_binary() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let facts = ChrootFacts::detect(&config, 1);
        let pm = FakeApk::new(&[]);
        // Extraction is the package manager's doing; the fake plays its
        // part by dropping the binary into the staging root.
        pm.on_add(|staging| {
            let bin = staging.join("usr/bin");
            std::fs::create_dir_all(&bin)?;
            std::fs::write(bin.join("apk.static"), b"#!static")?;
            Ok(())
        });
        let fetches = Arc::new(AtomicUsize::new(0));

        ensure_apk_static(
            &pm,
            &config,
            &facts,
            &FileFetcher {
                fetches: fetches.clone(),
            },
        )?;

        let dest = config.bldroot.join("usr/bin/apk.static");
        assert!(dest.is_file());
        assert_eq!(std::fs::read(&dest)?, b"#!static");
        let mode = std::fs::metadata(&dest)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(pm.registered.lock().unwrap().as_deref(), Some(dest.as_path()));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // A second call sees the staged binary and does nothing.
        ensure_apk_static(
            &pm,
            &config,
            &facts,
            &FileFetcher {
                fetches: fetches.clone(),
            },
        )?;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn fetch_failure_carries_url() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(root.path());
        let facts = ChrootFacts::detect(&config, 1);
        let pm = FakeApk::new(&[]);

        let err = ensure_apk_static(&pm, &config, &facts, &FailingFetcher).unwrap_err();
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::Bootstrap { url, .. }) => {
                assert!(url.contains("apk-tools-static-bin-3.0.3-r0.apk"), "{url}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finds_binary_via_recursive_search() -> Result<()> {
        let root = tempfile::tempdir()?;
        let nested = root.path().join("opt/apk-tools/bin");
        std::fs::create_dir_all(&nested)?;
        std::fs::write(nested.join("apk.static"), b"bin")?;
        assert_eq!(locate_static(root.path())?, nested.join("apk.static"));
        Ok(())
    }
}
