// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Template metadata loading and the process-wide version cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::BuilderConfig;
use crate::error::BuildError;

/// Suffixes of automatically generated subpackages. A dependency on
/// `foo-devel` may be satisfied by the template of `foo`.
pub const AUTO_SUBPACKAGE_SUFFIXES: &[&str] = &["dbg", "devel", "doc", "libs", "progs", "static"];

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct SubpackageMetadata {
    pub pkgname: String,
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Declarative metadata of one template.
///
/// Only the metadata header of the recipe is represented here; build logic
/// is never evaluated by this crate.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateMetadata {
    pub pkgname: String,
    #[serde(default)]
    pub pkgver: Option<String>,
    #[serde(default)]
    pub pkgrel: Option<u32>,
    #[serde(default)]
    pub build_style: Option<String>,
    #[serde(default)]
    pub hostmakedepends: Vec<String>,
    #[serde(default)]
    pub makedepends: Vec<String>,
    #[serde(default)]
    pub checkdepends: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub subpackages: Vec<SubpackageMetadata>,
    /// Canonical `<repo>/<pkgname>`, filled in by the loader.
    #[serde(skip)]
    pub full_pkgname: String,
}

/// Loads template metadata without executing any build logic.
pub trait TemplateLoader: Send + Sync {
    fn load(&self, dir: &Path, repo: &str) -> Result<TemplateMetadata>;
}

/// The stock loader reading `template.toml` recipe headers.
pub struct TomlTemplateLoader;

impl TemplateLoader for TomlTemplateLoader {
    fn load(&self, dir: &Path, repo: &str) -> Result<TemplateMetadata> {
        let path = dir.join("template.toml");
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut meta: TemplateMetadata = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if meta.pkgname.is_empty() {
            return Err(BuildError::config(format!(
                "template {} declares an empty pkgname",
                path.display()
            ))
            .into());
        }
        meta.full_pkgname = format!("{}/{}", repo, meta.pkgname);
        Ok(meta)
    }
}

/// Resolves a `<repo>/<pkgname>` specification to loaded metadata.
pub fn load_template(
    loader: &dyn TemplateLoader,
    config: &BuilderConfig,
    spec: &str,
) -> Result<TemplateMetadata> {
    let Some((repo, pkgname)) = spec.split_once('/') else {
        return Err(BuildError::config_with_hint(
            format!("invalid template specification '{spec}'"),
            "use the '<repo>/<pkgname>' form",
        )
        .into());
    };
    loader.load(&config.distdir.join(repo).join(pkgname), repo)
}

/// Memoized lookup of the version a template would produce.
///
/// The `(pkgver, pkgrel)` pair of a template is unconditional on arch and
/// options, so one answer per package name is valid for the whole process.
/// Lookups may race from parallel workers; values are monotonic, so a
/// recomputed answer is always identical to the cached one.
pub struct TemplateVersionCache {
    distdir: PathBuf,
    source_repositories: Vec<String>,
    loader: Box<dyn TemplateLoader>,
    cache: Mutex<HashMap<String, (String, String)>>,
}

impl TemplateVersionCache {
    pub fn new(config: &BuilderConfig, loader: Box<dyn TemplateLoader>) -> Self {
        Self {
            distdir: config.distdir.clone(),
            source_repositories: config.source_repositories.clone(),
            loader,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `(version, full_pkgname)` for the template of `pkgn`.
    ///
    /// `(None, None)` means no template exists and the dependency can only
    /// come from a repository. `(None, Some(_))` means the template exists
    /// but does not determine a version, so version-constrained runtime
    /// dependencies against it cannot be honored.
    pub fn lookup(&self, pkgn: &str) -> Result<(Option<String>, Option<String>)> {
        if let Some((version, full)) = self.cache.lock().unwrap().get(pkgn) {
            return Ok((Some(version.clone()), Some(full.clone())));
        }

        let Some((dir, repo)) = self.find_template_dir(pkgn) else {
            return Ok((None, None));
        };

        let meta = self.loader.load(&dir, &repo)?;
        match (&meta.pkgver, meta.pkgrel) {
            (Some(pkgver), Some(pkgrel)) => {
                let version = format!("{}-r{}", pkgver, pkgrel);
                self.cache
                    .lock()
                    .unwrap()
                    .insert(pkgn.to_string(), (version.clone(), meta.full_pkgname.clone()));
                Ok((Some(version), Some(meta.full_pkgname)))
            }
            _ => Ok((None, Some(meta.full_pkgname))),
        }
    }

    fn find_template_dir(&self, pkgn: &str) -> Option<(PathBuf, String)> {
        if let Some(found) = self.probe_repositories(pkgn) {
            return Some(found);
        }
        // A dependency on an automatic subpackage is satisfied by the
        // template of the base package.
        let base = AUTO_SUBPACKAGE_SUFFIXES
            .iter()
            .find_map(|suffix| pkgn.strip_suffix(&format!("-{suffix}")[..]))?;
        self.probe_repositories(base)
    }

    fn probe_repositories(&self, pkgn: &str) -> Option<(PathBuf, String)> {
        self.source_repositories.iter().find_map(|repo| {
            let dir = self.distdir.join(repo).join(pkgn);
            dir.join("template.toml")
                .is_file()
                .then(|| (dir, repo.clone()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use crate::testutil::{test_config, write_template};

    #[test]
    fn loads_metadata_header() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        write_template(
            &config,
            "main",
            "foo",
            r#"
            pkgname = "foo"
            pkgver = "1.0"
            pkgrel = 0
            hostmakedepends = ["meson"]

            [[subpackages]]
            pkgname = "foo-devel"
            depends = ["foo"]
            "#,
        )?;

        let meta = TomlTemplateLoader.load(&config.distdir.join("main/foo"), "main")?;
        assert_eq!(meta.pkgname, "foo");
        assert_eq!(meta.full_pkgname, "main/foo");
        assert_eq!(meta.pkgver.as_deref(), Some("1.0"));
        assert_eq!(meta.subpackages[0].pkgname, "foo-devel");
        Ok(())
    }

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
    }

    impl TemplateLoader for CountingLoader {
        fn load(&self, dir: &Path, repo: &str) -> Result<TemplateMetadata> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            TomlTemplateLoader.load(dir, repo)
        }
    }

    #[test]
    fn lookup_is_memoized() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        write_template(
            &config,
            "main",
            "foo",
            r#"
            pkgname = "foo"
            pkgver = "2.0"
            pkgrel = 1
            "#,
        )?;

        let loads = Arc::new(AtomicUsize::new(0));
        let cache = TemplateVersionCache::new(
            &config,
            Box::new(CountingLoader {
                loads: loads.clone(),
            }),
        );

        let first = cache.lookup("foo")?;
        let second = cache.lookup("foo")?;
        assert_eq!(first, second);
        assert_eq!(
            first,
            (Some("2.0-r1".to_string()), Some("main/foo".to_string()))
        );
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn missing_template_is_external_only() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let cache = TemplateVersionCache::new(&config, Box::new(TomlTemplateLoader));
        assert_eq!(cache.lookup("no-such-package")?, (None, None));
        Ok(())
    }

    #[test]
    fn undetermined_version_keeps_full_name() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        write_template(
            &config,
            "main",
            "bar",
            r#"
            pkgname = "bar"
            pkgver = "1.0"
            "#,
        )?;

        let cache = TemplateVersionCache::new(&config, Box::new(TomlTemplateLoader));
        assert_eq!(cache.lookup("bar")?, (None, Some("main/bar".to_string())));
        Ok(())
    }

    #[test]
    fn auto_subpackage_suffix_falls_back_to_base() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        write_template(
            &config,
            "main",
            "foo",
            r#"
            pkgname = "foo"
            pkgver = "1.0"
            pkgrel = 0
            "#,
        )?;

        let cache = TemplateVersionCache::new(&config, Box::new(TomlTemplateLoader));
        assert_eq!(
            cache.lookup("foo-devel")?,
            (Some("1.0-r0".to_string()), Some("main/foo".to_string()))
        );
        Ok(())
    }

    #[test]
    fn probes_repositories_in_declared_order() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        write_template(
            &config,
            "contrib",
            "foo",
            r#"
            pkgname = "foo"
            pkgver = "9.9"
            pkgrel = 9
            "#,
        )?;
        write_template(
            &config,
            "main",
            "foo",
            r#"
            pkgname = "foo"
            pkgver = "1.0"
            pkgrel = 0
            "#,
        )?;

        // "main" is declared before "contrib", so its template wins.
        let cache = TemplateVersionCache::new(&config, Box::new(TomlTemplateLoader));
        assert_eq!(
            cache.lookup("foo")?,
            (Some("1.0-r0".to_string()), Some("main/foo".to_string()))
        );
        Ok(())
    }
}
