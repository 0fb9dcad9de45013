// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_true() -> bool {
    true
}

fn default_apk_command() -> PathBuf {
    PathBuf::from("apk")
}

fn default_bootstrap_repository() -> String {
    "https://repo.chimera-linux.org/current/main".to_string()
}

fn default_bootstrap_version() -> String {
    "3.0.3-r0".to_string()
}

/// Where the static package-manager archive is fetched from.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    #[serde(default = "default_bootstrap_repository")]
    pub repository: String,
    #[serde(default = "default_bootstrap_version")]
    pub version: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            repository: default_bootstrap_repository(),
            version: default_bootstrap_version(),
        }
    }
}

/// Builder configuration, loaded from `tbuild.toml`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuilderConfig {
    /// Directory containing the source repositories (template trees).
    pub distdir: PathBuf,

    /// The build root the package manager converges.
    pub bldroot: PathBuf,

    /// Directory for lock files and other builder state.
    pub statedir: PathBuf,

    /// Source repository names under `distdir`, in probe order.
    pub source_repositories: Vec<String>,

    /// Binary repository URIs in decreasing priority order.
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Packages every world starts from.
    #[serde(default)]
    pub world_base: Vec<String>,

    /// Signing key; its absence makes installs run untrusted.
    #[serde(default)]
    pub signing_key: Option<PathBuf>,

    /// The package-manager executable used until a static one is staged.
    #[serde(default = "default_apk_command")]
    pub apk_command: PathBuf,

    /// Whether dependency availability is verified against repositories.
    #[serde(default = "default_true")]
    pub depcheck: bool,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl BuilderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn signing_key(&self) -> Option<&Path> {
        self.signing_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parses_minimal_config() -> Result<()> {
        let config: BuilderConfig = toml::from_str(
            r#"
            distdir = "/var/lib/tbuild/ports"
            bldroot = "/var/lib/tbuild/bldroot"
            statedir = "/var/lib/tbuild/state"
            source_repositories = ["main", "contrib"]
            repositories = ["https://repo.example.org/high", "https://repo.example.org/low"]
            world_base = ["base-chroot"]
            "#,
        )?;
        assert_eq!(config.source_repositories, vec!["main", "contrib"]);
        assert_eq!(config.apk_command, PathBuf::from("apk"));
        assert!(config.depcheck);
        assert!(config.signing_key.is_none());
        assert_eq!(config.bootstrap.version, "3.0.3-r0");
        Ok(())
    }

    #[test]
    fn rejects_unknown_keys() {
        let result: std::result::Result<BuilderConfig, _> = toml::from_str(
            r#"
            distdir = "/d"
            bldroot = "/b"
            statedir = "/s"
            source_repositories = []
            unknown_key = true
            "#,
        );
        assert!(result.is_err());
    }
}
