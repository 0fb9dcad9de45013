// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use crate::config::BuilderConfig;
use crate::template::TemplateMetadata;

/// Where a build's output is targeted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Profile {
    pub arch: String,
    pub cross: bool,
    /// Target sysroot as seen inside the build root. `/` for native builds.
    pub sysroot: PathBuf,
}

impl Profile {
    pub fn native(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            cross: false,
            sysroot: PathBuf::from("/"),
        }
    }

    pub fn cross(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            cross: true,
            sysroot: PathBuf::from(format!("/usr/{}-linux-musl", arch)),
        }
    }
}

/// A secondary package produced from the same template as its parent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subpackage {
    pub pkgname: String,
    pub depends: Vec<String>,
}

/// Immutable description of one in-flight build request.
///
/// Constructed once per build and passed through the entire
/// resolve/install cycle.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub pkgname: String,
    /// Canonical `<repo>/<pkgname>` form.
    pub full_pkgname: String,
    /// Bootstrap phase index; stage 0 takes different install paths.
    pub stage: u32,
    pub profile: Profile,
    pub build_style: Option<String>,
    pub hostmakedepends: Vec<String>,
    pub makedepends: Vec<String>,
    pub checkdepends: Vec<String>,
    pub depends: Vec<String>,
    pub subpackages: Vec<Subpackage>,
    /// Whether the test suite runs, pulling in `checkdepends`.
    pub check: bool,
}

impl BuildContext {
    pub fn from_metadata(
        meta: &TemplateMetadata,
        stage: u32,
        profile: Profile,
        check: bool,
    ) -> Self {
        Self {
            pkgname: meta.pkgname.clone(),
            full_pkgname: meta.full_pkgname.clone(),
            stage,
            profile,
            build_style: meta.build_style.clone(),
            hostmakedepends: meta.hostmakedepends.clone(),
            makedepends: meta.makedepends.clone(),
            checkdepends: meta.checkdepends.clone(),
            depends: meta.depends.clone(),
            subpackages: meta
                .subpackages
                .iter()
                .map(|sp| Subpackage {
                    pkgname: sp.pkgname.clone(),
                    depends: sp.depends.clone(),
                })
                .collect(),
            check: check && !meta.options.iter().any(|o| o == "!check"),
        }
    }

    pub fn has_subpackage(&self, name: &str) -> bool {
        self.subpackages.iter().any(|sp| sp.pkgname == name)
    }
}

/// Facts about the environment the build root lives in.
#[derive(Clone, Debug)]
pub struct ChrootFacts {
    pub host_cpu: String,
    pub world_base: Vec<String>,
    pub depcheck: bool,
}

impl ChrootFacts {
    /// Captures environment facts for a build at the given stage.
    ///
    /// Stage 0 has no usable repository state yet, so dependency
    /// availability checking is off regardless of configuration.
    pub fn detect(config: &BuilderConfig, stage: u32) -> Self {
        Self {
            host_cpu: std::env::consts::ARCH.to_string(),
            world_base: config.world_base.clone(),
            depcheck: stage > 0 && config.depcheck,
        }
    }
}
