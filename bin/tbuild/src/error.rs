// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::{self, Display};

use thiserror::Error;

/// The dependency graph a diagnostic refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DepScope {
    Host,
    Target,
    Runtime,
}

impl Display for DepScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepScope::Host => write!(f, "host"),
            DepScope::Target => write!(f, "target"),
            DepScope::Runtime => write!(f, "runtime"),
        }
    }
}

/// Fatal conditions raised while resolving or installing dependencies.
///
/// None of these are retried; each terminates the current top-level build.
/// A skipped child build is not an error, see
/// [`BuildStatus`](crate::depends::BuildStatus).
#[derive(Debug, Error)]
pub enum BuildError {
    /// A user-addressable mistake in a template or configuration.
    #[error("{message}")]
    Config {
        message: String,
        hint: Option<String>,
    },

    /// A build that directly or transitively depends on itself.
    #[error("[{scope}] build loop detected: {name} <-> {origin}")]
    LoopDetected {
        scope: DepScope,
        name: String,
        origin: String,
    },

    /// A host or target dependency with no repository match and no template.
    #[error("{scope} dependency '{name}' does not exist")]
    MissingDependency { scope: DepScope, name: String },

    /// A runtime dependency whose template cannot be located or versioned.
    #[error("template '{name}' cannot be resolved")]
    UnresolvedTemplate { name: String },

    /// The template version can never satisfy the declared constraint.
    #[error("version {found} does not match dependency {requirement}")]
    Unsatisfiable { found: String, requirement: String },

    /// The package manager reported a failed transaction.
    #[error("failed to install dependencies")]
    InstallFailed,

    /// Fetching or staging the static package manager failed.
    #[error("failed to set up static package manager from {url}: {source:#}")]
    Bootstrap { url: String, source: anyhow::Error },
}

impl BuildError {
    pub fn config(message: impl Into<String>) -> Self {
        BuildError::Config {
            message: message.into(),
            hint: None,
        }
    }

    pub fn config_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        BuildError::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}
