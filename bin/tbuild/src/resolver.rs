// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Repository queries and availability resolution.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;

use crate::apk::{CallOpts, PackageManager};
use crate::atom::{pkg_match, split_namever, VersionOp};
use crate::locks::Locks;

/// Versions currently offered per package name, in append order: entries
/// from lower-priority repositories come last.
pub type RepoSnapshot = HashMap<String, Vec<String>>;

fn search_args(names: &[String]) -> Vec<String> {
    let mut args: Vec<String> = ["--from", "none", "-e", "-a"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(names.iter().cloned());
    args
}

/// Queries the repositories for the available versions of `names`.
///
/// Returns the snapshot together with the consulted repository list in
/// priority order. An empty `names` performs no I/O at all. The package
/// manager signals "nothing found for any name" through an exit code of at
/// least the number of names; that case yields an empty snapshot.
pub fn query_versions(
    pm: &dyn PackageManager,
    names: &[String],
    root: &Path,
    arch: Option<&str>,
    locks: &Locks,
    host_cpu: &str,
) -> Result<(RepoSnapshot, Option<Vec<String>>)> {
    if names.is_empty() {
        return Ok((RepoSnapshot::new(), None));
    }

    let out = {
        let _lock = locks.lock(arch.unwrap_or(host_cpu))?;
        pm.call(
            "search",
            &search_args(names),
            &CallOpts {
                root: Some(root),
                arch,
                allow_untrusted: true,
                return_repos: true,
                ..Default::default()
            },
        )?
    };
    if out.code >= names.len() as i32 {
        return Ok((RepoSnapshot::new(), None));
    }

    let mut snapshot = RepoSnapshot::new();
    for line in out.stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((name, ver)) = split_namever(line) {
            snapshot
                .entry(name.to_string())
                .or_default()
                .push(ver.to_string());
        }
    }
    Ok((snapshot, out.repos))
}

/// Decides whether a repository already satisfies `name` under the given
/// constraint, returning the version that would be installed.
///
/// With several candidate versions the repositories are re-queried one by
/// one in priority order and the first repository returning any hit is
/// authoritative: a higher-priority repository whose best version does not
/// satisfy the constraint masks satisfying versions in lower-priority ones.
#[allow(clippy::too_many_arguments)]
pub fn is_available(
    pm: &dyn PackageManager,
    name: &str,
    constraint: Option<(VersionOp, &str)>,
    snapshot: &RepoSnapshot,
    repos: Option<&[String]>,
    root: &Path,
    arch: Option<&str>,
    locks: &Locks,
    host_cpu: &str,
) -> Result<Option<String>> {
    let Some(pvers) = snapshot.get(name) else {
        return Ok(None);
    };

    // Without a constraint the latest entry is what the package manager
    // would install.
    let Some((op, reqver)) = constraint else {
        return Ok(pvers.last().cloned());
    };
    let pattern = format!("{}{}{}", name, op.as_ref(), reqver);

    if !pvers
        .iter()
        .rev()
        .any(|ver| pkg_match(&format!("{name}-{ver}"), &pattern))
    {
        return Ok(None);
    }

    // A single version cannot be ambiguous.
    if pvers.len() == 1 {
        return Ok(Some(pvers[0].clone()));
    }

    let Some(repos) = repos else {
        return Ok(None);
    };

    let _lock = locks.lock(arch.unwrap_or(host_cpu))?;
    for repo in repos {
        let args: Vec<String> = ["--from", "none", "--repository", repo, "-e", "-a", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = pm.call(
            "search",
            &args,
            &CallOpts {
                root: Some(root),
                arch,
                allow_untrusted: true,
                skip_repositories: true,
                ..Default::default()
            },
        )?;
        let stdout = out.stdout.trim();
        if stdout.is_empty() {
            continue;
        }
        let Some(first) = stdout.lines().next() else {
            continue;
        };
        // The highest-priority repository with a hit takes all.
        if pkg_match(first, &pattern) {
            return Ok(split_namever(first).map(|(_, ver)| ver.to_string()));
        }
        return Ok(None);
    }

    Ok(None)
}
