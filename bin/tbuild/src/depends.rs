// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Dependency planning and recursive build orchestration.
//!
//! The planner partitions a template's declared dependencies into host,
//! target and runtime sets, decides for each whether a repository already
//! satisfies it, and collects the templates that must be built first. The
//! orchestrator then runs those builds and converges the build environment
//! onto the resolved set.

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::apk::PackageManager;
use crate::atom::{is_runtime, pkg_match, resolve_virtual, split_atom, VersionOp};
use crate::bootstrap::{ensure_apk_static, Fetcher};
use crate::config::BuilderConfig;
use crate::context::{BuildContext, ChrootFacts};
use crate::error::{BuildError, DepScope};
use crate::install::install_from_repo;
use crate::locks::Locks;
use crate::resolver::{is_available, query_versions, RepoSnapshot};
use crate::template::TemplateVersionCache;

/// Outcome of one child build.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildStatus {
    Built,
    /// The child declined to build; the parent carries on without it.
    Skipped,
}

/// Everything a child build inherits from its parent.
#[derive(Clone, Debug)]
pub struct ChildRequest {
    pub step: String,
    pub full_pkgname: String,
    pub arch: Option<String>,
    pub chost: bool,
    /// Suppress the repository index refresh; only the first child of a
    /// planner invocation refreshes it.
    pub no_update: bool,
    pub update_check: bool,
}

/// The recursion seam: builds one template from source.
pub trait Builder: Send + Sync {
    fn build(&self, request: &ChildRequest) -> Result<BuildStatus>;
}

/// A dependency as declared by the template, with the version its own
/// template would produce (when one exists).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceDep {
    pub version: Option<String>,
    pub name: String,
    pub full_name: Option<String>,
}

/// Classified dependency input of one template.
#[derive(Clone, Debug, Default)]
pub struct DependInput {
    pub host: Vec<SourceDep>,
    pub target: Vec<SourceDep>,
    /// Runtime dependencies as `(origin, dep)`; the origin is the package
    /// or subpackage that declared it.
    pub runtime: Vec<(String, String)>,
}

impl DependInput {
    pub fn is_empty(&self) -> bool {
        self.host.is_empty() && self.target.is_empty() && self.runtime.is_empty()
    }
}

/// What the scan decided: templates to build and pinned packages to install.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub host_missing: Vec<String>,
    pub target_missing: Vec<String>,
    pub host_binpkg: Vec<String>,
    pub target_binpkg: Vec<String>,
    pub events: Vec<String>,
}

/// Drives dependency resolution and installation for one build request.
pub struct DependencyPlanner<'a> {
    pm: &'a dyn PackageManager,
    builder: &'a dyn Builder,
    cache: &'a TemplateVersionCache,
    facts: &'a ChrootFacts,
    config: &'a BuilderConfig,
    locks: &'a Locks,
    fetcher: &'a dyn Fetcher,
}

impl<'a> DependencyPlanner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pm: &'a dyn PackageManager,
        builder: &'a dyn Builder,
        cache: &'a TemplateVersionCache,
        facts: &'a ChrootFacts,
        config: &'a BuilderConfig,
        locks: &'a Locks,
        fetcher: &'a dyn Fetcher,
    ) -> Self {
        Self {
            pm,
            builder,
            cache,
            facts,
            config,
            locks,
            fetcher,
        }
    }

    /// Classifies the template's declared dependencies.
    ///
    /// Conflict markers (`!name`) are dropped, virtual atoms are rewritten
    /// to their declared providers, and a bare runtime name is normalized
    /// to `name>=0`. With `only_names` no template versions are resolved
    /// and only the raw names are returned.
    pub fn setup_depends(&self, ctx: &BuildContext, only_names: bool) -> Result<DependInput> {
        let mut input = DependInput::default();

        let mut crdeps: Vec<(String, String)> = ctx
            .depends
            .iter()
            .map(|dep| (ctx.pkgname.clone(), dep.clone()))
            .collect();
        for sp in &ctx.subpackages {
            for dep in &sp.depends {
                crdeps.push((sp.pkgname.clone(), dep.clone()));
            }
        }

        for (origin, dep) in crdeps {
            if dep.starts_with('!') {
                continue;
            }
            let dep = if is_runtime(&dep) {
                dep
            } else {
                resolve_virtual(&dep)?
            };
            let atom = split_atom(&dep)?;
            if only_names {
                input.runtime.push((origin, atom.name));
            } else if atom.constraint.is_none() {
                input.runtime.push((origin, format!("{}>=0", atom.name)));
            } else {
                input.runtime.push((origin, dep));
            }
        }

        let cdeps: &[String] = if !ctx.profile.cross && ctx.check {
            &ctx.checkdepends
        } else {
            &[]
        };

        let host_names = ctx.hostmakedepends.iter().chain(cdeps.iter());
        if only_names {
            input.host = host_names
                .map(|name| SourceDep {
                    version: None,
                    name: name.clone(),
                    full_name: None,
                })
                .collect();
            input.target = ctx
                .makedepends
                .iter()
                .map(|name| SourceDep {
                    version: None,
                    name: name.clone(),
                    full_name: None,
                })
                .collect();
            return Ok(input);
        }

        // Stage 0 installs host tools from the outer system, so their
        // templates are not consulted.
        if ctx.stage > 0 {
            for name in host_names {
                input.host.push(self.source_dep(name)?);
            }
        }
        for name in &ctx.makedepends {
            input.target.push(self.source_dep(name)?);
        }

        Ok(input)
    }

    fn source_dep(&self, name: &str) -> Result<SourceDep> {
        let (version, full_name) = self.cache.lookup(name)?;
        Ok(SourceDep {
            version,
            name: name.to_string(),
            full_name,
        })
    }

    /// Scans the input against the current repository state.
    pub fn plan(&self, ctx: &BuildContext, origpkg: &str, input: &DependInput) -> Result<Plan> {
        let cross = ctx.profile.cross;
        let tarch = ctx.profile.arch.as_str();
        let chost = self.facts.host_cpu.as_str();

        let hsys = self.config.bldroot.clone();
        let tsys = if cross {
            let sysroot = &ctx.profile.sysroot;
            hsys.join(sysroot.strip_prefix("/").unwrap_or(sysroot))
        } else {
            hsys.clone()
        };

        let host_names: Vec<String> = input.host.iter().map(|d| d.name.clone()).collect();
        let (hvers, hrepos) =
            query_versions(self.pm, &host_names, &hsys, None, self.locks, chost)?;

        let target_names: Vec<String> = input.target.iter().map(|d| d.name.clone()).collect();
        let (tvers, trepos) = query_versions(
            self.pm,
            &target_names,
            &tsys,
            Some(tarch),
            self.locks,
            chost,
        )?;

        let runtime_names: Vec<String> = input
            .runtime
            .iter()
            .filter_map(|(_, dep)| split_atom(dep).ok().map(|atom| atom.name))
            .collect();
        let (rvers, rrepos) = query_versions(
            self.pm,
            &runtime_names,
            &tsys,
            Some(tarch),
            self.locks,
            chost,
        )?;

        let mut plan = Plan::default();

        self.scan_source_deps(
            ctx,
            origpkg,
            DepScope::Host,
            &input.host,
            &hvers,
            hrepos.as_deref(),
            &hsys,
            None,
            &mut plan,
        )?;
        self.scan_source_deps(
            ctx,
            origpkg,
            DepScope::Target,
            &input.target,
            &tvers,
            trepos.as_deref(),
            &tsys,
            Some(tarch),
            &mut plan,
        )?;
        self.scan_runtime_deps(
            ctx,
            origpkg,
            &input.runtime,
            &rvers,
            rrepos.as_deref(),
            &tsys,
            Some(tarch),
            &mut plan,
        )?;

        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_source_deps(
        &self,
        ctx: &BuildContext,
        origpkg: &str,
        scope: DepScope,
        deps: &[SourceDep],
        snapshot: &RepoSnapshot,
        repos: Option<&[String]>,
        root: &std::path::Path,
        arch: Option<&str>,
        plan: &mut Plan,
    ) -> Result<()> {
        let cross = ctx.profile.cross;
        let (binpkg, missing) = match scope {
            DepScope::Host => (&mut plan.host_binpkg, &mut plan.host_missing),
            DepScope::Target => (&mut plan.target_binpkg, &mut plan.target_missing),
            DepScope::Runtime => unreachable!("runtime deps have their own scan"),
        };

        for dep in deps {
            if !self.facts.depcheck {
                binpkg.push(dep.name.clone());
                continue;
            }

            let constraint = dep
                .version
                .as_deref()
                .map(|ver| (VersionOp::Equal, ver));
            let found = is_available(
                self.pm,
                &dep.name,
                constraint,
                snapshot,
                repos,
                root,
                arch,
                self.locks,
                &self.facts.host_cpu,
            )?;
            if let Some(aver) = found {
                log_event(
                    &mut plan.events,
                    format!("[{scope}] {}: found ({aver})", dep.name),
                );
                binpkg.push(format!("{}={}", dep.name, aver));
                continue;
            }

            let Some(sver) = &dep.version else {
                log_event(
                    &mut plan.events,
                    format!("[{scope}] {}: unresolved build dependency", dep.name),
                );
                return Err(BuildError::MissingDependency {
                    scope,
                    name: dep.name.clone(),
                }
                .into());
            };
            log_event(&mut plan.events, format!("[{scope}] {}: not found", dep.name));

            // The host graph cannot loop onto the current build unless a
            // cross toolchain separates the two sides.
            let loops = dep.name == origpkg || dep.name == ctx.pkgname;
            if loops && (scope == DepScope::Target || !cross) {
                return Err(BuildError::LoopDetected {
                    scope,
                    name: dep.name.clone(),
                    origin: origpkg.to_string(),
                }
                .into());
            }

            let full = dep
                .full_name
                .clone()
                .context("resolved dependency lost its template name")?;
            missing.push(full);
            binpkg.push(format!("{}={}", dep.name, sver));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_runtime_deps(
        &self,
        ctx: &BuildContext,
        origpkg: &str,
        deps: &[(String, String)],
        snapshot: &RepoSnapshot,
        repos: Option<&[String]>,
        root: &std::path::Path,
        arch: Option<&str>,
        plan: &mut Plan,
    ) -> Result<()> {
        for (origin, dep) in deps {
            if !self.facts.depcheck {
                continue;
            }
            let atom = split_atom(dep)
                .map_err(|_| BuildError::config(format!("invalid runtime dependency: {dep}")))?;
            let name = atom.name.as_str();

            if name != origin.as_str() {
                // A subpackage pulling in its parent or a sibling is
                // satisfied by this very build.
                if name == ctx.pkgname || ctx.has_subpackage(name) {
                    log_event(&mut plan.events, format!("[runtime] {dep}: subpackage (ignored)"));
                    continue;
                }
            } else {
                return Err(BuildError::LoopDetected {
                    scope: DepScope::Runtime,
                    name: name.to_string(),
                    origin: name.to_string(),
                }
                .into());
            }
            // A dependency build must not depend on whatever requested it.
            if name == origpkg && ctx.pkgname != origpkg {
                return Err(BuildError::LoopDetected {
                    scope: DepScope::Runtime,
                    name: name.to_string(),
                    origin: name.to_string(),
                }
                .into());
            }

            let constraint = atom
                .constraint
                .as_ref()
                .map(|(op, ver)| (*op, ver.as_str()));
            let found = is_available(
                self.pm,
                name,
                constraint,
                snapshot,
                repos,
                root,
                arch,
                self.locks,
                &self.facts.host_cpu,
            )?;
            if let Some(aver) = found {
                log_event(&mut plan.events, format!("[runtime] {dep}: found ({aver})"));
                continue;
            }
            log_event(&mut plan.events, format!("[runtime] {dep}: not found"));

            let (rdv, full_name) = self.cache.lookup(name)?;
            let full_name = match full_name {
                Some(full) if !(atom.constraint.is_some() && rdv.is_none()) => full,
                _ => {
                    return Err(BuildError::UnresolvedTemplate {
                        name: name.to_string(),
                    }
                    .into())
                }
            };
            if let (Some((op, ver)), Some(rdv)) = (&atom.constraint, &rdv) {
                let found = format!("{name}-{rdv}");
                let requirement = format!("{name}{}{ver}", op.as_ref());
                // Refuse to start a build that can never satisfy the
                // constraint.
                if !pkg_match(&found, &requirement) {
                    return Err(BuildError::Unsatisfiable { found, requirement }.into());
                }
            }
            // Runtime dependencies are verified and built, never
            // pre-installed into the build environment.
            plan.target_missing.push(full_name);
        }
        Ok(())
    }

    /// Resolves, builds and installs everything the template needs.
    ///
    /// Returns whether any child build ran.
    pub fn install(
        &self,
        ctx: &BuildContext,
        origpkg: &str,
        step: &str,
        hostdep: bool,
        update_check: bool,
    ) -> Result<bool> {
        let style = ctx
            .build_style
            .as_deref()
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        let tarch = ctx.profile.arch.clone();
        let cross = ctx.profile.cross;
        if ctx.pkgname != origpkg {
            tracing::info!(
                "building{style} (dependency of {origpkg}) for {tarch}...",
            );
        } else {
            tracing::info!("building{style} for {tarch}...");
        }

        if ctx.stage > 0 {
            ensure_apk_static(self.pm, self.config, self.facts, self.fetcher)
                .context("failed to ensure apk-tools-static")?;
        }

        let mut input = self.setup_depends(ctx, false)?;
        if cross {
            input.host.push(self.source_dep(&format!("base-cross-{tarch}"))?);
        }

        let chost = self.facts.host_cpu.clone();

        if input.is_empty() {
            let _lock = self.locks.lock(&chost)?;
            install_from_repo(self.pm, ctx, self.facts, self.config, &[], false)?;
            return Ok(false);
        }

        let plan = self.plan(ctx, origpkg, &input)?;

        let mut missing = false;
        for (scope_missing, child_arch, child_chost) in [
            (&plan.host_missing, &chost, hostdep || cross),
            (&plan.target_missing, &tarch, hostdep),
        ] {
            for full_pkgname in scope_missing {
                let request = ChildRequest {
                    step: step.to_string(),
                    full_pkgname: full_pkgname.clone(),
                    arch: (ctx.stage > 0).then(|| child_arch.clone()),
                    chost: child_chost,
                    no_update: !missing,
                    update_check,
                };
                match self.builder.build(&request)? {
                    BuildStatus::Built => missing = true,
                    BuildStatus::Skipped => {}
                }
            }
        }

        if !plan.host_binpkg.is_empty() || (!plan.target_binpkg.is_empty() && !cross) {
            let native_target = if cross { &[][..] } else { &plan.target_binpkg[..] };
            let merged: Vec<String> = plan
                .host_binpkg
                .iter()
                .chain(native_target.iter())
                .cloned()
                .sorted()
                .dedup()
                .collect();
            let kind = if cross { "host" } else { "build" };
            tracing::info!("installing {} dependencies: {}", kind, merged.join(", "));
            let _lock = self.locks.lock(&chost)?;
            install_from_repo(self.pm, ctx, self.facts, self.config, &merged, false)?;
        } else {
            let _lock = self.locks.lock(&chost)?;
            install_from_repo(self.pm, ctx, self.facts, self.config, &[], false)?;
        }

        if !plan.target_binpkg.is_empty() && cross {
            tracing::info!(
                "installing target dependencies: {}",
                plan.target_binpkg.join(", ")
            );
            let _lock = self.locks.lock(&tarch)?;
            install_from_repo(
                self.pm,
                ctx,
                self.facts,
                self.config,
                &plan.target_binpkg,
                true,
            )?;
        }

        Ok(missing)
    }
}

fn log_event(events: &mut Vec<String>, event: String) {
    tracing::info!("  {}", event);
    events.push(event);
}
