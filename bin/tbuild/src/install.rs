// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Converging the build environment onto a resolved package set.

use anyhow::Result;

use crate::apk::{CallOpts, PackageManager};
use crate::config::BuilderConfig;
use crate::context::{BuildContext, ChrootFacts};
use crate::error::BuildError;

/// Installs `pkglist` into the environment the build needs it in.
///
/// Stage 0 adds straight into the build root in user mode. A cross build's
/// target dependencies (`cross_target`) go into the target sysroot at the
/// target arch. Everything else goes through the world file: it is
/// rewritten from scratch as `world_base` plus `pkglist` and a `fix`
/// transaction converges the root, superseding whatever a previous build
/// left in the world.
pub fn install_from_repo(
    pm: &dyn PackageManager,
    ctx: &BuildContext,
    facts: &ChrootFacts,
    config: &BuilderConfig,
    pkglist: &[String],
    cross_target: bool,
) -> Result<()> {
    let allow_untrusted = config.signing_key().is_none();

    let ret = if ctx.stage == 0 {
        let args: Vec<String> = ["--usermode", "--no-scripts"]
            .iter()
            .map(|s| s.to_string())
            .chain(pkglist.iter().cloned())
            .collect();
        pm.call(
            "add",
            &args,
            &CallOpts {
                root: Some(&config.bldroot),
                allow_untrusted,
                ..Default::default()
            },
        )?
    } else if cross_target && ctx.profile.cross {
        let args: Vec<String> = ["--no-scripts"]
            .iter()
            .map(|s| s.to_string())
            .chain(pkglist.iter().cloned())
            .collect();
        pm.call_chroot(
            "add",
            &args,
            &CallOpts {
                root: Some(&ctx.profile.sysroot),
                arch: Some(&ctx.profile.arch),
                allow_untrusted,
                ..Default::default()
            },
        )?
    } else {
        let mut world = String::new();
        for pkg in facts.world_base.iter().chain(pkglist.iter()) {
            world.push_str(pkg);
            world.push('\n');
        }
        fileutil::write_atomic(&config.bldroot.join("etc/apk/world"), world.as_bytes())?;
        pm.call_chroot(
            "fix",
            &[],
            &CallOpts {
                allow_untrusted,
                ..Default::default()
            },
        )?
    };

    if !ret.success() {
        let stderr = ret.stderr.trim();
        let stdout = ret.stdout.trim();
        if !stderr.is_empty() {
            tracing::error!(">> stderr:");
            tracing::error!("{}", stderr);
        }
        if !stdout.is_empty() {
            tracing::error!(">> stdout:");
            tracing::error!("{}", stdout);
        }
        return Err(BuildError::InstallFailed.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::context::Profile;
    use crate::template::{TemplateLoader, TomlTemplateLoader};
    use crate::testutil::{test_config, write_template, FakeApk};

    fn context_for(
        config: &BuilderConfig,
        stage: u32,
        profile: Profile,
    ) -> Result<BuildContext> {
        write_template(
            config,
            "main",
            "sample",
            r#"
            pkgname = "sample"
            pkgver = "1.0"
            pkgrel = 0
            "#,
        )?;
        let meta = TomlTemplateLoader.load(&config.distdir.join("main/sample"), "main")?;
        Ok(BuildContext::from_metadata(&meta, stage, profile, false))
    }

    fn pkgs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn stage0_adds_in_usermode() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let facts = ChrootFacts::detect(&config, 0);
        let ctx = context_for(&config, 0, Profile::native("x86_64"))?;
        let pm = FakeApk::new(&[]);

        install_from_repo(&pm, &ctx, &facts, &config, &pkgs(&["foo=1.0-r0"]), false)?;

        let calls = pm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, "add");
        assert!(!calls[0].chroot);
        assert_eq!(
            calls[0].args,
            pkgs(&["--usermode", "--no-scripts", "foo=1.0-r0"])
        );
        assert_eq!(calls[0].root.as_deref(), Some(config.bldroot.as_path()));
        // No signing key is configured, so the install runs untrusted.
        assert!(calls[0].allow_untrusted);
        Ok(())
    }

    #[test]
    fn native_install_rewrites_world_and_fixes() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let facts = ChrootFacts::detect(&config, 1);
        let ctx = context_for(&config, 1, Profile::native("x86_64"))?;
        let pm = FakeApk::new(&[]);

        install_from_repo(
            &pm,
            &ctx,
            &facts,
            &config,
            &pkgs(&["bar=2.0-r1", "foo=1.0-r0"]),
            false,
        )?;

        let world = std::fs::read_to_string(config.bldroot.join("etc/apk/world"))?;
        assert_eq!(world, "base-chroot\nbar=2.0-r1\nfoo=1.0-r0\n");

        let calls = pm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, "fix");
        assert!(calls[0].chroot);
        assert!(calls[0].args.is_empty());
        Ok(())
    }

    #[test]
    fn empty_install_resets_world_to_base() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let facts = ChrootFacts::detect(&config, 1);
        let ctx = context_for(&config, 1, Profile::native("x86_64"))?;
        let pm = FakeApk::new(&[]);

        // A stale world from a previous build is superseded entirely.
        std::fs::create_dir_all(config.bldroot.join("etc/apk"))?;
        std::fs::write(
            config.bldroot.join("etc/apk/world"),
            "base-chroot\nstale=9.9-r9\n",
        )?;

        install_from_repo(&pm, &ctx, &facts, &config, &[], false)?;

        let world = std::fs::read_to_string(config.bldroot.join("etc/apk/world"))?;
        assert_eq!(world, "base-chroot\n");
        Ok(())
    }

    #[test]
    fn cross_target_adds_into_sysroot_at_target_arch() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let facts = ChrootFacts::detect(&config, 1);
        let ctx = context_for(&config, 1, Profile::cross("aarch64"))?;
        let pm = FakeApk::new(&[]);

        install_from_repo(&pm, &ctx, &facts, &config, &pkgs(&["libY=1.0-r0"]), true)?;

        let calls = pm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].verb, "add");
        assert!(calls[0].chroot);
        assert_eq!(calls[0].arch.as_deref(), Some("aarch64"));
        assert_eq!(
            calls[0].root.as_deref(),
            Some(ctx.profile.sysroot.as_path())
        );
        assert_eq!(calls[0].args, pkgs(&["--no-scripts", "libY=1.0-r0"]));
        Ok(())
    }

    #[test]
    fn failed_transaction_is_fatal() -> Result<()> {
        let root = tempfile::tempdir()?;
        let config = test_config(root.path());
        let facts = ChrootFacts::detect(&config, 1);
        let ctx = context_for(&config, 1, Profile::native("x86_64"))?;
        let pm = FakeApk::new(&[]);
        pm.fail_verb("fix", 1, "ERROR: unable to select packages", "");

        let err =
            install_from_repo(&pm, &ctx, &facts, &config, &pkgs(&["foo=1.0-r0"]), false)
                .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InstallFailed)
        ));
        Ok(())
    }
}
