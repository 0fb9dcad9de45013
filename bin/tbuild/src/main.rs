// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use tbuild::apk::Apk;
use tbuild::bootstrap::{ensure_apk_static, HttpFetcher};
use tbuild::config::BuilderConfig;
use tbuild::context::{BuildContext, ChrootFacts, Profile};
use tbuild::depends::{BuildStatus, Builder, ChildRequest, DependencyPlanner};
use tbuild::error::BuildError;
use tbuild::locks::Locks;
use tbuild::template::{load_template, TemplateVersionCache, TomlTemplateLoader};

#[derive(Parser)]
#[command(
    name = "tbuild",
    about = "Resolve and install build dependencies for templates"
)]
struct Cli {
    /// Builder configuration file.
    #[arg(long, default_value = "tbuild.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a template's dependencies and converge the build root.
    Deps {
        /// Template to resolve, as `<repo>/<pkgname>`.
        template: String,

        /// Bootstrap stage of the build.
        #[arg(long, default_value_t = 1)]
        stage: u32,

        /// Target architecture; defaults to the host CPU.
        #[arg(long)]
        arch: Option<String>,

        /// Cross-compile into the target sysroot.
        #[arg(long)]
        cross: bool,

        /// Include checkdepends as if the test suite were to run.
        #[arg(long)]
        check: bool,

        /// Print the declared dependency names and exit.
        #[arg(long)]
        only_names: bool,

        /// Report the resolution plan without building or installing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Stage the static package manager into the build root.
    Bootstrap,
}

/// Stands in for the out-of-tree package build step: reports which
/// templates a real driver would build from source.
struct ReportingBuilder;

impl Builder for ReportingBuilder {
    fn build(&self, request: &ChildRequest) -> Result<BuildStatus> {
        tracing::info!("=> would build {} from source", request.full_pkgname);
        Ok(BuildStatus::Built)
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = BuilderConfig::load(&cli.config)?;
    let apk = Apk::new(&config);
    let locks = Locks::new(&config.statedir);

    match cli.command {
        Command::Bootstrap => {
            let facts = ChrootFacts::detect(&config, 1);
            ensure_apk_static(&apk, &config, &facts, &HttpFetcher)
        }
        Command::Deps {
            template,
            stage,
            arch,
            cross,
            check,
            only_names,
            dry_run,
        } => {
            let facts = ChrootFacts::detect(&config, stage);
            let arch = arch.unwrap_or_else(|| facts.host_cpu.clone());
            let profile = if cross {
                Profile::cross(&arch)
            } else {
                Profile::native(&arch)
            };

            let meta = load_template(&TomlTemplateLoader, &config, &template)?;
            let ctx = BuildContext::from_metadata(&meta, stage, profile, check);
            let cache = TemplateVersionCache::new(&config, Box::new(TomlTemplateLoader));
            let builder = ReportingBuilder;
            let planner = DependencyPlanner::new(
                &apk,
                &builder,
                &cache,
                &facts,
                &config,
                &locks,
                &HttpFetcher,
            );

            if only_names {
                let input = planner.setup_depends(&ctx, true)?;
                for dep in &input.host {
                    println!("host: {}", dep.name);
                }
                for dep in &input.target {
                    println!("target: {}", dep.name);
                }
                for (origin, name) in &input.runtime {
                    println!("runtime: {} (from {})", name, origin);
                }
                return Ok(());
            }

            if dry_run {
                let input = planner.setup_depends(&ctx, false)?;
                let plan = planner.plan(&ctx, &ctx.pkgname, &input)?;
                for event in &plan.events {
                    println!("{event}");
                }
                for full in plan.host_missing.iter().chain(&plan.target_missing) {
                    println!("missing: {full}");
                }
                return Ok(());
            }

            let origpkg = ctx.pkgname.clone();
            let missing = planner.install(&ctx, &origpkg, "deps", false, false)?;
            if missing {
                tracing::info!("dependencies of {} required sub-builds", ctx.pkgname);
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("FATAL: tbuild: {:#}", error);
            if let Some(BuildError::Config {
                hint: Some(hint), ..
            }) = error.downcast_ref::<BuildError>()
            {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}
