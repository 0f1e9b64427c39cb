//! Build command - builds an image from a manifest.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::build::{self, BuildContext, BuildLock};
use crate::config::Config;
use crate::manifest::Manifest;
use crate::process::{Cmd, Runner};
use crate::timing::Timer;

/// Options for `shardimg build`.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub manifest: PathBuf,
    pub build_dir: PathBuf,
    /// Keep the build directory after a successful build
    pub keep: bool,
}

/// Execute the build command with real processes.
///
/// `interrupted` is raised by the signal handler; the build then unwinds
/// through its mount and container cleanup.
pub fn cmd_build(config: &Config, options: &BuildOptions, interrupted: Arc<AtomicBool>) -> Result<()> {
    let runner = Runner::new(config).with_interrupt(interrupted);
    build_with(&runner, config, options)
}

/// Execute the build command through `runner`.
///
/// A failed build leaves the build directory in place for inspection.
pub fn build_with(runner: &Runner, config: &Config, options: &BuildOptions) -> Result<()> {
    let manifest = Manifest::load(&options.manifest)?;
    manifest.print();

    let ctx = BuildContext::new(&options.build_dir)?.with_manifest_file(&options.manifest);

    // A dry run touches nothing, the lock file included
    let lock = if runner.is_dry_run() {
        tracing::info!("Dry run: not locking {}", ctx.build_dir.display());
        None
    } else {
        Some(BuildLock::acquire(&ctx.lock_file())?)
    };
    let timer = Timer::start(&format!("Building {} image {}", manifest.image_type, manifest.name));
    build::build_image(runner, config, &manifest, &ctx)?;
    timer.finish();
    drop(lock);

    if options.keep {
        tracing::info!("Keeping build directory {}", ctx.build_dir.display());
    } else {
        remove_build_dir(runner, &ctx.build_dir)?;
    }
    Ok(())
}

/// The tree holds root-owned files from extraction and dracut.
fn remove_build_dir(runner: &Runner, build_dir: &Path) -> Result<()> {
    runner.run(
        Cmd::new("rm")
            .arg("-rf")
            .arg_path(build_dir)
            .elevated()
            .allow_fail()
            .description(format!("Removing build directory {}", build_dir.display())),
    )?;
    Ok(())
}
