//! System image pipeline.
//!
//! Linear, no back edges:
//! stage directories, populate root (base image or bare), copy metadata,
//! mount pseudo filesystems, install packages, run commands, unmount,
//! FsGuard pass, packaging manifest, bundler.

use anyhow::Result;

use super::context::BuildContext;
use super::stage;
use crate::config::Config;
use crate::fsguard;
use crate::jail;
use crate::manifest::Manifest;
use crate::mount::PseudoFs;
use crate::process::Runner;
use crate::timing::Timer;

/// Build a system image into `ctx`.
pub fn build_system(runner: &Runner, config: &Config, manifest: &Manifest, ctx: &BuildContext) -> Result<()> {
    tracing::info!("Building system image {}", manifest.name);

    let t = Timer::start("Staging build directory");
    stage::stage_directories(runner, ctx)?;
    let base = manifest.base.trim();
    if base.is_empty() {
        tracing::info!("No base image, starting from an empty root");
    } else {
        stage::fetch_base(runner, base, ctx)?;
    }
    stage::stage_pseudo_dirs(runner, &ctx.root)?;
    stage::copy_metadata(runner, manifest, ctx)?;
    t.finish();

    populate_root(runner, manifest, ctx)?;

    if manifest.fsguard_enabled {
        let t = Timer::start("Generating FsGuard file list");
        fsguard::apply(runner, config, manifest, ctx)?;
        t.finish();
    }

    let t = Timer::start("Bundling image");
    stage::bundle(runner, config, manifest, ctx)?;
    t.finish();

    tracing::info!("System image {} complete", manifest.name);
    Ok(())
}

/// Install packages and run commands with the pseudo filesystems mounted.
///
/// On failure the mounts are released as the error propagates.
fn populate_root(runner: &Runner, manifest: &Manifest, ctx: &BuildContext) -> Result<()> {
    let pseudo = PseudoFs::mount(runner, &ctx.root)?;

    let t = Timer::start("Installing packages");
    jail::install_packages(runner, &manifest.packages, &ctx.root)?;
    t.finish();

    let t = Timer::start("Running commands");
    jail::execute_commands(runner, &manifest.commands, &ctx.root)?;
    t.finish();

    pseudo.unmount()
}
