//! Stages shared by the system and boot pipelines.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::context::{BuildContext, PSEUDO_DIRS};
use crate::common::paths::random_name;
use crate::common::{copy_directory, create_directory, delete_file, read_file, write_file};
use crate::config::Config;
use crate::manifest::Manifest;
use crate::packaging::{self, PackagingManifest};
use crate::process::{Cmd, Runner};

/// Length of throwaway container names.
const CONTAINER_NAME_LEN: usize = 10;

/// Create the fixed build directory layout (parents included).
pub fn stage_directories(runner: &Runner, ctx: &BuildContext) -> Result<()> {
    for dir in [&ctx.root, &ctx.include, &ctx.modules, &ctx.workdir] {
        create_directory(runner, dir)?;
    }
    Ok(())
}

/// Create the pseudo filesystem mountpoints under `root`.
pub fn stage_pseudo_dirs(runner: &Runner, root: &Path) -> Result<()> {
    for dir in PSEUDO_DIRS {
        create_directory(runner, &root.join(dir))?;
    }
    Ok(())
}

/// Throwaway container and its exported tarball.
///
/// Removed when dropped, whether or not the extraction succeeded.
struct BaseContainer<'r> {
    runner: &'r Runner,
    name: String,
    tarball: PathBuf,
}

impl Drop for BaseContainer<'_> {
    fn drop(&mut self) {
        let cmd = Cmd::new("podman")
            .args(["rm", self.name.as_str()])
            .allow_fail()
            .description(format!("Removing container {}", self.name));
        if let Err(e) = self.runner.run(cmd) {
            tracing::error!("Failed to remove container {}: {:#}", self.name, e);
        }
        if self.tarball.exists() {
            if let Err(e) = delete_file(self.runner, &self.tarball, false) {
                tracing::error!("{:#}", e);
            }
        }
    }
}

/// Populate `ctx.root` from a container image.
///
/// The image is pulled, exported to a tarball in the build directory and
/// extracted elevated so file ownership survives. Removing the temporary
/// container and tarball is best-effort and happens on every exit path once
/// the container exists.
pub fn fetch_base(runner: &Runner, base: &str, ctx: &BuildContext) -> Result<()> {
    runner.run(
        Cmd::new("podman")
            .args(["pull", base])
            .description(format!("Fetching base image {}", base)),
    )?;

    let container = BaseContainer {
        runner,
        name: random_name(CONTAINER_NAME_LEN),
        tarball: ctx.build_dir.join("base.tar"),
    };
    runner.run(
        Cmd::new("podman")
            .arg("create")
            .arg(format!("--name={}", container.name))
            .arg(base)
            .description(format!("Creating container from {}", base)),
    )?;
    runner.run(
        Cmd::new("podman")
            .args(["export", container.name.as_str(), "-o"])
            .arg_path(&container.tarball)
            .dir(&ctx.build_dir)
            .description(format!("Exporting container {}", container.name)),
    )?;
    runner.run(
        Cmd::new("tar")
            .arg("xf")
            .arg_path(&container.tarball)
            .arg("-C")
            .arg_path(&ctx.root)
            .elevated()
            .description("Extracting base image"),
    )?;
    Ok(())
}

/// Ship the manifest in `include/` and pull packaging fragments in from the
/// `modules/` directory next to the manifest file.
///
/// The source file is shipped byte for byte. Without one the parsed manifest
/// is serialized instead.
pub fn copy_metadata(runner: &Runner, manifest: &Manifest, ctx: &BuildContext) -> Result<()> {
    let target = ctx.include.join("manifest.json");
    let content = match ctx.manifest_file {
        Some(ref source) => read_file(source)?,
        None => manifest.to_json()?.into_bytes(),
    };
    write_file(runner, &target, content)?;

    if let Some(manifest_dir) = ctx.manifest_dir() {
        let fragments = manifest_dir.join("modules");
        if fragments.is_dir() {
            // Trailing "." copies the contents rather than the directory itself
            copy_directory(runner, &fragments.join("."), &ctx.modules, true)?;
        }
    }
    Ok(())
}

/// Emit the packaging manifest and run the bundler.
pub fn bundle(runner: &Runner, config: &Config, manifest: &Manifest, ctx: &BuildContext) -> Result<()> {
    let descriptor = PackagingManifest::generate(manifest, config, ctx)
        .context("Failed to generate packaging manifest")?;
    descriptor.write(runner, &ctx.packaging_manifest(&manifest.name))?;
    packaging::build_bundle(runner, manifest, config, ctx)
}
