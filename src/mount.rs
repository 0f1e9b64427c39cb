//! Mount management with scoped release.
//!
//! Every successful mount hands back a [`MountGuard`]. Dropping the guard
//! unmounts, so an error propagated with `?` out of a pipeline stage still
//! tears down everything that stage mounted. Mountpoints are host-wide kernel
//! state and would otherwise outlive a failed build.
//!
//! All commands run elevated and crash the build on failure.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::process::{Cmd, Runner};

/// A mounted filesystem that is unmounted when dropped.
#[must_use = "dropping the guard unmounts immediately"]
pub struct MountGuard<'r> {
    runner: &'r Runner,
    mountpoint: PathBuf,
    released: bool,
}

impl<'r> MountGuard<'r> {
    /// Where the filesystem is mounted.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmount now, crashing the build if `umount` fails.
    ///
    /// A failed unmount is retried once more when the guard drops.
    pub fn unmount(mut self) -> Result<()> {
        unmount(self.runner, &self.mountpoint)?;
        self.released = true;
        Ok(())
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(
            "Releasing mount {} during teardown",
            self.mountpoint.display()
        );
        let cmd = unmount_cmd(&self.mountpoint).allow_fail();
        if let Err(e) = self.runner.run(cmd) {
            tracing::error!("Failed to unmount {}: {:#}", self.mountpoint.display(), e);
        }
    }
}

/// Mount `source` at `mountpoint`.
///
/// `fs_type` is `None` for bind mounts (pass `bind` in `options`).
pub fn mount<'r>(
    runner: &'r Runner,
    source: &str,
    mountpoint: &Path,
    options: &[&str],
    fs_type: Option<&str>,
) -> Result<MountGuard<'r>> {
    let mut cmd = Cmd::new("mount");
    if let Some(fs) = fs_type {
        cmd = cmd.args(["-t", fs]);
    }
    if !options.is_empty() {
        cmd = cmd.arg("-o").arg(options.join(","));
    }
    cmd = cmd
        .arg(source)
        .arg_path(mountpoint)
        .elevated()
        .description(format!(
            "Mount {} to {} with options {}",
            source,
            mountpoint.display(),
            options.join(" ")
        ));

    runner.run(cmd)?;
    Ok(guard(runner, mountpoint))
}

/// Bind-mount `source` at `mountpoint`.
pub fn bind_mount<'r>(runner: &'r Runner, source: &Path, mountpoint: &Path) -> Result<MountGuard<'r>> {
    mount(
        runner,
        &source.to_string_lossy(),
        mountpoint,
        &["bind"],
        None,
    )
}

/// Mount an overlay of `lower_dirs` beneath the writable `upper_dir` at
/// `destination`.
///
/// `lower_dirs` are given highest priority first. `work_dir` must be an empty
/// directory on the same filesystem as `upper_dir`.
pub fn overlay_mount<'r>(
    runner: &'r Runner,
    lower_dirs: &[PathBuf],
    upper_dir: &Path,
    work_dir: &Path,
    destination: &Path,
    options: &[&str],
) -> Result<MountGuard<'r>> {
    anyhow::ensure!(
        !lower_dirs.is_empty(),
        "overlay mount at {} needs at least one lower directory",
        destination.display()
    );

    let lower = lower_dirs
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":");

    let mut cmd = Cmd::new("mount").args(["-t", "overlay", "overlay"]);
    if !options.is_empty() {
        cmd = cmd.arg("-o").arg(options.join(","));
    }
    cmd = cmd
        .arg("-o")
        .arg(format!(
            "lowerdir={},upperdir={},workdir={}",
            lower,
            upper_dir.display(),
            work_dir.display()
        ))
        .arg_path(destination)
        .elevated()
        .description(format!("Mount overlay at {}", destination.display()));

    runner.run(cmd)?;
    Ok(guard(runner, destination))
}

/// Unmount `mountpoint`, crashing the build on failure.
pub fn unmount(runner: &Runner, mountpoint: &Path) -> Result<()> {
    runner.run(unmount_cmd(mountpoint))?;
    Ok(())
}

fn unmount_cmd(mountpoint: &Path) -> Cmd {
    Cmd::new("umount")
        .arg_path(mountpoint)
        .elevated()
        .description(format!("Unmount {}", mountpoint.display()))
}

fn guard<'r>(runner: &'r Runner, mountpoint: &Path) -> MountGuard<'r> {
    MountGuard {
        runner,
        mountpoint: mountpoint.to_path_buf(),
        released: false,
    }
}

/// `proc`, `sys` and `dev` mounted into a jail root.
///
/// Unmounted in reverse order on [`PseudoFs::unmount`] or on drop.
pub struct PseudoFs<'r> {
    mounts: Vec<MountGuard<'r>>,
}

impl<'r> PseudoFs<'r> {
    /// Mount the pseudo filesystems under `root`.
    ///
    /// `root/{proc,sys,dev}` must already exist. If a later mount fails, the
    /// ones already made are released before the error is returned.
    pub fn mount(runner: &'r Runner, root: &Path) -> Result<Self> {
        let mut pseudo = Self { mounts: Vec::new() };
        pseudo
            .mounts
            .push(mount(runner, "proc", &root.join("proc"), &[], Some("proc"))?);
        pseudo
            .mounts
            .push(mount(runner, "sys", &root.join("sys"), &[], Some("sysfs"))?);
        pseudo
            .mounts
            .push(bind_mount(runner, Path::new("/dev"), &root.join("dev"))?);
        Ok(pseudo)
    }

    /// Mountpoints currently held.
    pub fn mountpoints(&self) -> Vec<&Path> {
        self.mounts.iter().map(MountGuard::mountpoint).collect()
    }

    /// Unmount everything, crashing the build on the first failure.
    ///
    /// Remaining guards are still released by their destructors.
    pub fn unmount(mut self) -> Result<()> {
        while let Some(guard) = self.mounts.pop() {
            guard.unmount()?;
        }
        Ok(())
    }
}

impl Drop for PseudoFs<'_> {
    fn drop(&mut self) {
        while let Some(guard) = self.mounts.pop() {
            drop(guard);
        }
    }
}
