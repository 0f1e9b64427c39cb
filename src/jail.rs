//! Package installation and command execution inside an unprivileged jail.
//!
//! The jail is a staging root driven through `fakechroot`/`fakeroot`, so the
//! package manager and build commands see `root` as `/` and believe they run
//! as uid 0 without real privileges.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::common::{copy_file, create_directory};
use crate::process::{Cmd, Runner};

/// Host package-manager configuration copied into every jail.
pub const HOST_PACMAN_CONF: &str = "/etc/pacman.conf";

/// Package database location inside the jail.
pub const PACMAN_DB: &str = "var/lib/pacman";

/// Base pacman invocation targeting `root` as alternate install root.
fn pacman(root: &Path) -> Cmd {
    Cmd::new("fakechroot")
        .args(["fakeroot", "pacman", "--noconfirm", "--root"])
        .arg_path(root)
        .arg("--dbpath")
        .arg_path(&root.join(PACMAN_DB))
        .arg("--config")
        .arg_path(&pacman_conf(root))
}

fn pacman_conf(root: &Path) -> PathBuf {
    root.join("pacman.conf")
}

/// Install `packages` into `root`, in the given order.
///
/// Stages the package database and the host configuration first. The cache
/// clean afterwards is best-effort and never fails the build.
pub fn install_packages(runner: &Runner, packages: &[String], root: &Path) -> Result<()> {
    create_directory(runner, &root.join(PACMAN_DB))?;
    copy_file(runner, Path::new(HOST_PACMAN_CONF), &pacman_conf(root), true)?;

    runner.run(
        pacman(root)
            .args(["--needed", "-Syu"])
            .args(packages)
            .description("Installing packages"),
    )?;

    runner.run(
        pacman(root)
            .arg("-Scc")
            .allow_fail()
            .description("Clearing pacman cache"),
    )?;

    Ok(())
}

/// Run each shell command inside the jail, strictly in order.
///
/// The first failing command aborts the build.
pub fn execute_commands(runner: &Runner, commands: &[String], root: &Path) -> Result<()> {
    for command in commands {
        runner.run(
            Cmd::new("fakechroot")
                .args(["fakeroot", "chroot"])
                .arg_path(root)
                .args(["bash", "-c", command.as_str()])
                .description(format!("Run command {} in chroot", command)),
        )?;
    }
    Ok(())
}
