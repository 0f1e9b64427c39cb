//! File staging: create, write, append, copy and delete.
//!
//! Every function takes the [`Runner`] so that dry-run mode turns it into a
//! no-op. Copies are delegated to `cp` through the runner and follow the
//! caller's crash policy.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::BuildError;
use crate::process::{Cmd, Runner};

/// Create an empty file. Fails if the file already exists.
pub fn create_file(runner: &Runner, path: &Path) -> Result<()> {
    tracing::debug!("Creating file {}", path.display());
    if runner.is_dry_run() {
        return Ok(());
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| BuildError::io(format!("Failed to create {}", path.display()), e))?;
    Ok(())
}

/// Delete a file.
///
/// A missing file is an error when `crash` is set and a warning otherwise.
pub fn delete_file(runner: &Runner, path: &Path, crash: bool) -> Result<()> {
    tracing::debug!("Deleting file {}", path.display());
    if runner.is_dry_run() {
        return Ok(());
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound && !crash => {
            tracing::warn!("File {} doesn't exist, nothing to delete", path.display());
            Ok(())
        }
        Err(e) => Err(BuildError::io(format!("Failed to delete {}", path.display()), e).into()),
    }
}

/// Replace the contents of a file, creating it if missing.
pub fn write_file<C: AsRef<[u8]>>(runner: &Runner, path: &Path, content: C) -> Result<()> {
    tracing::debug!("Writing file {}", path.display());
    if runner.is_dry_run() {
        return Ok(());
    }
    if !path.exists() {
        tracing::warn!("File {} doesn't exist! Creating file", path.display());
    }
    fs::write(path, content)
        .map_err(|e| BuildError::io(format!("Failed to write {}", path.display()), e))?;
    Ok(())
}

/// Append to a file, creating it if missing.
pub fn append_file<C: AsRef<[u8]>>(runner: &Runner, path: &Path, content: C) -> Result<()> {
    tracing::debug!("Appending to file {}", path.display());
    if runner.is_dry_run() {
        return Ok(());
    }
    if !path.exists() {
        tracing::warn!("File {} doesn't exist! Creating file", path.display());
    }
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| BuildError::io(format!("Failed to open {}", path.display()), e))?;
    file.write_all(content.as_ref())
        .map_err(|e| BuildError::io(format!("Failed to append to {}", path.display()), e))?;
    Ok(())
}

/// Copy a single file with `cp`.
pub fn copy_file(runner: &Runner, source: &Path, destination: &Path, crash: bool) -> Result<()> {
    tracing::info!(
        "Copying file {} to {}",
        source.display(),
        destination.display()
    );
    let mut cmd = Cmd::new("cp")
        .arg_path(source)
        .arg_path(destination)
        .description(format!(
            "Copying file {} to {}",
            source.display(),
            destination.display()
        ));
    if !crash {
        cmd = cmd.allow_fail();
    }
    runner.run(cmd)?;
    Ok(())
}

/// Copy a directory tree with `cp -a`, preserving modes, ownership and links.
pub fn copy_directory(
    runner: &Runner,
    source: &Path,
    destination: &Path,
    crash: bool,
) -> Result<()> {
    tracing::info!(
        "Copying directory {} to {}",
        source.display(),
        destination.display()
    );
    let mut cmd = Cmd::new("cp")
        .arg("-a")
        .arg_path(source)
        .arg_path(destination)
        .description(format!(
            "Copying directory {} to {}",
            source.display(),
            destination.display()
        ));
    if !crash {
        cmd = cmd.allow_fail();
    }
    runner.run(cmd)?;
    Ok(())
}

/// Read a file into memory with path context on failure.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}
