//! Single-builder exclusivity for a build directory.

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Held for the duration of a build; the lock file is removed on drop.
///
/// Mounts and jail roots under the build directory are not safe to share, so a
/// second builder fails fast instead of interleaving with the first.
#[derive(Debug)]
#[must_use = "the lock is released as soon as it is dropped"]
pub struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    /// Take the lock at `path`, creating its parent directory if needed.
    ///
    /// The lock is taken even in dry-run mode.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BuildError::io(format!("Failed to create {}", parent.display()), e)
            })?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BuildError::Locked {
                    path: path.to_path_buf(),
                }
                .into());
            }
            Err(e) => {
                return Err(
                    BuildError::io(format!("Failed to create lock {}", path.display()), e).into(),
                )
            }
        };
        // Owner pid, for whoever finds a stale lock
        writeln!(file, "{}", std::process::id())
            .map_err(|e| BuildError::io(format!("Failed to write {}", path.display()), e))?;

        tracing::debug!("Acquired build lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("Failed to release build lock {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("build/.shardimg.lock");

        let lock = BuildLock::acquire(&path).unwrap();
        let err = BuildLock::acquire(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Locked { .. })
        ));
        assert_eq!(crate::error::exit_code_of(&err), crate::error::EXIT_LOCKED);

        drop(lock);
        assert!(!path.exists());
        let _again = BuildLock::acquire(&path).unwrap();
    }
}
