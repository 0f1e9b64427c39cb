//! Directory creation and path inspection.
//!
//! Symlinks inside an image root are resolved the way the kernel does it
//! after `chroot`: absolute targets restart at the image root and `..`
//! never climbs above it.

use anyhow::Result;
use rand::distributions::Uniform;
use rand::Rng;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use crate::error::BuildError;
use crate::process::Runner;

/// Set-user-ID permission bit.
const S_ISUID: u32 = 0o4000;

/// Maximum symlink hops before giving up, same limit as Linux (MAXSYMLINKS).
const MAX_SYMLINK_HOPS: usize = 40;

/// Create a directory and any missing parents.
///
/// An existing directory is reused with a warning.
pub fn create_directory(runner: &Runner, path: &Path) -> Result<()> {
    tracing::debug!("Creating directory {}", path.display());
    if runner.is_dry_run() {
        return Ok(());
    }
    if path.exists() {
        tracing::warn!("Directory {} already exists!", path.display());
        return Ok(());
    }
    fs::create_dir_all(path)
        .map_err(|e| BuildError::io(format!("Failed to create {}", path.display()), e))?;
    Ok(())
}

/// True iff the set-user-ID bit is present on `path` (links are followed).
pub fn is_suid(path: &Path) -> Result<bool> {
    let meta = fs::metadata(path)
        .map_err(|e| BuildError::io(format!("Failed to stat {}", path.display()), e))?;
    Ok(meta.permissions().mode() & S_ISUID != 0)
}

/// The target of a symlink, or `None` if `path` is not a symlink.
pub fn resolve_symlink(path: &Path) -> Option<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::read_link(path).ok(),
        _ => None,
    }
}

/// Resolve `path` (relative to `root`, leading `/` allowed) into a host path
/// under `root`, following every symlink component with `root` as `/`.
///
/// Returns `None` on a symlink loop.
pub fn resolve_in_root(root: &Path, path: &Path) -> Option<PathBuf> {
    let mut pending: VecDeque<OsString> = VecDeque::new();
    push_components(&mut pending, path, false);

    let mut resolved: Vec<OsString> = Vec::new();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            resolved.pop();
            continue;
        }
        resolved.push(part);

        let host = join_parts(root, &resolved);
        if let Some(target) = resolve_symlink(&host) {
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                tracing::warn!("Too many levels of symbolic links at {}", host.display());
                return None;
            }
            resolved.pop();
            if target.is_absolute() {
                resolved.clear();
            }
            push_components(&mut pending, &target, true);
        }
    }

    Some(join_parts(root, &resolved))
}

/// Path of `host_path` as seen from inside `root`, with a leading `/`.
pub fn in_root_path(root: &Path, host_path: &Path) -> Option<String> {
    let rel = host_path.strip_prefix(root).ok()?;
    Some(format!("/{}", rel.to_string_lossy()))
}

/// Short random lowercase name, used for throwaway container names.
pub fn random_name(len: usize) -> String {
    let letters = Uniform::new_inclusive(b'a', b'z');
    rand::thread_rng()
        .sample_iter(letters)
        .take(len)
        .map(char::from)
        .collect()
}

fn push_components(pending: &mut VecDeque<OsString>, path: &Path, front: bool) {
    let parts: Vec<OsString> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => None,
        })
        .collect();

    if front {
        for part in parts.into_iter().rev() {
            pending.push_front(part);
        }
    } else {
        pending.extend(parts);
    }
}

fn join_parts(root: &Path, parts: &[OsString]) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in parts {
        path.push(part);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_create_directory_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let runner = Runner::new(&Config::default());
        let dir = temp.path().join("a/b/c");

        create_directory(&runner, &dir).unwrap();
        create_directory(&runner, &dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_is_suid() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain");
        let suid = temp.path().join("suid");
        fs::write(&plain, "x").unwrap();
        fs::write(&suid, "x").unwrap();
        fs::set_permissions(&suid, fs::Permissions::from_mode(0o4755)).unwrap();

        assert!(!is_suid(&plain).unwrap());
        assert!(is_suid(&suid).unwrap());
        assert!(is_suid(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn test_resolve_symlink_sentinel() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "x").unwrap();
        symlink("file", temp.path().join("link")).unwrap();

        assert_eq!(
            resolve_symlink(&temp.path().join("link")),
            Some(PathBuf::from("file"))
        );
        assert_eq!(resolve_symlink(&file), None);
        assert_eq!(resolve_symlink(&temp.path().join("missing")), None);
    }

    #[test]
    fn test_absolute_link_resolves_inside_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::write(root.join("usr/bin/sudo"), "x").unwrap();
        symlink("/usr/bin/sudo", root.join("sudo-link")).unwrap();

        assert_eq!(
            resolve_in_root(root, Path::new("/sudo-link")),
            Some(root.join("usr/bin/sudo"))
        );
    }

    #[test]
    fn test_merged_usr_directory_link() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::write(root.join("usr/bin/su"), "x").unwrap();
        symlink("usr/bin", root.join("bin")).unwrap();

        assert_eq!(
            resolve_in_root(root, Path::new("bin/su")),
            Some(root.join("usr/bin/su"))
        );
    }

    #[test]
    fn test_parent_dir_is_clamped_to_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("etc")).unwrap();
        symlink("../../../../etc/passwd", root.join("etc/escape")).unwrap();

        assert_eq!(
            resolve_in_root(root, Path::new("etc/escape")),
            Some(root.join("etc/passwd"))
        );
    }

    #[test]
    fn test_symlink_loop() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        symlink("b", root.join("a")).unwrap();
        symlink("a", root.join("b")).unwrap();

        assert_eq!(resolve_in_root(root, Path::new("a")), None);
    }

    #[test]
    fn test_in_root_path() {
        assert_eq!(
            in_root_path(Path::new("/build/root"), Path::new("/build/root/usr/bin/su")),
            Some("/usr/bin/su".to_string())
        );
        assert_eq!(in_root_path(Path::new("/build/root"), Path::new("/etc")), None);
    }

    #[test]
    fn test_random_name() {
        let name = random_name(10);
        assert_eq!(name.len(), 10);
        assert!(name.chars().all(|c| c.is_ascii_lowercase()));
        assert_ne!(random_name(10), random_name(10));
    }
}
