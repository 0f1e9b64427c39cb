//! Build context shared across all build modules.
//!
//! Provides the fixed layout of a build directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Pseudo filesystem mountpoints staged under every jail root.
pub const PSEUDO_DIRS: [&str; 3] = ["proc", "sys", "dev"];

/// Paths of one build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Build directory (absolute)
    pub build_dir: PathBuf,
    /// Final filesystem payload
    pub root: PathBuf,
    /// Metadata shipped with the image (manifest, FsGuard file list)
    pub include: PathBuf,
    /// Extra packaging fragments
    pub modules: PathBuf,
    /// Overlay scratch space
    pub workdir: PathBuf,
    /// Manifest file the build was started from
    pub manifest_file: Option<PathBuf>,
}

impl BuildContext {
    /// Create a build context rooted at `build_dir`.
    ///
    /// Relative paths are made absolute against the current directory, since
    /// the jail and the bundler run with other working directories.
    pub fn new(build_dir: &Path) -> Result<Self> {
        let build_dir = if build_dir.is_absolute() {
            build_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to determine current directory")?
                .join(build_dir)
        };

        Ok(Self {
            root: build_dir.join("root"),
            include: build_dir.join("include"),
            modules: build_dir.join("modules"),
            workdir: build_dir.join("workdir"),
            build_dir,
            manifest_file: None,
        })
    }

    /// Ship `path` as the image manifest and take extra modules from the
    /// directory holding it.
    pub fn with_manifest_file(mut self, path: &Path) -> Self {
        self.manifest_file = Some(path.to_path_buf());
        self
    }

    /// Directory of the manifest file; its `modules/` folder is copied in.
    pub fn manifest_dir(&self) -> Option<&Path> {
        let file = self.manifest_file.as_deref()?;
        match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => Some(dir),
            _ => Some(Path::new(".")),
        }
    }

    /// Throwaway root the boot image is built in.
    pub fn boot_root(&self) -> PathBuf {
        self.build_dir.join("bootroot")
    }

    /// Packaging manifest handed to the bundler.
    pub fn packaging_manifest(&self, name: &str) -> PathBuf {
        self.build_dir.join(format!("{}.yml", name))
    }

    /// Bundler scratch directory.
    pub fn flatbuild(&self) -> PathBuf {
        self.build_dir.join("flatbuild")
    }

    /// FsGuard file list, shipped inside the image metadata.
    pub fn file_list(&self) -> PathBuf {
        self.include.join("FsGuard/filelist")
    }

    /// Detached signature over the file list (not shipped).
    pub fn signature(&self) -> PathBuf {
        self.build_dir.join("fsguard.minisig")
    }

    /// Lock file marking the directory as in use.
    pub fn lock_file(&self) -> PathBuf {
        self.build_dir.join(".shardimg.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let ctx = BuildContext::new(Path::new("/srv/build")).unwrap();
        assert_eq!(ctx.root, PathBuf::from("/srv/build/root"));
        assert_eq!(ctx.include, PathBuf::from("/srv/build/include"));
        assert_eq!(ctx.modules, PathBuf::from("/srv/build/modules"));
        assert_eq!(ctx.workdir, PathBuf::from("/srv/build/workdir"));
        assert_eq!(ctx.packaging_manifest("test"), PathBuf::from("/srv/build/test.yml"));
        assert_eq!(
            ctx.file_list(),
            PathBuf::from("/srv/build/include/FsGuard/filelist")
        );
    }

    #[test]
    fn test_manifest_dir() {
        let ctx = BuildContext::new(Path::new("/srv/build")).unwrap();
        assert_eq!(ctx.manifest_dir(), None);

        let ctx = ctx.with_manifest_file(Path::new("manifest.json"));
        assert_eq!(ctx.manifest_dir(), Some(Path::new(".")));

        let ctx = ctx.with_manifest_file(Path::new("/srv/img/manifest.json"));
        assert_eq!(ctx.manifest_dir(), Some(Path::new("/srv/img")));
    }

    #[test]
    fn test_relative_build_dir_is_absolutized() {
        let ctx = BuildContext::new(Path::new("build")).unwrap();
        assert!(ctx.build_dir.is_absolute());
        assert!(ctx.build_dir.ends_with("build"));
    }
}
