//! Init command - writes a fresh manifest.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::manifest::{ImageType, Manifest};

/// Options for `shardimg init`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub directory: PathBuf,
    pub name: String,
    pub id: String,
    pub version: String,
    pub author: String,
    pub image_type: ImageType,
    pub base: String,
}

/// Write `<directory>/manifest.json`, creating the directory if needed.
///
/// The manifest is validated before anything is written.
pub fn cmd_init(options: &InitOptions) -> Result<PathBuf> {
    let mut manifest = Manifest::new(
        &options.name,
        &options.id,
        &options.version,
        &options.author,
        options.image_type,
    );
    manifest.base = options.base.clone();
    manifest.validate()?;

    fs::create_dir_all(&options.directory)
        .with_context(|| format!("Failed to create {}", options.directory.display()))?;

    let path = options.directory.join("manifest.json");
    if path.exists() {
        tracing::warn!("Overwriting existing manifest {}", path.display());
    }
    manifest.save(&path)?;
    tracing::info!("Wrote {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: PathBuf, id: &str) -> InitOptions {
        InitOptions {
            directory: dir,
            name: "test".into(),
            id: id.into(),
            version: "1.0".into(),
            author: "axtlos".into(),
            image_type: ImageType::Boot,
            base: String::new(),
        }
    }

    #[test]
    fn test_init_writes_loadable_manifest() {
        let temp = TempDir::new().unwrap();
        let path = cmd_init(&options(temp.path().join("nested/img"), "al.getcryst.test")).unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.image_type, ImageType::Boot);
        assert!(manifest.packages.is_empty());
    }

    #[test]
    fn test_init_rejects_bad_id() {
        let temp = TempDir::new().unwrap();
        let err = cmd_init(&options(temp.path().join("img"), "getcryst")).unwrap_err();

        assert_eq!(crate::error::exit_code_of(&err), crate::error::EXIT_CONFIG);
        assert!(!temp.path().join("img").exists());
    }
}
