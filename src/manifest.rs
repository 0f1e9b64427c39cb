//! Image manifest: identity, build inputs and FsGuard policy.
//!
//! A manifest is loaded once per build and never mutated by the pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Which pipeline builds the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Full root filesystem
    System,
    /// Signed kernel image
    Boot,
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Boot => f.write_str("boot"),
        }
    }
}

/// Kernel settings for boot images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Package providing the kernel
    #[serde(default = "default_kernel_package")]
    pub package: String,
    /// File name (without extension) of the produced kernel image
    #[serde(default = "default_kernel_name")]
    pub name: String,
    /// Kernel command line embedded in the image
    #[serde(default)]
    pub args: String,
    /// Kernel release to build for; the installed one is detected when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for KernelSpec {
    fn default() -> Self {
        Self {
            package: default_kernel_package(),
            name: default_kernel_name(),
            args: String::new(),
            version: None,
        }
    }
}

fn default_kernel_package() -> String {
    "linux".to_string()
}

fn default_kernel_name() -> String {
    "vmlinuz".to_string()
}

/// A parsed image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    /// Reverse-domain identifier, e.g. `al.getcryst.test`
    pub id: String,
    pub version: String,
    pub author: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    /// Base image reference; empty means build from bare directories
    #[serde(default)]
    pub base: String,
    /// Packages to install, in order
    #[serde(default)]
    pub packages: Vec<String>,
    /// Shell commands run inside the jail, in order
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub fsguard_enabled: bool,
    /// Binary (relative to the image root) that receives the signature trailer
    #[serde(default)]
    pub fsguard_binary: PathBuf,
    /// Root-relative paths scanned by FsGuard
    #[serde(default)]
    pub fsguard_paths: Vec<PathBuf>,
    /// Boot image kernel settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelSpec>,
}

impl Manifest {
    /// Create a manifest with the identity fields set and everything else empty.
    pub fn new(name: &str, id: &str, version: &str, author: &str, image_type: ImageType) -> Self {
        Self {
            name: name.to_string(),
            id: id.to_string(),
            version: version.to_string(),
            author: author.to_string(),
            image_type,
            base: String::new(),
            packages: Vec::new(),
            commands: Vec::new(),
            fsguard_enabled: false,
            fsguard_binary: PathBuf::new(),
            fsguard_paths: Vec::new(),
            kernel: None,
        }
    }

    /// Load and validate a manifest from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest: Self = serde_json::from_str(&json).map_err(|e| BuildError::InvalidManifest {
            reason: format!("{}: {}", path.display(), e),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Save manifest to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        Ok(())
    }

    /// Pretty JSON (4-space indentation, like the manifests users write).
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Check the manifest before any build step runs.
    pub fn validate(&self) -> Result<(), BuildError> {
        let invalid = |reason: String| -> Result<(), BuildError> {
            Err(BuildError::InvalidManifest { reason })
        };

        if self.name.trim().is_empty() {
            return invalid("name must not be empty".into());
        }
        if self.name.contains('/') {
            return invalid(format!("name '{}' must not contain '/'", self.name));
        }
        if self.id.matches('.').count() < 2 {
            return invalid(format!(
                "id '{}' must be in reverse-domain notation (at least two '.')",
                self.id
            ));
        }
        if self.fsguard_enabled && self.fsguard_binary.as_os_str().is_empty() {
            return invalid("fsguard_enabled requires fsguard_binary".into());
        }
        Ok(())
    }

    /// Kernel settings, falling back to defaults.
    pub fn kernel(&self) -> KernelSpec {
        self.kernel.clone().unwrap_or_default()
    }

    /// Log a summary of the manifest.
    pub fn print(&self) {
        tracing::info!("Name {}", self.name);
        tracing::info!("Id {}", self.id);
        tracing::info!("Version {}", self.version);
        tracing::info!("Type {}", self.image_type);
        tracing::info!("Author {}", self.author);
        tracing::info!("Base {}", if self.base.trim().is_empty() { "(none)" } else { self.base.as_str() });
        tracing::info!("Packages {:?}", self.packages);
        tracing::info!("Commands {:?}", self.commands);
        if self.fsguard_enabled {
            tracing::info!(
                "FsGuard {} over {:?}",
                self.fsguard_binary.display(),
                self.fsguard_paths
            );
        }
    }
}
