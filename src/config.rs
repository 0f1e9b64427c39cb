//! Configuration management for shardimg.
//!
//! Reads configuration from .env file and environment variables.
//! Environment variables take precedence over .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default packaging runtime.
pub const DEFAULT_RUNTIME: &str = "org.freedesktop.Platform";
/// Default packaging runtime branch.
pub const DEFAULT_RUNTIME_VERSION: &str = "22.08";
/// Default packaging SDK.
pub const DEFAULT_SDK: &str = "org.freedesktop.Sdk";

/// shardimg configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Simulate success for every side-effecting operation (SHARDS_FAKE)
    pub dry_run: bool,
    /// Debug logging (DEBUG)
    pub debug: bool,
    /// Directory holding minisign.key and minisign.pub
    pub key_dir: PathBuf,
    /// Privilege-escalation wrapper (e.g. "sudo")
    pub elevate: String,
    /// Wrapper used for elevated commands inside a jail (e.g. "arch-chroot")
    pub chroot: String,
    /// Packaging runtime reference
    pub runtime: String,
    pub runtime_version: String,
    pub sdk: String,
    /// Repository the bundler commits to
    pub repo: PathBuf,
    /// Optional secure boot signing key for the boot image
    pub secureboot_key: Option<PathBuf>,
    /// Optional secure boot certificate for the boot image
    pub secureboot_cert: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_vars(&HashMap::new(), Path::new("."))
    }
}

impl Config {
    /// Load configuration from .env file and environment.
    ///
    /// The .env file is looked up in `base_dir`.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                env_vars.insert(key, value);
                            }
                            Err(e) => {
                                tracing::warn!("Ignoring malformed line in {}: {}", env_path.display(), e)
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("Failed to read {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(&env_vars, base_dir)
    }

    /// Build a configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>, base_dir: &Path) -> Self {
        let get = |key: &str| vars.get(key).map(|s| s.trim()).filter(|s| !s.is_empty());
        let path = |s: &str| {
            let p = PathBuf::from(s);
            if p.is_absolute() {
                p
            } else {
                base_dir.join(p)
            }
        };

        let key_dir = get("SHARDIMG_KEY_DIR")
            .map(path)
            .unwrap_or_else(default_key_dir);

        Self {
            dry_run: get("SHARDS_FAKE").map(parse_bool).unwrap_or(false),
            debug: get("DEBUG").map(parse_bool).unwrap_or(false),
            key_dir,
            elevate: get("SHARDIMG_ELEVATE").unwrap_or("sudo").to_string(),
            chroot: get("SHARDIMG_CHROOT").unwrap_or("arch-chroot").to_string(),
            runtime: get("SHARDIMG_RUNTIME").unwrap_or(DEFAULT_RUNTIME).to_string(),
            runtime_version: get("SHARDIMG_RUNTIME_VERSION")
                .unwrap_or(DEFAULT_RUNTIME_VERSION)
                .to_string(),
            sdk: get("SHARDIMG_SDK").unwrap_or(DEFAULT_SDK).to_string(),
            repo: get("SHARDIMG_REPO").map(path).unwrap_or_else(|| base_dir.join("repo")),
            secureboot_key: get("SHARDIMG_SB_KEY").map(path),
            secureboot_cert: get("SHARDIMG_SB_CERT").map(path),
        }
    }

    /// Path to the minisign secret key.
    pub fn secret_key(&self) -> PathBuf {
        self.key_dir.join("minisign.key")
    }

    /// Path to the minisign public key.
    pub fn public_key(&self) -> PathBuf {
        self.key_dir.join("minisign.pub")
    }

    /// Log configuration for debugging.
    pub fn print(&self) {
        tracing::info!("Configuration:");
        tracing::info!("  SHARDS_FAKE: {}", self.dry_run);
        tracing::info!("  DEBUG: {}", self.debug);
        tracing::info!("  SHARDIMG_KEY_DIR: {}", self.key_dir.display());
        tracing::info!("  SHARDIMG_ELEVATE: {}", self.elevate);
        tracing::info!("  SHARDIMG_CHROOT: {}", self.chroot);
        tracing::info!(
            "  Runtime: {}//{} (sdk {})",
            self.runtime,
            self.runtime_version,
            self.sdk
        );
        tracing::info!("  SHARDIMG_REPO: {}", self.repo.display());
        if self.secret_key().exists() && self.public_key().exists() {
            tracing::info!("  Signing keys: FOUND");
        } else {
            tracing::info!("  Signing keys: NOT FOUND (FsGuard signing will fail)");
        }
        if self.secureboot_key.is_some() && self.secureboot_cert.is_some() {
            tracing::info!("  Secure boot signing: ENABLED");
        }
    }
}

fn default_key_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("shardimg"))
        .unwrap_or_else(|| PathBuf::from("/etc/shardimg"))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
