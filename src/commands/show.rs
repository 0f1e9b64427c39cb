//! Show command - displays information.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::manifest::Manifest;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show a manifest after validation
    Manifest,
    /// Show configuration
    Config,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, manifest: &Path, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Manifest => {
            let manifest = Manifest::load(manifest)?;
            manifest.print();
            if let Some(ref kernel) = manifest.kernel {
                tracing::info!("Kernel {} ({}.efi) args '{}'", kernel.package, kernel.name, kernel.args);
                if let Some(ref version) = kernel.version {
                    tracing::info!("Kernel version {}", version);
                }
            }
        }
        ShowTarget::Config => config.print(),
    }
    Ok(())
}
