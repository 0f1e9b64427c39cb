//! Preflight command - runs preflight checks.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, build_dir: &Path, strict: bool) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(config, build_dir)?;
    } else {
        let report = preflight::run_preflight(config, build_dir);
        report.log();
        if !report.all_passed() {
            tracing::warn!("Some checks failed. Use --strict to fail on them.");
        }
    }
    Ok(())
}
