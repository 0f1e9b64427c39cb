//! Preflight checks for shardimg builds.
//!
//! Validates host tools and configuration before starting a build.
//! Run with `shardimg preflight` to check everything is ready.

mod environment;
mod host_tools;
mod types;

use std::path::Path;

use anyhow::{bail, Result};

use crate::config::Config;

pub use host_tools::{OPTIONAL_TOOLS, REQUIRED_TOOLS};
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config, build_dir: &Path) -> PreflightReport {
    let mut checks = Vec::new();

    tracing::info!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    tracing::info!("Checking build environment...");
    checks.extend(environment::check_build_environment(config, build_dir));

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config, build_dir: &Path) -> Result<()> {
    let report = run_preflight(config, build_dir);
    report.log();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }

    tracing::info!("All preflight checks passed");
    Ok(())
}
