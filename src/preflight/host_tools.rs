//! Host tool availability checks.

use crate::process;

use super::types::CheckResult;

/// Tools every build needs: (binary, package, purpose).
pub const REQUIRED_TOOLS: [(&str, &str, &str); 9] = [
    ("pacman", "pacman", "Installs packages into the jail"),
    ("fakeroot", "fakeroot", "Fakes uid 0 inside the jail"),
    ("fakechroot", "fakechroot", "Fakes chroot for unprivileged installs"),
    ("podman", "podman", "Fetches base images"),
    ("flatpak-builder", "flatpak-builder", "Builds the final bundle"),
    ("minisign", "minisign", "Signs the FsGuard file list"),
    ("mount", "util-linux", "Mounts pseudo filesystems"),
    ("umount", "util-linux", "Releases mounts"),
    ("tar", "tar", "Extracts base images"),
];

/// Tools only some builds need.
pub const OPTIONAL_TOOLS: [(&str, &str, &str); 2] = [
    ("arch-chroot", "arch-install-scripts", "Runs elevated commands in boot roots"),
    ("dracut", "dracut", "Host copy is only needed for debugging boot images"),
];

/// Check host tools are installed.
pub fn check_host_tools() -> Vec<CheckResult> {
    let required = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, true));
    let optional = OPTIONAL_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, false));
    required.chain(optional).collect()
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.to_string_lossy()),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;

    #[test]
    fn test_every_tool_is_reported() {
        let results = check_host_tools();
        assert_eq!(results.len(), REQUIRED_TOOLS.len() + OPTIONAL_TOOLS.len());
        // Optional tools never fail the report
        for result in &results[REQUIRED_TOOLS.len()..] {
            assert_ne!(result.status, CheckStatus::Fail);
        }
    }

    #[test]
    fn test_missing_required_tool_fails() {
        let result = check_tool_exists("nonexistent_tool_12345", "none", "", true);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.unwrap().contains("'none'"));
    }
}
