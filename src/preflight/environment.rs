//! Build environment checks (signing keys, build directory, secure boot).

use std::fs;
use std::path::Path;

use crate::config::Config;

use super::types::CheckResult;

/// Written and removed again to test the build directory is writable.
const SCRATCH_FILE: &str = ".shardimg-preflight";

/// Check configuration-dependent prerequisites.
pub fn check_build_environment(config: &Config, build_dir: &Path) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for key in [config.secret_key(), config.public_key()] {
        let name = format!("{}", key.display());
        if key.is_file() {
            results.push(CheckResult::pass(&name));
        } else {
            results.push(CheckResult::warn(
                &name,
                "Missing - builds with FsGuard enabled will fail",
            ));
        }
    }

    match (&config.secureboot_key, &config.secureboot_cert) {
        (Some(key), Some(cert)) => {
            for path in [key, cert] {
                let name = format!("{}", path.display());
                if path.is_file() {
                    results.push(CheckResult::pass(&name));
                } else {
                    results.push(CheckResult::fail(&name, "Secure boot material not found"));
                }
            }
        }
        (None, None) => {}
        _ => results.push(CheckResult::warn(
            "secure boot",
            "Only one of SHARDIMG_SB_KEY/SHARDIMG_SB_CERT is set; kernel images will be unsigned",
        )),
    }

    if build_dir.join(".shardimg.lock").exists() {
        results.push(CheckResult::warn(
            "build lock",
            &format!("{} is locked by another build (or a stale lock)", build_dir.display()),
        ));
    }

    // Nearest existing ancestor must be writable
    let target = build_dir
        .ancestors()
        .find(|p| p.is_dir())
        .unwrap_or_else(|| Path::new("."));
    let scratch = target.join(SCRATCH_FILE);
    match fs::write(&scratch, "test") {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&scratch) {
                tracing::warn!("Failed to remove {}: {}", scratch.display(), e);
            }
            results.push(CheckResult::pass_with("build directory writable", &target.to_string_lossy()));
        }
        Err(e) => results.push(CheckResult::fail(
            "build directory writable",
            &format!("Cannot write to {}: {}", target.display(), e),
        )),
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_keys_warn() {
        let temp = TempDir::new().unwrap();
        let vars: HashMap<String, String> = [(
            "SHARDIMG_KEY_DIR".to_string(),
            temp.path().join("keys").to_string_lossy().into_owned(),
        )]
        .into_iter()
        .collect();
        let config = Config::from_vars(&vars, temp.path());

        let results = check_build_environment(&config, &temp.path().join("build"));
        assert_eq!(results[0].status, CheckStatus::Warn);
        assert_eq!(results[1].status, CheckStatus::Warn);
        assert_eq!(results.last().unwrap().status, CheckStatus::Pass);
    }

    #[test]
    fn test_writable_check_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let config = Config::from_vars(&HashMap::new(), temp.path());

        let results = check_build_environment(&config, &temp.path().join("build"));
        let writable = results
            .iter()
            .find(|r| r.name == "build directory writable")
            .unwrap();
        assert_eq!(writable.status, CheckStatus::Pass);
        assert!(!temp.path().join(SCRATCH_FILE).exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_half_configured_secure_boot_warns() {
        let temp = TempDir::new().unwrap();
        let vars: HashMap<String, String> = [(
            "SHARDIMG_SB_KEY".to_string(),
            "db.key".to_string(),
        )]
        .into_iter()
        .collect();
        let config = Config::from_vars(&vars, temp.path());

        let results = check_build_environment(&config, temp.path());
        assert!(results
            .iter()
            .any(|r| r.name == "secure boot" && r.status == CheckStatus::Warn));
    }
}
