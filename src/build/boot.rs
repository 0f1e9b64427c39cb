//! Boot image pipeline.
//!
//! The kernel image is produced in a throwaway root (`build/bootroot`) and
//! only the finished `.efi` is copied into the shipped `root/boot`.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use super::context::BuildContext;
use super::stage;
use crate::common::{copy_file, create_directory, in_root_path};
use crate::config::Config;
use crate::jail;
use crate::manifest::{KernelSpec, Manifest};
use crate::mount::PseudoFs;
use crate::process::{Cmd, Runner};
use crate::timing::Timer;

/// Packages every boot root gets ahead of the manifest's own.
const BOOT_PACKAGES: [&str; 2] = ["base", "dracut"];

/// Kernel module tree, relative to a root.
const MODULES_DIR: &str = "usr/lib/modules";

/// Where secure boot material is staged inside the boot root.
const SECUREBOOT_DIR: &str = "etc/shardimg/secureboot";

/// Build a boot image into `ctx`.
pub fn build_boot(runner: &Runner, config: &Config, manifest: &Manifest, ctx: &BuildContext) -> Result<()> {
    tracing::info!("Building boot image {}", manifest.name);
    let kernel = manifest.kernel();
    let boot_root = ctx.boot_root();

    let t = Timer::start("Staging build directory");
    stage::stage_directories(runner, ctx)?;
    create_directory(runner, &boot_root)?;
    create_directory(runner, &ctx.root.join("boot"))?;
    stage::stage_pseudo_dirs(runner, &boot_root)?;
    stage::copy_metadata(runner, manifest, ctx)?;
    t.finish();

    {
        let pseudo = PseudoFs::mount(runner, &boot_root)?;

        let t = Timer::start("Installing kernel packages");
        jail::install_packages(runner, &boot_packages(&kernel, &manifest.packages), &boot_root)?;
        t.finish();

        let t = Timer::start("Running commands");
        jail::execute_commands(runner, &manifest.commands, &boot_root)?;
        t.finish();

        let t = Timer::start("Building kernel image");
        let image = build_kernel_image(runner, config, &kernel, &boot_root)?;
        fix_ownership(runner, &image, &ctx.build_dir)?;
        copy_file(runner, &image, &ctx.root.join("boot").join(image_file(&kernel)), true)?;
        t.finish();

        pseudo.unmount()?;
    }

    let t = Timer::start("Bundling image");
    stage::bundle(runner, config, manifest, ctx)?;
    t.finish();

    tracing::info!("Boot image {} complete", manifest.name);
    Ok(())
}

/// `[kernel package, base, dracut]` followed by the manifest's packages.
pub fn boot_packages(kernel: &KernelSpec, extra: &[String]) -> Vec<String> {
    std::iter::once(kernel.package.clone())
        .chain(BOOT_PACKAGES.iter().map(|p| p.to_string()))
        .chain(extra.iter().cloned())
        .collect()
}

fn image_file(kernel: &KernelSpec) -> String {
    format!("{}.efi", kernel.name)
}

/// Installed kernel version, taken from the module tree under `root`.
///
/// With several kernels installed the highest version wins, comparing the
/// numeric parts as numbers (`6.10.1` is newer than `6.9.3`).
pub fn find_kernel_version(root: &Path) -> Result<String> {
    let modules = root.join(MODULES_DIR);
    let entries = fs::read_dir(&modules)
        .with_context(|| format!("No kernel modules found at {}", modules.display()))?;

    let newest = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .max_by(|a, b| version_key(a).cmp(&version_key(b)));

    match newest {
        Some(v) => Ok(v),
        None => bail!("No kernel installed under {}", modules.display()),
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum VersionPart {
    Num(u64),
    Text(String),
}

/// Split a release string into runs of digits and runs of everything else.
fn version_key(release: &str) -> Vec<VersionPart> {
    let mut parts = Vec::new();
    let mut rest = release;
    while let Some(first) = rest.chars().next() {
        let digits = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        parts.push(match run.parse() {
            Ok(n) if digits => VersionPart::Num(n),
            _ => VersionPart::Text(run.to_string()),
        });
        rest = tail;
    }
    parts
}

/// Run dracut inside the boot root and return the host path of the image.
fn build_kernel_image(
    runner: &Runner,
    config: &Config,
    kernel: &KernelSpec,
    boot_root: &Path,
) -> Result<PathBuf> {
    let kver = match kernel.version {
        Some(ref version) if !version.trim().is_empty() => version.trim().to_string(),
        _ if runner.is_dry_run() => {
            tracing::info!("Dry run: kernel version not detected");
            "dry-run".to_string()
        }
        _ => find_kernel_version(boot_root)?,
    };
    tracing::info!("Kernel version: {}", kver);

    let image = boot_root.join("boot").join(image_file(kernel));
    let in_jail = in_root_path(boot_root, &image)
        .context("Kernel image path is outside the boot root")?;

    let mut cmd = Cmd::new("dracut").args(["--force", "--uefi", "--kver", kver.as_str()]);
    if !kernel.args.trim().is_empty() {
        cmd = cmd.args(["--kernel-cmdline", kernel.args.as_str()]);
    }
    if let (Some(key), Some(cert)) = (&config.secureboot_key, &config.secureboot_cert) {
        let (key, cert) = stage_secureboot(runner, key, cert, boot_root)?;
        cmd = cmd
            .args(["--uefi-secureboot-key", key.as_str()])
            .args(["--uefi-secureboot-cert", cert.as_str()]);
    }
    cmd = cmd.arg(in_jail).description("Building kernel image");

    runner.run_in_jail(cmd, boot_root)?;
    Ok(image)
}

/// Copy signing material into the boot root; returns the in-jail paths.
fn stage_secureboot(
    runner: &Runner,
    key: &Path,
    cert: &Path,
    boot_root: &Path,
) -> Result<(String, String)> {
    let dir = boot_root.join(SECUREBOOT_DIR);
    create_directory(runner, &dir)?;

    let staged_key = dir.join("db.key");
    let staged_cert = dir.join("db.crt");
    copy_file(runner, key, &staged_key, true)?;
    copy_file(runner, cert, &staged_cert, true)?;

    let key = in_root_path(boot_root, &staged_key).context("Secure boot key outside boot root")?;
    let cert =
        in_root_path(boot_root, &staged_cert).context("Secure boot cert outside boot root")?;
    Ok((key, cert))
}

/// Hand the dracut output (root-owned) to whoever owns the build directory.
fn fix_ownership(runner: &Runner, image: &Path, build_dir: &Path) -> Result<()> {
    let (uid, gid) = match fs::metadata(build_dir) {
        Ok(meta) => (meta.uid(), meta.gid()),
        Err(_) if runner.is_dry_run() => (0, 0),
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("Failed to stat {}", build_dir.display())))
        }
    };

    runner.run(
        Cmd::new("chown")
            .arg(format!("{}:{}", uid, gid))
            .arg_path(image)
            .elevated()
            .description(format!("Changing ownership of {}", image.display())),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_boot_packages_order() {
        let kernel = KernelSpec {
            package: "linux-zen".into(),
            ..KernelSpec::default()
        };
        let packages = boot_packages(&kernel, &["vim".to_string()]);
        assert_eq!(packages, vec!["linux-zen", "base", "dracut", "vim"]);
    }

    #[test]
    fn test_find_kernel_version_picks_highest() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("usr/lib/modules/6.1.0-arch1")).unwrap();
        fs::create_dir_all(temp.path().join("usr/lib/modules/6.6.2-arch1")).unwrap();

        assert_eq!(find_kernel_version(temp.path()).unwrap(), "6.6.2-arch1");
    }

    #[test]
    fn test_find_kernel_version_compares_numerically() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("usr/lib/modules/6.9.3-arch1-1")).unwrap();
        fs::create_dir_all(temp.path().join("usr/lib/modules/6.10.1-arch1-1")).unwrap();
        fs::create_dir_all(temp.path().join("usr/lib/modules/6.6.30-1-lts")).unwrap();

        assert_eq!(find_kernel_version(temp.path()).unwrap(), "6.10.1-arch1-1");
    }

    #[test]
    fn test_version_key_ordering() {
        assert!(version_key("6.10.1") > version_key("6.9.3"));
        assert!(version_key("6.6.2-arch1") > version_key("6.6.2"));
        assert!(version_key("6.6.2-arch2") > version_key("6.6.2-arch1"));
    }

    #[test]
    fn test_find_kernel_version_without_kernel() {
        let temp = TempDir::new().unwrap();
        assert!(find_kernel_version(temp.path()).is_err());

        fs::create_dir_all(temp.path().join(MODULES_DIR)).unwrap();
        assert!(find_kernel_version(temp.path()).is_err());
    }
}
