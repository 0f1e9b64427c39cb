//! FsGuard integrity manifest.
//!
//! Walks the configured paths of an image root, records a checksum and the
//! SUID flag of every regular file, signs the resulting list with minisign
//! and appends the signature trailer to the FsGuard binary inside the image.
//!
//! File list format, one entry per line:
//!
//! ```text
//! /usr/bin/sudo 3f786850e387550fdab836ed7e6dc881de23001b true
//! ```
//!
//! Trailer appended to the binary:
//!
//! ```text
//! "\n----begin attach----" <minisig bytes> "----begin second attach----" <public key>
//! ```
//!
//! The trailer is not length-prefixed. A public key containing a delimiter
//! would make it ambiguous; minisign keys are base64 and cannot.

use anyhow::{bail, Context, Result};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::build::BuildContext;
use crate::common::{self, create_directory, delete_file, in_root_path, resolve_in_root};
use crate::config::Config;
use crate::error::BuildError;
use crate::manifest::Manifest;
use crate::process::{Cmd, Runner};

/// First trailer delimiter.
pub const ATTACH_BEGIN: &[u8] = b"\n----begin attach----";
/// Second trailer delimiter, between signature and public key.
pub const ATTACH_SECOND: &[u8] = b"----begin second attach----";

/// One line of the file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsGuardEntry {
    /// Path inside the image, with a leading `/`
    pub path: String,
    /// Hex SHA-1 of the contents
    pub checksum: String,
    pub suid: bool,
}

impl fmt::Display for FsGuardEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.checksum, self.suid)
    }
}

/// Hex SHA-1 of a file, streamed.
pub fn checksum(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Scan `paths` under `root` and collect one entry per regular file.
///
/// Directory entries are visited in file-name order, so an unchanged tree
/// always yields the same list. Symlinks are resolved with `root` as `/`;
/// each resolved file is recorded once. `skip` (the FsGuard binary) is never
/// recorded. Dangling links and files that disappear mid-walk are skipped.
pub fn scan(root: &Path, paths: &[PathBuf], skip: &Path) -> Result<Vec<FsGuardEntry>> {
    let skip = resolve_in_root(root, skip);
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut entries = Vec::new();

    for scan_path in paths {
        let start = resolve_in_root(root, scan_path)
            .with_context(|| format!("Cannot resolve FsGuard path {}", scan_path.display()))?;
        if fs::symlink_metadata(&start).is_err() {
            tracing::warn!("FsGuard path {} does not exist, skipping", scan_path.display());
            continue;
        }

        for entry in WalkDir::new(&start).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Some(resolved) = resolve_in_root(root, rel) else {
                tracing::warn!("Skipping {}: unresolvable symlink", entry.path().display());
                continue;
            };
            if skip.as_deref() == Some(resolved.as_path()) {
                continue;
            }

            match fs::metadata(&resolved) {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => continue,
                Err(_) => {
                    tracing::debug!("Skipping dangling link {}", entry.path().display());
                    continue;
                }
            }
            if !seen.insert(resolved.clone()) {
                continue;
            }

            let sum = match checksum(&resolved) {
                Ok(sum) => sum,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::warn!("{} disappeared during scan", resolved.display());
                    continue;
                }
                Err(e) => {
                    return Err(BuildError::io(format!("Failed to hash {}", resolved.display()), e).into())
                }
            };
            let suid = common::is_suid(&resolved)?;
            let path = in_root_path(root, &resolved)
                .with_context(|| format!("{} is outside the image root", resolved.display()))?;

            entries.push(FsGuardEntry {
                path,
                checksum: sum,
                suid,
            });
        }
    }

    Ok(entries)
}

/// Render entries as the plain-text file list.
pub fn render(entries: &[FsGuardEntry]) -> String {
    entries.iter().map(|e| format!("{}\n", e)).collect()
}

/// Build the signature trailer from the raw signature and the public key file.
pub fn signature_blob(signature: &[u8], public_key: &str) -> Result<Vec<u8>> {
    let key = public_key
        .lines()
        .nth(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .context("Public key file has no key line")?;

    let key_bytes = key.as_bytes();
    if contains(key_bytes, b"----begin") {
        tracing::warn!("Public key contains a trailer delimiter; the trailer will be ambiguous");
    }

    let mut blob =
        Vec::with_capacity(ATTACH_BEGIN.len() + signature.len() + ATTACH_SECOND.len() + key.len());
    blob.extend_from_slice(ATTACH_BEGIN);
    blob.extend_from_slice(signature);
    blob.extend_from_slice(ATTACH_SECOND);
    blob.extend_from_slice(key_bytes);
    Ok(blob)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Generate, sign and embed the FsGuard file list for a built root.
pub fn apply(runner: &Runner, config: &Config, manifest: &Manifest, ctx: &BuildContext) -> Result<()> {
    let entries = scan(&ctx.root, &manifest.fsguard_paths, &manifest.fsguard_binary)?;
    tracing::info!("FsGuard: {} files recorded", entries.len());

    let file_list = ctx.file_list();
    if let Some(parent) = file_list.parent() {
        create_directory(runner, parent)?;
    }
    if file_list.exists() {
        tracing::warn!("Overwriting existing file list {}", file_list.display());
    }
    common::write_file(runner, &file_list, render(&entries))?;

    let secret_key = config.secret_key();
    let public_key = config.public_key();
    for key in [&secret_key, &public_key] {
        if !key.exists() {
            return Err(BuildError::MissingSigningKey { path: key.clone() }.into());
        }
    }

    let signature = ctx.signature();
    if signature.exists() {
        delete_file(runner, &signature, true)?;
    }
    runner.run(
        Cmd::new("minisign")
            .arg("-S")
            .arg("-s")
            .arg_path(&secret_key)
            .arg("-m")
            .arg_path(&file_list)
            .arg("-x")
            .arg_path(&signature)
            .description("Signing FsGuard file list"),
    )?;

    if runner.is_dry_run() {
        tracing::info!("Dry run: skipping signature embedding");
        return Ok(());
    }

    let sig_bytes = common::read_file(&signature)?;
    let pub_text = fs::read_to_string(&public_key)
        .with_context(|| format!("Failed to read {}", public_key.display()))?;
    let blob = signature_blob(&sig_bytes, &pub_text)?;

    let binary = resolve_in_root(&ctx.root, &manifest.fsguard_binary)
        .context("Cannot resolve FsGuard binary")?;
    if !binary.is_file() {
        bail!(
            "FsGuard binary {} not found in image root",
            manifest.fsguard_binary.display()
        );
    }
    common::append_file(runner, &binary, blob)?;
    tracing::info!("FsGuard signature appended to {}", binary.display());

    Ok(())
}
