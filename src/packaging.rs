//! Packaging manifest for the external bundler (flatpak-builder).
//!
//! The manifest is derived entirely from the image manifest and the build
//! directory. It is regenerated on every build and never edited by hand.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use crate::build::BuildContext;
use crate::common;
use crate::config::Config;
use crate::manifest::Manifest;
use crate::process::{Cmd, Runner};

/// Packaging fragment extensions picked up from `modules/`.
const MODULE_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Descriptor consumed by the bundler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackagingManifest {
    #[serde(rename = "app-id")]
    pub app_id: String,
    pub runtime: String,
    #[serde(rename = "runtime-version")]
    pub runtime_version: String,
    pub sdk: String,
    /// Fragment paths (strings) followed by the root module (object)
    pub modules: Vec<serde_json::Value>,
}

impl PackagingManifest {
    /// Build the descriptor for `manifest` from the contents of `ctx`.
    pub fn generate(manifest: &Manifest, config: &Config, ctx: &BuildContext) -> Result<Self> {
        let mut modules: Vec<serde_json::Value> = extra_modules(&ctx.modules)?
            .into_iter()
            .map(|p| json!(p.to_string_lossy()))
            .collect();
        modules.push(root_module());

        Ok(Self {
            app_id: manifest.id.clone(),
            runtime: config.runtime.clone(),
            runtime_version: config.runtime_version.clone(),
            sdk: config.sdk.clone(),
            modules,
        })
    }

    /// Write to `build/<name>.yml`. The content is JSON, which YAML accepts.
    pub fn write(&self, runner: &Runner, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        common::write_file(runner, path, text)
            .with_context(|| format!("Failed to write packaging manifest {}", path.display()))
    }
}

/// The module that copies `root/` and `include/*` into the final payload.
fn root_module() -> serde_json::Value {
    json!({
        "name": "root",
        "buildsystem": "simple",
        "build-options": {
            "strip": false,
            "no-debuginfo": true
        },
        "build-commands": [
            "cp -aRp root /app/root",
            "cp -aRp include/* /app/root/"
        ],
        "sources": [
            { "type": "dir", "path": "./root", "dest": "root" },
            { "type": "dir", "path": "./include", "dest": "include" }
        ]
    })
}

/// Packaging fragments in `modules_dir`, as absolute paths in name order.
pub fn extra_modules(modules_dir: &Path) -> Result<Vec<PathBuf>> {
    if !modules_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(modules_dir)
        .with_context(|| format!("Failed to list {}", modules_dir.display()))?
    {
        let path = entry?.path();
        let is_fragment = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| MODULE_EXTENSIONS.contains(&e));
        if is_fragment {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Hand the packaging manifest to flatpak-builder.
pub fn build_bundle(
    runner: &Runner,
    manifest: &Manifest,
    config: &Config,
    ctx: &BuildContext,
) -> Result<()> {
    runner.run(
        Cmd::new("flatpak-builder")
            .arg("--force-clean")
            .arg(format!("--repo={}", config.repo.display()))
            .arg_path(&ctx.flatbuild())
            .arg_path(&ctx.packaging_manifest(&manifest.name))
            .dir(&ctx.build_dir)
            .description("Building Flatpak"),
    )?;
    Ok(())
}
