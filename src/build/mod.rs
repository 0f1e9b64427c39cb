//! Image assembly.
//!
//! - `context`: fixed layout of a build directory
//! - `lock`: one builder per build directory
//! - `stage`: steps shared by both pipelines (staging, base image, bundling)
//! - `system` / `boot`: the two pipelines

pub mod boot;
pub mod context;
pub mod lock;
pub mod stage;
pub mod system;

pub use context::BuildContext;
pub use lock::BuildLock;

use anyhow::Result;

use crate::config::Config;
use crate::manifest::{ImageType, Manifest};
use crate::process::Runner;

/// Run the pipeline for the manifest's image type.
///
/// Exactly one pipeline runs per call.
pub fn build_image(runner: &Runner, config: &Config, manifest: &Manifest, ctx: &BuildContext) -> Result<()> {
    match manifest.image_type {
        ImageType::System => system::build_system(runner, config, manifest, ctx),
        ImageType::Boot => boot::build_boot(runner, config, manifest, ctx),
    }
}
