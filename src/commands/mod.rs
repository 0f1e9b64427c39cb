//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build an image from a manifest
//! - `init` - Write a fresh manifest
//! - `show` - Display manifest or configuration
//! - `preflight` - Run preflight checks

pub mod build;
pub mod init;
mod preflight;
pub mod show;

pub use build::{cmd_build, BuildOptions};
pub use init::{cmd_init, InitOptions};
pub use preflight::cmd_preflight;
pub use show::{cmd_show, ShowTarget};
