//! shardimg library: builds immutable system and boot images from a
//! declarative manifest.
//!
//! The binary is a thin CLI over [`commands`]; everything else is exposed for
//! integration testing with a recording [`process::Executor`].

pub mod build;
pub mod commands;
pub mod common;
pub mod config;
pub mod error;
pub mod fsguard;
pub mod jail;
pub mod manifest;
pub mod mount;
pub mod packaging;
pub mod preflight;
pub mod process;
pub mod timing;
