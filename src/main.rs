//! shardimg - immutable image builder.
//!
//! Builds "system" images (full root filesystem) and "boot" images (signed
//! kernel) from a manifest and hands them to flatpak-builder.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use shardimg::commands::{self, BuildOptions, InitOptions};
use shardimg::config::Config;
use shardimg::error::exit_code_of;
use shardimg::manifest::ImageType;

#[derive(Parser)]
#[command(name = "shardimg")]
#[command(about = "Immutable system and boot image builder")]
#[command(
    after_help = "QUICK START:\n  shardimg init img --name test --id al.getcryst.test --version 1 --author me --type system\n  shardimg preflight  Check host tools\n  shardimg build      Build from ./manifest.json"
)]
struct Cli {
    /// Debug logging (same as DEBUG=1)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image from a manifest
    Build {
        /// Path to the manifest file
        #[arg(long, default_value = "manifest.json")]
        manifest: PathBuf,
        /// Path to the build directory
        #[arg(long, default_value = "build")]
        build_dir: PathBuf,
        /// Keep the build directory after the build
        #[arg(long)]
        keep: bool,
        /// Repository the bundle is committed to (overrides SHARDIMG_REPO)
        #[arg(long)]
        repo: Option<PathBuf>,
    },

    /// Write a new manifest into a directory
    Init {
        directory: PathBuf,
        #[arg(long)]
        name: String,
        /// Reverse-domain id, e.g. al.getcryst.test
        #[arg(long)]
        id: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        author: String,
        #[arg(long = "type", value_enum)]
        image_type: TypeArg,
        /// Base container image
        #[arg(long, default_value = "")]
        base: String,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Check host tools and signing keys
    Preflight {
        /// Exit non-zero if any check fails
        #[arg(long)]
        strict: bool,
        #[arg(long, default_value = "build")]
        build_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show a validated manifest
    Manifest {
        #[arg(long, default_value = "manifest.json")]
        manifest: PathBuf,
    },
    /// Show current configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    System,
    Boot,
}

impl From<TypeArg> for ImageType {
    fn from(t: TypeArg) -> Self {
        match t {
            TypeArg::System => ImageType::System,
            TypeArg::Boot => ImageType::Boot,
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Record SIGINT/SIGTERM instead of dying, so mount guards still unwind.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    let installed = ctrlc::set_handler(move || {
        if !raised.swap(true, Ordering::SeqCst) {
            tracing::warn!("Interrupted, releasing mounts before exit");
        }
    });
    if let Err(e) = installed {
        tracing::warn!("Failed to install signal handler: {}", e);
    }
    flag
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load(&PathBuf::from("."));
    init_logging(cli.verbose || config.debug);

    if let Err(e) = run(cli, config) {
        tracing::error!("{:#}", e);
        std::process::exit(exit_code_of(&e));
    }
}

fn run(cli: Cli, mut config: Config) -> Result<()> {
    match cli.command {
        Commands::Build {
            manifest,
            build_dir,
            keep,
            repo,
        } => {
            if let Some(repo) = repo {
                config.repo = repo;
            }
            commands::cmd_build(
                &config,
                &BuildOptions {
                    manifest,
                    build_dir,
                    keep,
                },
                install_interrupt_handler(),
            )?;
        }

        Commands::Init {
            directory,
            name,
            id,
            version,
            author,
            image_type,
            base,
        } => {
            commands::cmd_init(&InitOptions {
                directory,
                name,
                id,
                version,
                author,
                image_type: image_type.into(),
                base,
            })?;
        }

        Commands::Show { what } => match what {
            ShowTarget::Manifest { manifest } => {
                commands::cmd_show(commands::ShowTarget::Manifest, &manifest, &config)?
            }
            ShowTarget::Config => {
                commands::cmd_show(commands::ShowTarget::Config, &PathBuf::new(), &config)?
            }
        },

        Commands::Preflight { strict, build_dir } => {
            commands::cmd_preflight(&config, &build_dir, strict)?;
        }
    }

    Ok(())
}
