//! Typed build failures.
//!
//! Library code returns `anyhow::Result`; the variants here are carried inside
//! `anyhow::Error` and recovered in `main` to pick the process exit code.

use std::path::PathBuf;

/// Exit code for manifest validation failures and missing key material.
pub const EXIT_CONFIG: i32 = 78;
/// Exit code when another builder holds the build directory.
pub const EXIT_LOCKED: i32 = 75;
/// Exit code when an external program could not be started.
pub const EXIT_SPAWN: i32 = 127;
/// Exit code after SIGINT or SIGTERM, as a shell reports it.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error("signing key material not found at {}", path.display())]
    MissingSigningKey { path: PathBuf },

    #[error("{description} failed with returncode {code}")]
    CommandFailed { description: String, code: i32 },

    #[error("failed to execute '{program}'. Is it installed?")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{description} interrupted")]
    Interrupted { description: String },

    #[error("build directory {} is in use by another build", path.display())]
    Locked { path: PathBuf },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidManifest { .. } | Self::MissingSigningKey { .. } => EXIT_CONFIG,
            // A signal-terminated child reports -1 and a zero code cannot be a failure.
            Self::CommandFailed { code, .. } if *code > 0 && *code < 256 => *code,
            Self::CommandFailed { .. } => 1,
            Self::Spawn { .. } => EXIT_SPAWN,
            Self::Interrupted { .. } => EXIT_INTERRUPTED,
            Self::Locked { .. } => EXIT_LOCKED,
            Self::Io { .. } => 1,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Exit code for an arbitrary error chain.
///
/// Walks the chain looking for a [`BuildError`]; anything else exits with 1.
pub fn exit_code_of(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<BuildError>())
        .map(BuildError::exit_code)
        .unwrap_or(1)
}
