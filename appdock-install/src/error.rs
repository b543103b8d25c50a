//! Error types for appdock-install.

use std::path::PathBuf;

use thiserror::Error;

use appdock_core::{Conflict, InstallStatus, StoreError};
use appdock_renderer::RenderError;

use crate::docker::CommandError;

/// All errors that can arise from installing or managing installations.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The default container network could not be provisioned.
    #[error("network setup failed for '{network}': {cause}")]
    NetworkSetup { network: String, cause: String },

    #[error("an installation named '{0}' already exists")]
    NameConflict(String),

    #[error("port {0} is already in use")]
    PortConflict(u16),

    #[error("invalid parameter {key}: {reason}")]
    InvalidParam { key: String, reason: String },

    #[error("requirement unmet: {0}")]
    RequirementUnmet(String),

    #[error("application '{app}' allows at most {limit} installation(s)")]
    LimitExceeded { app: String, limit: u32 },

    /// The installation is not in a state that permits `action`.
    #[error("cannot {action} '{name}' while it is {status}")]
    InvalidState {
        name: String,
        status: InstallStatus,
        action: &'static str,
    },

    /// The version's `config.json` is not a valid parameter schema.
    #[error("parameter schema is invalid: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("docker: {0}")]
    Docker(#[from] CommandError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Uniqueness violations caught by the store surface as the same
/// user-facing conflicts as the pre-checks.
impl From<StoreError> for InstallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(Conflict::Name(name)) => InstallError::NameConflict(name),
            StoreError::Conflict(Conflict::Port(port)) => InstallError::PortConflict(port),
            other => InstallError::Store(other),
        }
    }
}

/// Convenience constructor for [`InstallError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> InstallError {
    InstallError::Io {
        path: path.into(),
        source,
    }
}
