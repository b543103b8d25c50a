//! Error types for appdock-core.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::InstallStatus;

/// A uniqueness constraint rejected a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// An installation with this name already exists.
    Name(String),
    /// Another installation already binds this host port.
    Port(u16),
    /// A catalog record with this natural key already exists.
    Key { entity: &'static str, key: String },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Name(name) => write!(f, "installation name '{name}' is already taken"),
            Conflict::Port(port) => write!(f, "port {port} is already bound by an installation"),
            Conflict::Key { entity, key } => write!(f, "{entity} '{key}' already exists"),
        }
    }
}

/// All errors that can arise from store, settings, and path operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted JSON document could not be parsed.
    #[error("failed to parse store document at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Settings YAML could not be parsed; includes path and line context.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Serialization failure on the write path.
    #[error("serialization error: {0}")]
    Serialize(String),

    /// A referenced record does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness constraint was violated; the write was not applied.
    #[error("conflict: {0}")]
    Conflict(Conflict),

    /// The installation state machine forbids this status change.
    #[error("installation {name} cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: InstallStatus,
        to: InstallStatus,
    },

    /// A transaction body rejected its own work; nothing was persisted.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
