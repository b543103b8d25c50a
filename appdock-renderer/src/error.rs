//! Error types for appdock-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from compose and text template rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The compose template is not valid YAML or has no `services` mapping.
    #[error("compose template is malformed: {0}")]
    TemplateMalformed(String),

    /// The install name cannot be used verbatim as a compose project name.
    #[error("'{0}' is not a valid compose project name (lowercase letters, digits, '-', '_')")]
    InvalidProjectName(String),

    /// I/O failure while loading user template overrides.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// YAML serialization of the rewritten compose document failed.
    #[error("compose serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
