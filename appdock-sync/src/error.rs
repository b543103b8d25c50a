//! Error types for appdock-sync.

use std::path::PathBuf;

use thiserror::Error;

use appdock_core::StoreError;
use appdock_renderer::RenderError;

/// All errors that can arise from catalog sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the catalog store; the sync transaction was rolled back.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A URL template failed to render.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// The remote manifest or bundle could not be fetched.
    #[error("transport failure for {url}: {message}")]
    Transport { url: String, message: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `list.json` (or a remote descriptor) is not valid JSON.
    #[error("manifest JSON error at {origin}: {source}")]
    Manifest {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// A remote value that ends up in a local path is not a plain file name.
    #[error("remote {field} '{value}' is not a plain path component")]
    UnsafePath { field: &'static str, value: String },

    /// The unpacked bundle does not contain a `list.json`.
    #[error("bundle layout error: {0}")]
    BundleLayout(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
