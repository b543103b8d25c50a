//! Install directories: staging, companion data, promotion.
//!
//! An install is assembled in a private staging directory next to its final
//! location and only moved into place once its record exists, so a losing
//! racer never touches the winner's files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use appdock_core::paths::{self, COMPOSE_FILE, ENV_FILE};
use appdock_core::file_store::write_atomic;

use crate::error::{io_err, InstallError};

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Recursively copy `src` into `dst`, creating `dst` as needed.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<(), InstallError> {
    std::fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
    for entry in std::fs::read_dir(src).map_err(|e| io_err(src, e))? {
        let entry = entry.map_err(|e| io_err(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| io_err(&from, e))?;
        if file_type.is_dir() {
            copy_dir(&from, &to)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
        }
    }
    Ok(())
}

/// A staged install directory; removed on drop unless promoted.
pub struct Staging {
    path: PathBuf,
    target: PathBuf,
    promoted: bool,
}

impl Staging {
    /// Stage the companion data of `app_key@version` for `install_name`.
    pub fn create(
        home: &Path,
        app_key: &str,
        version: &str,
        install_name: &str,
    ) -> Result<Self, InstallError> {
        let target = paths::install_dir(home, app_key, install_name);
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = target.with_file_name(format!(
            ".{install_name}.staging-{}-{seq}",
            std::process::id()
        ));
        let staging = Self {
            path,
            target,
            promoted: false,
        };

        let source = paths::version_resource_dir(home, app_key, version);
        if source.is_dir() {
            copy_dir(&source, &staging.path)?;
        } else {
            tracing::warn!(app = %app_key, %version, "no companion data at {}", source.display());
            std::fs::create_dir_all(&staging.path).map_err(|e| io_err(&staging.path, e))?;
        }
        Ok(staging)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final compose path once promoted.
    pub fn compose_path(&self) -> PathBuf {
        self.target.join(COMPOSE_FILE)
    }

    /// Write the rendered compose unit and `.env` into the staging dir.
    pub fn write_unit(&self, compose: &str, env: &str) -> Result<(), InstallError> {
        write_atomic(&self.path.join(COMPOSE_FILE), compose.as_bytes())?;
        write_atomic(&self.path.join(ENV_FILE), env.as_bytes())?;
        Ok(())
    }

    /// Move the staged directory to its final location.
    ///
    /// Anything already at the target has no live record (the caller holds
    /// the name) and is replaced.
    pub fn promote(mut self) -> Result<PathBuf, InstallError> {
        if self.target.exists() {
            tracing::warn!("replacing orphaned install directory {}", self.target.display());
            std::fs::remove_dir_all(&self.target).map_err(|e| io_err(&self.target, e))?;
        }
        std::fs::rename(&self.path, &self.target).map_err(|e| io_err(&self.target, e))?;
        self.promoted = true;
        Ok(self.target.clone())
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.promoted && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!("failed to clean staging dir {}: {e}", self.path.display());
            }
        }
    }
}

/// Remove an installation's directory; a missing directory is not an error.
pub fn remove_install_dir(dir: &Path) -> Result<(), InstallError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(dir, e)),
    }
}
