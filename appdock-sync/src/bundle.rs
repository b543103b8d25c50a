//! Bundle unpacking: gzip'd tarball to an expanded catalog directory.
//!
//! The archive is extracted into a sibling staging directory first; the live
//! directory is only swapped once extraction succeeded and a `list.json` was
//! found, so a corrupt download never clobbers the previous catalog files.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use appdock_core::paths::LIST_FILE;

use crate::error::{io_err, SyncError};

fn sibling(dest: &Path, suffix: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    dest.with_file_name(format!("{name}.{suffix}"))
}

fn remove_dir_if_exists(path: &Path) -> Result<(), SyncError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| io_err(path, e))?;
    }
    Ok(())
}

/// Find the directory holding `list.json`: the staging root itself, or its
/// only subdirectory (archives are commonly rooted at `apps/`).
fn locate_root(staging: &Path) -> Result<PathBuf, SyncError> {
    if staging.join(LIST_FILE).is_file() {
        return Ok(staging.to_path_buf());
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(staging).map_err(|e| io_err(staging, e))? {
        let path = entry.map_err(|e| io_err(staging, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    match dirs.as_slice() {
        [only] if only.join(LIST_FILE).is_file() => Ok(only.clone()),
        _ => Err(SyncError::BundleLayout(format!(
            "no {LIST_FILE} at the archive root or in a single top-level directory"
        ))),
    }
}

/// Extract `archive` (`.tar.gz`) and install its contents at `dest`.
pub fn unpack(archive: &Path, dest: &Path) -> Result<PathBuf, SyncError> {
    let staging = sibling(dest, "staging");
    remove_dir_if_exists(&staging)?;
    std::fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;

    let result = extract_and_swap(archive, &staging, dest);
    let _ = std::fs::remove_dir_all(&staging);
    result
}

fn extract_and_swap(archive: &Path, staging: &Path, dest: &Path) -> Result<PathBuf, SyncError> {
    let file = File::open(archive).map_err(|e| io_err(archive, e))?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(staging)
        .map_err(|e| io_err(archive, e))?;
    let root = locate_root(staging)?;

    let previous = sibling(dest, "old");
    remove_dir_if_exists(&previous)?;
    if dest.exists() {
        std::fs::rename(dest, &previous).map_err(|e| io_err(dest, e))?;
    } else if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Err(e) = std::fs::rename(&root, dest) {
        if previous.exists() {
            let _ = std::fs::rename(&previous, dest);
        }
        return Err(io_err(dest, e));
    }
    remove_dir_if_exists(&previous)?;
    tracing::info!("unpacked {} into {}", archive.display(), dest.display());
    Ok(dest.to_path_buf())
}
