//! Shared sync pipeline entrypoint used by CLI and daemon.

use std::path::Path;

use serde::Serialize;

use appdock_core::{paths, CatalogStore, Settings};

use crate::bundle;
use crate::error::{io_err, SyncError};
use crate::manifest::is_path_component;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::updater::{check_for_update, Endpoints, ManifestSource, UpdateDescriptor};

/// Outcome of [`sync_app_list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    UpToDate { remote_version: String },
    Synced {
        remote_version: String,
        report: ReconcileReport,
    },
}

/// Ask the remote whether a newer catalog exists.
pub fn check(
    store: &dyn CatalogStore,
    source: &dyn ManifestSource,
    settings: &Settings,
) -> Result<UpdateDescriptor, SyncError> {
    let endpoints = Endpoints::from_settings(settings)?;
    let current = store.catalog_version()?;
    check_for_update(source, &endpoints, current.as_deref())
}

/// Pull and reconcile the remote catalog if it is newer than the local one.
///
/// The bundle is downloaded into `tmp/`, unpacked over `resource/apps`, and
/// reconciled; the remote release is recorded in the same transaction.
pub fn sync_app_list(
    home: &Path,
    store: &dyn CatalogStore,
    source: &dyn ManifestSource,
    settings: &Settings,
) -> Result<SyncOutcome, SyncError> {
    let update = check(store, source, settings)?;
    let Some(url) = update.download_url.filter(|_| update.can_update) else {
        tracing::info!(
            "the latest version is [{}]; the app store is already up to date",
            update.remote_version
        );
        return Ok(SyncOutcome::UpToDate {
            remote_version: update.remote_version,
        });
    };

    if !is_path_component(&update.remote_version) {
        return Err(SyncError::UnsafePath {
            field: "catalog version",
            value: update.remote_version,
        });
    }

    let tmp = paths::tmp_dir(home);
    std::fs::create_dir_all(&tmp).map_err(|e| io_err(&tmp, e))?;
    let archive = tmp.join(format!("apps-{}.tar.gz", update.remote_version));
    source.download(&url, &archive)?;

    let resource = paths::resource_dir(home);
    let unpacked = bundle::unpack(&archive, &resource);
    let _ = std::fs::remove_file(&archive);
    unpacked?;

    let report =
        Reconciler::new(store).reconcile_release(&resource, Some(&update.remote_version))?;
    Ok(SyncOutcome::Synced {
        remote_version: update.remote_version,
        report,
    })
}
