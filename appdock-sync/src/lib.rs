//! # appdock-sync
//!
//! Keeps the local catalog in step with the remote app store.
//!
//! [`pipeline::sync_app_list`] checks the remote release, downloads and
//! unpacks the bundle, and hands it to the [`Reconciler`]. [`Catalog`] serves
//! the read side.

pub mod bundle;
pub mod catalog;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod reconcile;
pub mod updater;

pub use catalog::{AppDetail, AppQuery, AppSummary, Catalog, VersionDetail};
pub use error::SyncError;
pub use manifest::{AppDefine, AppList, TagDefine};
pub use pipeline::{sync_app_list, SyncOutcome};
pub use reconcile::{ReconcileReport, Reconciler};
pub use updater::{check_for_update, Endpoints, HttpSource, ManifestSource, UpdateDescriptor};
