//! Narrow persistence contracts for the catalog and for installations.
//!
//! Components receive these as injected trait objects; there are no
//! process-wide store handles. [`crate::file_store::FileStore`] is the
//! bundled implementation.

use crate::error::StoreError;
use crate::types::{
    AppId, AppTag, Application, InstallId, InstallLink, InstallStatus, Installation, Tag,
    Version, VersionId,
};

/// Read access to the catalog plus a transactional write path.
pub trait CatalogStore: Send + Sync {
    fn apps(&self) -> Result<Vec<Application>, StoreError>;
    fn app(&self, id: AppId) -> Result<Application, StoreError>;
    fn app_by_key(&self, key: &str) -> Result<Application, StoreError>;
    fn versions_of(&self, app: AppId) -> Result<Vec<Version>, StoreError>;
    fn version(&self, id: VersionId) -> Result<Version, StoreError>;
    fn tags(&self) -> Result<Vec<Tag>, StoreError>;
    fn app_tags(&self) -> Result<Vec<AppTag>, StoreError>;
    /// Catalog release recorded by the last successful sync.
    fn catalog_version(&self) -> Result<Option<String>, StoreError>;

    /// Run `work` as one transaction.
    ///
    /// Writes become visible only if `work` returns `Ok` and the commit
    /// succeeds; any error leaves the persisted catalog untouched.
    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn CatalogTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

/// Write operations available inside [`CatalogStore::transaction`].
pub trait CatalogTx {
    /// Insert never-persisted applications, assigning their ids in place.
    fn insert_apps(&mut self, apps: &mut [Application]) -> Result<(), StoreError>;
    fn save_app(&mut self, app: &Application) -> Result<(), StoreError>;
    fn delete_all_tags(&mut self) -> Result<(), StoreError>;
    /// Insert tags, assigning their ids in place.
    fn insert_tags(&mut self, tags: &mut [Tag]) -> Result<(), StoreError>;
    fn delete_all_app_tags(&mut self) -> Result<(), StoreError>;
    fn insert_app_tags(&mut self, rows: &[AppTag]) -> Result<(), StoreError>;
    /// Insert never-persisted versions, assigning their ids in place.
    fn insert_versions(&mut self, versions: &mut [Version]) -> Result<(), StoreError>;
    fn update_version(&mut self, version: &Version) -> Result<(), StoreError>;
    fn set_catalog_version(&mut self, version: &str) -> Result<(), StoreError>;
}

/// Persistence contract for installations and their links.
pub trait InstallStore: Send + Sync {
    fn installs(&self) -> Result<Vec<Installation>, StoreError>;
    fn install(&self, id: InstallId) -> Result<Installation, StoreError>;
    fn install_by_name(&self, name: &str) -> Result<Option<Installation>, StoreError>;

    /// Insert a new installation and assign its id.
    ///
    /// Name and host-port uniqueness are checked under the same lock as the
    /// insert, so a racing install surfaces as [`StoreError::Conflict`].
    fn create_install(&self, install: &mut Installation) -> Result<(), StoreError>;
    fn update_install(&self, install: &Installation) -> Result<(), StoreError>;

    /// Move an installation to `status`, validating the state machine.
    fn set_status(
        &self,
        id: InstallId,
        status: InstallStatus,
        message: Option<String>,
    ) -> Result<Installation, StoreError>;

    /// Delete an installation together with the links it owns.
    fn delete_install(&self, id: InstallId) -> Result<(), StoreError>;

    fn links(&self) -> Result<Vec<InstallLink>, StoreError>;
    fn insert_link(&self, link: &InstallLink) -> Result<(), StoreError>;
    /// Replace the link owned by `link.install_id` for `link.env_key`.
    fn update_link(&self, link: &InstallLink) -> Result<(), StoreError>;
}
