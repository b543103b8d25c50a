//! appdock core library: domain types, version ordering, store contracts,
//! the file-backed store, settings, and on-disk paths.
//!
//! - [`types`]: catalog records, installations, status machine
//! - [`version`]: dotted version comparison
//! - [`store`]: [`CatalogStore`] / [`InstallStore`] contracts
//! - [`file_store`]: JSON-file implementation of both
//! - [`settings`]: `config.yaml`
//! - [`paths`]: `~/.appdock` layout

pub mod error;
pub mod file_store;
pub mod paths;
pub mod settings;
pub mod store;
pub mod types;
pub mod version;

pub use error::{Conflict, StoreError};
pub use file_store::FileStore;
pub use settings::Settings;
pub use store::{CatalogStore, CatalogTx, InstallStore};
pub use types::{
    AppId, AppTag, AppType, Application, InstallId, InstallLink, InstallStatus, Installation,
    Params, Tag, TagId, Version, VersionId,
};
