//! On-disk layout under `<home>/.appdock/`.
//!
//! ```text
//! ~/.appdock/
//!   config.yaml
//!   db/catalog.json
//!   db/installs.json
//!   resource/apps/                  expanded catalog bundle
//!   apps/<app key>/<install name>/  one directory per installation
//!   tmp/
//!   daemon.sock
//!   logs/
//! ```
//!
//! Every function takes an explicit `home`; only [`home`] touches the
//! environment.

use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub const COMPOSE_FILE: &str = "docker-compose.yml";
pub const ENV_FILE: &str = ".env";
pub const LIST_FILE: &str = "list.json";

pub fn appdock_root(home: &Path) -> PathBuf {
    home.join(".appdock")
}

pub fn config_path(home: &Path) -> PathBuf {
    appdock_root(home).join("config.yaml")
}

pub fn db_dir(home: &Path) -> PathBuf {
    appdock_root(home).join("db")
}

/// Root of the expanded catalog bundle (`list.json` lives here).
pub fn resource_dir(home: &Path) -> PathBuf {
    appdock_root(home).join("resource").join("apps")
}

/// `<resource>/<app key>/versions/<version>/`
pub fn version_resource_dir(home: &Path, app_key: &str, version: &str) -> PathBuf {
    resource_dir(home).join(app_key).join("versions").join(version)
}

pub fn installs_root(home: &Path) -> PathBuf {
    appdock_root(home).join("apps")
}

/// `<home>/.appdock/apps/<app key>/<install name>/`
pub fn install_dir(home: &Path, app_key: &str, install_name: &str) -> PathBuf {
    installs_root(home).join(app_key).join(install_name)
}

pub fn compose_path(home: &Path, app_key: &str, install_name: &str) -> PathBuf {
    install_dir(home, app_key, install_name).join(COMPOSE_FILE)
}

pub fn tmp_dir(home: &Path) -> PathBuf {
    appdock_root(home).join("tmp")
}

pub fn socket_path(home: &Path) -> PathBuf {
    appdock_root(home).join("daemon.sock")
}

pub fn logs_dir(home: &Path) -> PathBuf {
    appdock_root(home).join("logs")
}

/// Resolve the current user's home directory.
pub fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}
