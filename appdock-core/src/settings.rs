//! User settings persisted at `<home>/.appdock/config.yaml`.
//!
//! A missing file yields [`Settings::default`]; unknown fields are ignored and
//! absent fields take their defaults, so older config files keep loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::paths::config_path;

pub const DEFAULT_MANIFEST_URL: &str =
    "{{ repo_url }}/{{ mode }}/{{ system_version }}/appstore/apps.json";
pub const DEFAULT_BUNDLE_URL: &str =
    "{{ repo_url }}/{{ mode }}/{{ system_version }}/appstore/apps-{{ version }}.tar.gz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the app store repository.
    pub repo_url: String,
    /// Release channel, e.g. `stable` or `beta`.
    pub mode: String,
    /// Product version the catalog is published for.
    pub system_version: String,
    pub container_prefix: String,
    pub default_network: String,
    pub launch_timeout_secs: u64,
    /// Interval of the daemon's periodic catalog sync; `0` disables it.
    pub sync_interval_secs: u64,
    pub manifest_url_template: String,
    pub bundle_url_template: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_url: "https://appstore.example.com".to_string(),
            mode: "stable".to_string(),
            system_version: "v1.0.0".to_string(),
            container_prefix: "appdock-".to_string(),
            default_network: "appdock-network".to_string(),
            launch_timeout_secs: 600,
            sync_interval_secs: 24 * 60 * 60,
            manifest_url_template: DEFAULT_MANIFEST_URL.to_string(),
            bundle_url_template: DEFAULT_BUNDLE_URL.to_string(),
        }
    }
}

impl Settings {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync_interval_secs > 0).then(|| Duration::from_secs(self.sync_interval_secs))
    }
}

/// Load settings from `<home>/.appdock/config.yaml`.
pub fn load_at(home: &Path) -> Result<Settings, StoreError> {
    let path = config_path(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// Atomically save settings: `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, settings: &Settings) -> Result<(), StoreError> {
    let path = config_path(home);
    let yaml = serde_yaml::to_string(settings).map_err(|e| StoreError::Serialize(e.to_string()))?;
    crate::file_store::write_atomic(&path, yaml.as_bytes())
}
