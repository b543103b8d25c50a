//! `list.json`: the catalog manifest at the root of an unpacked bundle.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use appdock_core::types::{AppType, UNRANKED};

use crate::error::{io_err, SyncError};

/// The whole manifest: catalog release, global tags, application list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppList {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<TagDefine>,
    #[serde(default)]
    pub items: Vec<AppDefine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefine {
    pub key: String,
    pub name: String,
}

/// One application descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDefine {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub recommend: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(rename = "type", default)]
    pub app_type: AppType,
    #[serde(default)]
    pub short_desc: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub limit: u32,
}

impl AppDefine {
    /// Rank to persist; non-positive ranks mean "unranked".
    pub fn rank(&self) -> u32 {
        if self.recommend > 0 {
            u32::try_from(self.recommend).unwrap_or(UNRANKED)
        } else {
            UNRANKED
        }
    }
}

impl AppList {
    pub fn from_json(origin: &str, bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(|source| SyncError::Manifest {
            origin: origin.to_string(),
            source,
        })
    }

    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
        Self::from_json(&path.display().to_string(), &bytes)
    }
}

/// Whether a manifest-supplied `key`, version or release string can be joined
/// onto a directory without leaving it: exactly one normal path component.
pub fn is_path_component(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !value.contains(['/', '\\'])
}
