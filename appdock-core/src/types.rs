//! Domain types for the appdock catalog and installations.
//!
//! Identity fields are `Option<_>`: `None` means the record has never been
//! persisted and will receive an id from the store on insert.
//! All path fields use `PathBuf`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recommendation rank given to applications the manifest does not rank.
pub const UNRANKED: u32 = 9999;

/// Parameter key carrying the HTTP host port of an installation.
pub const PARAM_HTTP_PORT: &str = "PANEL_APP_PORT_HTTP";

/// Parameter key carrying the HTTPS host port of an installation.
pub const PARAM_HTTPS_PORT: &str = "PANEL_APP_PORT_HTTPS";

/// User-supplied install parameters, keyed by env name.
pub type Params = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

id_newtype!(
    /// Store-assigned identity of an [`Application`].
    AppId
);
id_newtype!(
    /// Store-assigned identity of a [`Version`].
    VersionId
);
id_newtype!(
    /// Store-assigned identity of a [`Tag`].
    TagId
);
id_newtype!(
    /// Store-assigned identity of an [`Installation`].
    InstallId
);

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Category of an application as declared by the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Website,
    Runtime,
    Tool,
    #[default]
    #[serde(other)]
    Other,
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppType::Website => write!(f, "website"),
            AppType::Runtime => write!(f, "runtime"),
            AppType::Tool => write!(f, "tool"),
            AppType::Other => write!(f, "other"),
        }
    }
}

/// Lifecycle state of an [`Installation`].
///
/// ```text
/// Installing ─┬─> Running ─┐
///             └─> Error ───┴─> Removing ─> (record deleted)
/// Error ─> Installing        (relaunch)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Installing,
    Running,
    Error,
    Removing,
}

impl InstallStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: InstallStatus) -> bool {
        use InstallStatus::*;
        matches!(
            (self, next),
            (Installing, Running)
                | (Installing, Error)
                | (Running, Removing)
                | (Error, Removing)
                | (Error, Installing)
        )
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStatus::Installing => write!(f, "installing"),
            InstallStatus::Running => write!(f, "running"),
            InstallStatus::Error => write!(f, "error"),
            InstallStatus::Removing => write!(f, "removing"),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog records
// ---------------------------------------------------------------------------

/// A catalog entry for one installable product, independent of version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub id: Option<AppId>,
    /// Catalog-unique, immutable identity.
    pub key: String,
    pub name: String,
    /// Logo bytes, base64 encoded.
    #[serde(default)]
    pub icon: String,
    /// Lower is more prominent; [`UNRANKED`] when the manifest gives none.
    pub recommend: u32,
    #[serde(default)]
    pub app_type: AppType,
    #[serde(default)]
    pub short_desc: String,
    /// Tag keys as listed by the most recent manifest.
    #[serde(default)]
    pub tag_keys: Vec<String>,
    /// Application keys that must already be installed.
    #[serde(default)]
    pub required: Vec<String>,
    /// Maximum concurrent installs; 0 means unlimited.
    #[serde(default)]
    pub limit: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// A fresh, never-persisted application for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            key: key.into(),
            name: String::new(),
            icon: String::new(),
            recommend: UNRANKED,
            app_type: AppType::default(),
            short_desc: String::new(),
            tag_keys: Vec::new(),
            required: Vec::new(),
            limit: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` when `installed` more installs would exceed [`Application::limit`].
    pub fn limit_reached(&self, installed: usize) -> bool {
        self.limit > 0 && installed >= self.limit as usize
    }
}

/// One installable revision of an [`Application`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub id: Option<VersionId>,
    #[serde(default)]
    pub app_id: Option<AppId>,
    pub version: String,
    /// Raw parameter schema document (`config.json`); empty when absent.
    #[serde(default)]
    pub params: String,
    /// Raw compose template (`docker-compose.yml`).
    pub docker_compose: String,
    #[serde(default)]
    pub readme: String,
    pub updated_at: DateTime<Utc>,
}

impl Version {
    /// A fresh, never-persisted version record.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            id: None,
            app_id: None,
            version: version.into(),
            params: String::new(),
            docker_compose: String::new(),
            readme: String::new(),
            updated_at: Utc::now(),
        }
    }
}

/// A global catalog tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub id: Option<TagId>,
    pub key: String,
    pub name: String,
}

/// Many-to-many join row between applications and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppTag {
    pub app_id: AppId,
    pub tag_id: TagId,
}

// ---------------------------------------------------------------------------
// Installations
// ---------------------------------------------------------------------------

/// A concrete, named deployment of one [`Version`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    #[serde(default)]
    pub id: Option<InstallId>,
    /// Globally unique, immutable once created.
    pub name: String,
    pub app_id: AppId,
    pub app_key: String,
    pub version_id: VersionId,
    pub version: String,
    /// Parameter snapshot as submitted (plus injected values).
    pub params: Params,
    /// Renamed key of the primary compose service.
    pub service_name: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
    pub status: InstallStatus,
    /// Failure detail attached by the launcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Rendered compose document written to `compose_path`.
    pub docker_compose: String,
    pub compose_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Installation {
    /// Host ports this installation binds.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.http_port.into_iter().chain(self.https_port)
    }

    /// Directory holding the rendered unit and companion files.
    pub fn install_dir(&self) -> Option<&std::path::Path> {
        self.compose_path.parent()
    }
}

/// Cross-installation dependency declared through a `service` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLink {
    /// The installation that depends on `target_id`.
    pub install_id: InstallId,
    pub target_id: InstallId,
    /// Application key of the dependency.
    pub app_key: String,
    /// Parameter that carries the dependency's service name.
    pub env_key: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display() {
        assert_eq!(AppId(7).to_string(), "7");
        assert_eq!(InstallId::from(3).to_string(), "3");
    }

    #[test]
    fn unknown_app_type_deserializes_as_other() {
        let t: AppType = serde_json::from_str("\"middleware\"").expect("parse");
        assert_eq!(t, AppType::Other);
        let t: AppType = serde_json::from_str("\"runtime\"").expect("parse");
        assert_eq!(t, AppType::Runtime);
    }

    #[test]
    fn status_machine_edges() {
        use InstallStatus::*;
        assert!(Installing.can_transition_to(Running));
        assert!(Installing.can_transition_to(Error));
        assert!(Error.can_transition_to(Installing));
        assert!(Running.can_transition_to(Removing));
        assert!(!Running.can_transition_to(Installing));
        assert!(!Removing.can_transition_to(Running));
        assert!(!Installing.can_transition_to(Removing));
    }

    #[test]
    fn limit_zero_is_unlimited() {
        let mut app = Application::new("mysql");
        assert!(!app.limit_reached(100));
        app.limit = 1;
        assert!(!app.limit_reached(0));
        assert!(app.limit_reached(1));
    }

    #[test]
    fn installation_ports_skip_unset() {
        let now = Utc::now();
        let install = Installation {
            id: None,
            name: "blog".into(),
            app_id: AppId(1),
            app_key: "wordpress".into(),
            version_id: VersionId(1),
            version: "6.0".into(),
            params: Params::new(),
            service_name: "wordpress-abcd".into(),
            container_name: "appdock-wordpress-abcd".into(),
            http_port: Some(8080),
            https_port: None,
            status: InstallStatus::Installing,
            message: None,
            docker_compose: String::new(),
            compose_path: PathBuf::from("/x/apps/wordpress/blog/docker-compose.yml"),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(install.ports().collect::<Vec<_>>(), vec![8080]);
        assert_eq!(
            install.install_dir(),
            Some(std::path::Path::new("/x/apps/wordpress/blog"))
        );
    }
}
