//! Update checker: compares the recorded catalog release with the remote one.
//!
//! Purely advisory: nothing here touches persisted state, and transport
//! failures are returned as-is with no retry.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use appdock_core::{version, Settings};
use appdock_renderer::{TemplateEngine, UrlContext};

use crate::error::{io_err, SyncError};

/// The small envelope published next to every catalog bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDescriptor {
    pub version: String,
}

/// Result of [`check_for_update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub remote_version: String,
    pub can_update: bool,
    /// Bundle location; only set when `can_update`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Where manifests and bundles come from.
pub trait ManifestSource: Send + Sync {
    fn fetch_descriptor(&self, url: &str) -> Result<RemoteDescriptor, SyncError>;

    /// Download `url` to `dest`, returning the number of bytes written.
    fn download(&self, url: &str, dest: &Path) -> Result<u64, SyncError>;
}

/// Blocking HTTP source backed by `ureq`.
pub struct HttpSource {
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn get(&self, url: &str) -> Result<ureq::Response, SyncError> {
        tracing::info!("fetching {url}");
        self.agent.get(url).call().map_err(|e| SyncError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl ManifestSource for HttpSource {
    fn fetch_descriptor(&self, url: &str) -> Result<RemoteDescriptor, SyncError> {
        let body = self
            .get(url)?
            .into_string()
            .map_err(|e| SyncError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        serde_json::from_str(&body).map_err(|source| SyncError::Manifest {
            origin: url.to_string(),
            source,
        })
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64, SyncError> {
        let response = self.get(url)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let partial = PathBuf::from(format!("{}.part", dest.display()));
        let mut file = std::fs::File::create(&partial).map_err(|e| io_err(&partial, e))?;
        let copied = std::io::copy(&mut response.into_reader(), &mut file).and_then(|n| {
            file.flush()?;
            Ok(n)
        });
        let written = match copied {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(SyncError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
        };
        std::fs::rename(&partial, dest).map_err(|e| io_err(dest, e))?;
        tracing::debug!("downloaded {written} bytes to {}", dest.display());
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Manifest and bundle URLs expanded from [`Settings`] templates.
pub struct Endpoints {
    engine: TemplateEngine,
    manifest_template: String,
    bundle_template: String,
    base: UrlContext,
}

impl Endpoints {
    pub fn from_settings(settings: &Settings) -> Result<Self, SyncError> {
        Ok(Self {
            engine: TemplateEngine::new(None)?,
            manifest_template: settings.manifest_url_template.clone(),
            bundle_template: settings.bundle_url_template.clone(),
            base: UrlContext {
                repo_url: settings.repo_url.trim_end_matches('/').to_string(),
                mode: settings.mode.clone(),
                system_version: settings.system_version.clone(),
                version: None,
            },
        })
    }

    pub fn manifest_url(&self) -> Result<String, SyncError> {
        Ok(self.engine.render_url(&self.manifest_template, &self.base)?)
    }

    pub fn bundle_url(&self, release: &str) -> Result<String, SyncError> {
        let ctx = UrlContext {
            version: Some(release.to_string()),
            ..self.base.clone()
        };
        Ok(self.engine.render_url(&self.bundle_template, &ctx)?)
    }
}

/// Decide whether the remote catalog should be pulled.
///
/// `can_update` holds when nothing has been recorded yet or the remote
/// release is strictly newer than `current`.
pub fn check_for_update(
    source: &dyn ManifestSource,
    endpoints: &Endpoints,
    current: Option<&str>,
) -> Result<UpdateDescriptor, SyncError> {
    let remote = source.fetch_descriptor(&endpoints.manifest_url()?)?;
    let can_update = match current {
        None => true,
        Some(cur) if cur.trim().is_empty() => true,
        Some(cur) => version::is_newer(&remote.version, cur),
    };
    let download_url = if can_update {
        Some(endpoints.bundle_url(&remote.version)?)
    } else {
        None
    };
    Ok(UpdateDescriptor {
        remote_version: remote.version,
        can_update,
        download_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Fixed {
        version: String,
        seen: Mutex<Vec<String>>,
    }

    impl Fixed {
        fn new(version: &str) -> Self {
            Self {
                version: version.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ManifestSource for Fixed {
        fn fetch_descriptor(&self, url: &str) -> Result<RemoteDescriptor, SyncError> {
            self.seen.lock().unwrap().push(url.to_string());
            Ok(RemoteDescriptor {
                version: self.version.clone(),
            })
        }

        fn download(&self, url: &str, _dest: &Path) -> Result<u64, SyncError> {
            Err(SyncError::Transport {
                url: url.to_string(),
                message: "not used".into(),
            })
        }
    }

    fn endpoints() -> Endpoints {
        let settings = Settings {
            repo_url: "https://repo.test/".into(),
            ..Settings::default()
        };
        Endpoints::from_settings(&settings).expect("endpoints")
    }

    #[test]
    fn first_sync_always_updates() {
        let src = Fixed::new("1.0");
        let desc = check_for_update(&src, &endpoints(), None).expect("check");
        assert!(desc.can_update);
        assert_eq!(
            desc.download_url.as_deref(),
            Some("https://repo.test/stable/v1.0.0/appstore/apps-1.0.tar.gz")
        );
        assert_eq!(
            src.seen.lock().unwrap().as_slice(),
            ["https://repo.test/stable/v1.0.0/appstore/apps.json"]
        );
    }

    #[test]
    fn strictly_newer_remote_updates() {
        let src = Fixed::new("1.10");
        assert!(check_for_update(&src, &endpoints(), Some("1.9")).unwrap().can_update);
    }

    #[test]
    fn equal_or_older_remote_does_not_update() {
        let src = Fixed::new("1.2.0");
        let desc = check_for_update(&src, &endpoints(), Some("1.2")).unwrap();
        assert!(!desc.can_update);
        assert!(desc.download_url.is_none());
        assert_eq!(desc.remote_version, "1.2.0");

        let src = Fixed::new("1.1");
        assert!(!check_for_update(&src, &endpoints(), Some("1.2")).unwrap().can_update);
    }
}
