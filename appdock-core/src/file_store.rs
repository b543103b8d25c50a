//! JSON-file implementation of [`CatalogStore`] and [`InstallStore`].
//!
//! # Storage layout
//!
//! ```text
//! ~/.appdock/db/
//!   catalog.json        (applications, versions, tags, app-tag rows; mode 0600)
//!   catalog.json.lock   (advisory lock guarding catalog writes)
//!   installs.json       (installations and links; mode 0600)
//!   installs.json.lock
//! ```
//!
//! Several processes may open the same home (the CLI runs lifecycle commands
//! in-process when no daemon is up), so nothing is cached between calls.
//! Reads load the document from disk. Every write takes an exclusive lock on
//! the document's `.lock` sibling, re-reads the document under that lock,
//! applies the change to the fresh copy and persists it atomically
//! (`.tmp` sibling → `chmod 0600` → `rename`) before releasing the lock. A
//! failed change is never written, so disk stays as it was.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, Conflict, StoreError};
use crate::paths::{db_dir, home};
use crate::store::{CatalogStore, CatalogTx, InstallStore};
use crate::types::{
    AppId, AppTag, Application, InstallId, InstallLink, InstallStatus, Installation, Tag, TagId,
    Version, VersionId,
};

// ---------------------------------------------------------------------------
// 1. Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogDoc {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    catalog_version: Option<String>,
    #[serde(default)]
    apps: Vec<Application>,
    #[serde(default)]
    versions: Vec<Version>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    app_tags: Vec<AppTag>,
}

impl CatalogDoc {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InstallDoc {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    installs: Vec<Installation>,
    #[serde(default)]
    links: Vec<InstallLink>,
}

// ---------------------------------------------------------------------------
// 2. FileStore
// ---------------------------------------------------------------------------

pub struct FileStore {
    catalog_path: PathBuf,
    installs_path: PathBuf,
}

impl FileStore {
    /// Open the store under `<home>/.appdock/db/`. Files are created on the
    /// first write; existing documents are parsed once here so corruption
    /// surfaces at open time.
    pub fn open_at(home: &Path) -> Result<Self, StoreError> {
        let dir = db_dir(home);
        let store = Self {
            catalog_path: dir.join("catalog.json"),
            installs_path: dir.join("installs.json"),
        };
        load_doc::<CatalogDoc>(&store.catalog_path)?;
        load_doc::<InstallDoc>(&store.installs_path)?;
        Ok(store)
    }

    /// `open_at` convenience wrapper.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(&home()?)
    }

    fn catalog(&self) -> Result<CatalogDoc, StoreError> {
        load_doc(&self.catalog_path)
    }

    fn installs_doc(&self) -> Result<InstallDoc, StoreError> {
        load_doc(&self.installs_path)
    }

    fn mutate_installs<T>(
        &self,
        change: impl FnOnce(&mut InstallDoc) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        mutate_doc(&self.installs_path, change)
    }
}

// ---------------------------------------------------------------------------
// 3. Catalog
// ---------------------------------------------------------------------------

impl CatalogStore for FileStore {
    fn apps(&self) -> Result<Vec<Application>, StoreError> {
        Ok(self.catalog()?.apps)
    }

    fn app(&self, id: AppId) -> Result<Application, StoreError> {
        self.catalog()?
            .apps
            .iter()
            .find(|a| a.id == Some(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("application", id))
    }

    fn app_by_key(&self, key: &str) -> Result<Application, StoreError> {
        self.catalog()?
            .apps
            .iter()
            .find(|a| a.key == key)
            .cloned()
            .ok_or_else(|| StoreError::not_found("application", key))
    }

    fn versions_of(&self, app: AppId) -> Result<Vec<Version>, StoreError> {
        Ok(self
            .catalog()?
            .versions
            .iter()
            .filter(|v| v.app_id == Some(app))
            .cloned()
            .collect())
    }

    fn version(&self, id: VersionId) -> Result<Version, StoreError> {
        self.catalog()?
            .versions
            .iter()
            .find(|v| v.id == Some(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("version", id))
    }

    fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        Ok(self.catalog()?.tags)
    }

    fn app_tags(&self) -> Result<Vec<AppTag>, StoreError> {
        Ok(self.catalog()?.app_tags)
    }

    fn catalog_version(&self) -> Result<Option<String>, StoreError> {
        Ok(self.catalog()?.catalog_version)
    }

    fn transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn CatalogTx) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        mutate_doc(&self.catalog_path, |doc: &mut CatalogDoc| {
            work(&mut DocTx { doc })
        })
    }
}

struct DocTx<'a> {
    doc: &'a mut CatalogDoc,
}

impl CatalogTx for DocTx<'_> {
    fn insert_apps(&mut self, apps: &mut [Application]) -> Result<(), StoreError> {
        for app in apps.iter_mut() {
            if app.id.is_some() || self.doc.apps.iter().any(|a| a.key == app.key) {
                return Err(StoreError::Conflict(Conflict::Key {
                    entity: "application",
                    key: app.key.clone(),
                }));
            }
            app.id = Some(AppId(self.doc.allocate()));
            self.doc.apps.push(app.clone());
        }
        Ok(())
    }

    fn save_app(&mut self, app: &Application) -> Result<(), StoreError> {
        let slot = self
            .doc
            .apps
            .iter_mut()
            .find(|a| app.id.is_some() && a.id == app.id)
            .ok_or_else(|| StoreError::not_found("application", &app.key))?;
        if slot.key != app.key {
            return Err(StoreError::Aborted(format!(
                "application key is immutable ('{}' -> '{}')",
                slot.key, app.key
            )));
        }
        let mut updated = app.clone();
        updated.updated_at = Utc::now();
        *slot = updated;
        Ok(())
    }

    fn delete_all_tags(&mut self) -> Result<(), StoreError> {
        self.doc.tags.clear();
        Ok(())
    }

    fn insert_tags(&mut self, tags: &mut [Tag]) -> Result<(), StoreError> {
        for tag in tags.iter_mut() {
            if self.doc.tags.iter().any(|t| t.key == tag.key) {
                return Err(StoreError::Conflict(Conflict::Key {
                    entity: "tag",
                    key: tag.key.clone(),
                }));
            }
            tag.id = Some(TagId(self.doc.allocate()));
            self.doc.tags.push(tag.clone());
        }
        Ok(())
    }

    fn delete_all_app_tags(&mut self) -> Result<(), StoreError> {
        self.doc.app_tags.clear();
        Ok(())
    }

    fn insert_app_tags(&mut self, rows: &[AppTag]) -> Result<(), StoreError> {
        for row in rows {
            if !self.doc.app_tags.contains(row) {
                self.doc.app_tags.push(*row);
            }
        }
        Ok(())
    }

    fn insert_versions(&mut self, versions: &mut [Version]) -> Result<(), StoreError> {
        for version in versions.iter_mut() {
            let app_id = version
                .app_id
                .ok_or_else(|| StoreError::not_found("application", "<unset>"))?;
            if !self.doc.apps.iter().any(|a| a.id == Some(app_id)) {
                return Err(StoreError::not_found("application", app_id));
            }
            let duplicate = self
                .doc
                .versions
                .iter()
                .any(|v| v.app_id == Some(app_id) && v.version == version.version);
            if version.id.is_some() || duplicate {
                return Err(StoreError::Conflict(Conflict::Key {
                    entity: "version",
                    key: format!("{app_id}@{}", version.version),
                }));
            }
            version.id = Some(VersionId(self.doc.allocate()));
            self.doc.versions.push(version.clone());
        }
        Ok(())
    }

    fn update_version(&mut self, version: &Version) -> Result<(), StoreError> {
        let slot = self
            .doc
            .versions
            .iter_mut()
            .find(|v| version.id.is_some() && v.id == version.id)
            .ok_or_else(|| StoreError::not_found("version", &version.version))?;
        let mut updated = version.clone();
        updated.updated_at = Utc::now();
        *slot = updated;
        Ok(())
    }

    fn set_catalog_version(&mut self, version: &str) -> Result<(), StoreError> {
        self.doc.catalog_version = Some(version.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 4. Installations
// ---------------------------------------------------------------------------

impl InstallStore for FileStore {
    fn installs(&self) -> Result<Vec<Installation>, StoreError> {
        Ok(self.installs_doc()?.installs)
    }

    fn install(&self, id: InstallId) -> Result<Installation, StoreError> {
        self.installs_doc()?
            .installs
            .iter()
            .find(|i| i.id == Some(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found("installation", id))
    }

    fn install_by_name(&self, name: &str) -> Result<Option<Installation>, StoreError> {
        Ok(self
            .installs_doc()?
            .installs
            .iter()
            .find(|i| i.name == name)
            .cloned())
    }

    fn create_install(&self, install: &mut Installation) -> Result<(), StoreError> {
        let id = self.mutate_installs(|doc| {
            if doc.installs.iter().any(|i| i.name == install.name) {
                return Err(StoreError::Conflict(Conflict::Name(install.name.clone())));
            }
            for port in install.ports() {
                if doc.installs.iter().any(|i| i.ports().any(|p| p == port)) {
                    return Err(StoreError::Conflict(Conflict::Port(port)));
                }
            }
            doc.next_id += 1;
            let id = InstallId(doc.next_id);
            let mut record = install.clone();
            record.id = Some(id);
            doc.installs.push(record);
            Ok(id)
        })?;
        install.id = Some(id);
        Ok(())
    }

    fn update_install(&self, install: &Installation) -> Result<(), StoreError> {
        self.mutate_installs(|doc| {
            let slot = doc
                .installs
                .iter_mut()
                .find(|i| install.id.is_some() && i.id == install.id)
                .ok_or_else(|| StoreError::not_found("installation", &install.name))?;
            let mut updated = install.clone();
            updated.name = slot.name.clone();
            updated.updated_at = Utc::now();
            *slot = updated;
            Ok(())
        })
    }

    fn set_status(
        &self,
        id: InstallId,
        status: InstallStatus,
        message: Option<String>,
    ) -> Result<Installation, StoreError> {
        self.mutate_installs(|doc| {
            let slot = doc
                .installs
                .iter_mut()
                .find(|i| i.id == Some(id))
                .ok_or_else(|| StoreError::not_found("installation", id))?;
            if slot.status != status && !slot.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    name: slot.name.clone(),
                    from: slot.status,
                    to: status,
                });
            }
            slot.status = status;
            slot.message = message;
            slot.updated_at = Utc::now();
            Ok(slot.clone())
        })
    }

    fn delete_install(&self, id: InstallId) -> Result<(), StoreError> {
        self.mutate_installs(|doc| {
            let before = doc.installs.len();
            doc.installs.retain(|i| i.id != Some(id));
            if doc.installs.len() == before {
                return Err(StoreError::not_found("installation", id));
            }
            doc.links.retain(|l| l.install_id != id);
            Ok(())
        })
    }

    fn links(&self) -> Result<Vec<InstallLink>, StoreError> {
        Ok(self.installs_doc()?.links)
    }

    fn insert_link(&self, link: &InstallLink) -> Result<(), StoreError> {
        self.mutate_installs(|doc| {
            for id in [link.install_id, link.target_id] {
                if !doc.installs.iter().any(|i| i.id == Some(id)) {
                    return Err(StoreError::not_found("installation", id));
                }
            }
            doc.links
                .retain(|l| !(l.install_id == link.install_id && l.env_key == link.env_key));
            doc.links.push(link.clone());
            Ok(())
        })
    }

    fn update_link(&self, link: &InstallLink) -> Result<(), StoreError> {
        self.mutate_installs(|doc| {
            let slot = doc
                .links
                .iter_mut()
                .find(|l| l.install_id == link.install_id && l.env_key == link.env_key)
                .ok_or_else(|| {
                    StoreError::not_found("link", format!("{}:{}", link.install_id, link.env_key))
                })?;
            *slot = link.clone();
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// 5. Atomic file helpers
// ---------------------------------------------------------------------------

fn load_doc<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read-modify-write `path` while holding the exclusive lock on its `.lock`
/// sibling. The lock is released when the handle drops.
fn mutate_doc<T, R>(
    path: &Path,
    change: impl FnOnce(&mut T) -> Result<R, StoreError>,
) -> Result<R, StoreError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let _lock = lock_exclusive(path)?;
    let mut doc: T = load_doc(path)?;
    let out = change(&mut doc)?;
    save_doc(path, &doc)?;
    Ok(out)
}

fn lock_exclusive(path: &Path) -> Result<File, StoreError> {
    ensure_parent(path)?;
    let lock_path = sibling(path, "lock");
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| io_err(&lock_path, e))?;
    file.lock_exclusive().map_err(|e| io_err(&lock_path, e))?;
    Ok(file)
}

fn sibling(path: &Path, ext: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}.{ext}"))
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            set_dir_permissions(dir)?;
        }
    }
    Ok(())
}

fn save_doc<T: Serialize>(path: &Path, doc: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(doc).map_err(|e| StoreError::Serialize(e.to_string()))?;
    write_atomic(path, &json)
}

/// Write `bytes` to `path` via a `.tmp` sibling and `rename`.
///
/// The parent directory is created (mode `0700`) when absent and the file
/// ends up with mode `0600`. The `.tmp` is always in the same directory as the
/// target, so the rename never crosses filesystems.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let tmp = sibling(path, "tmp");
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Params;
    use tempfile::TempDir;

    fn make_install(name: &str, http: Option<u16>) -> Installation {
        let now = Utc::now();
        Installation {
            id: None,
            name: name.to_string(),
            app_id: AppId(1),
            app_key: "nginx".into(),
            version_id: VersionId(2),
            version: "1.25".into(),
            params: Params::new(),
            service_name: format!("nginx-{name}"),
            container_name: format!("appdock-nginx-{name}"),
            http_port: http,
            https_port: None,
            status: InstallStatus::Installing,
            message: None,
            docker_compose: String::new(),
            compose_path: PathBuf::from("/nowhere/docker-compose.yml"),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_apps_assigns_ids() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let mut apps = vec![Application::new("a"), Application::new("b")];
        store
            .transaction(&mut |tx| tx.insert_apps(&mut apps))
            .expect("tx");
        assert!(apps.iter().all(|a| a.id.is_some()));
        assert_ne!(apps[0].id, apps[1].id);
        assert_eq!(store.apps().unwrap().len(), 2);
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let err = store
            .transaction(&mut |tx| {
                tx.insert_apps(&mut [Application::new("a")])?;
                tx.set_catalog_version("2.0")?;
                Err(StoreError::Aborted("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));
        assert!(store.apps().unwrap().is_empty());
        assert_eq!(store.catalog_version().unwrap(), None);
        assert!(!home.path().join(".appdock/db/catalog.json").exists());
    }

    #[test]
    fn duplicate_app_key_is_conflict() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let err = store
            .transaction(&mut |tx| tx.insert_apps(&mut [Application::new("a"), Application::new("a")]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::Key { .. })));
        assert!(store.apps().unwrap().is_empty());
    }

    #[test]
    fn catalog_survives_reopen() {
        let home = TempDir::new().expect("tempdir");
        {
            let store = FileStore::open_at(home.path()).expect("open");
            store
                .transaction(&mut |tx| {
                    let mut apps = [Application::new("redis")];
                    tx.insert_apps(&mut apps)?;
                    let mut v = Version::new("7.0");
                    v.app_id = apps[0].id;
                    tx.insert_versions(&mut [v])?;
                    tx.set_catalog_version("1.3.0")
                })
                .expect("tx");
        }
        let reopened = FileStore::open_at(home.path()).expect("reopen");
        let app = reopened.app_by_key("redis").expect("app");
        assert_eq!(reopened.versions_of(app.id.unwrap()).unwrap().len(), 1);
        assert_eq!(reopened.catalog_version().unwrap().as_deref(), Some("1.3.0"));
    }

    #[test]
    fn create_install_rejects_name_and_port_conflicts() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let mut first = make_install("web", Some(8080));
        store.create_install(&mut first).expect("create");
        assert!(first.id.is_some());

        let err = store.create_install(&mut make_install("web", None)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::Name(_))));

        let err = store
            .create_install(&mut make_install("other", Some(8080)))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::Port(8080))));
        assert_eq!(store.installs().unwrap().len(), 1);
    }

    #[test]
    fn set_status_enforces_state_machine() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let mut install = make_install("web", None);
        store.create_install(&mut install).expect("create");
        let id = install.id.unwrap();

        let err = store
            .set_status(id, InstallStatus::Removing, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let updated = store
            .set_status(id, InstallStatus::Error, Some("pull failed".into()))
            .expect("error");
        assert_eq!(updated.message.as_deref(), Some("pull failed"));
        store
            .set_status(id, InstallStatus::Installing, None)
            .expect("retry edge");
    }

    #[test]
    fn delete_install_drops_owned_links() {
        let home = TempDir::new().expect("tempdir");
        let store = FileStore::open_at(home.path()).expect("open");
        let mut db = make_install("db", None);
        let mut app = make_install("app", None);
        store.create_install(&mut db).unwrap();
        store.create_install(&mut app).unwrap();
        store
            .insert_link(&InstallLink {
                install_id: app.id.unwrap(),
                target_id: db.id.unwrap(),
                app_key: "mysql".into(),
                env_key: "PANEL_DB_HOST".into(),
            })
            .unwrap();

        store.delete_install(db.id.unwrap()).unwrap();
        assert_eq!(store.links().unwrap().len(), 1, "dependents keep their links");
        store.delete_install(app.id.unwrap()).unwrap();
        assert!(store.links().unwrap().is_empty());
    }

    #[test]
    fn write_atomic_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        let path = home.path().join("nested").join("doc.json");
        write_atomic(&path, b"{}").expect("write");
        assert!(path.exists());
        assert!(!home.path().join("nested").join("doc.json.tmp").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }
}
