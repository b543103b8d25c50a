//! Catalog reconciliation: merge an expanded bundle into the catalog store.
//!
//! ## Algorithm
//!
//! 1. Parse `<bundle>/list.json`.
//! 2. Index persisted applications by key.
//! 3. Per descriptor: read `<key>/metadata/logo.png` (unreadable → skip the
//!    application), set rank and tag keys.
//! 4. Per version: `<key>/versions/<v>/` must exist and hold a
//!    `docker-compose.yml` (else skip the version); `README.md` and
//!    `config.json` are optional.
//! 5. Split into new and existing applications.
//! 6. One transaction: insert new apps, replace tags and app-tag rows, save
//!    existing apps, insert new versions, update existing versions.
//!
//! Per-item read failures are logged and skipped; any store failure aborts
//! the whole transaction.

use std::collections::HashMap;
use std::path::Path;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::Utc;
use serde::Serialize;

use appdock_core::paths::{COMPOSE_FILE, LIST_FILE};
use appdock_core::{AppId, AppTag, Application, CatalogStore, StoreError, Tag, Version};

use crate::error::SyncError;
use crate::manifest::{is_path_component, AppDefine, AppList};

const README_FILE: &str = "README.md";
const PARAMS_FILE: &str = "config.json";

/// Counts and skipped items from one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub apps_added: usize,
    pub apps_updated: usize,
    /// Keys of applications dropped for an unreadable icon.
    pub apps_skipped: Vec<String>,
    pub versions_added: usize,
    pub versions_updated: usize,
    /// `(app key, version)` pairs dropped for missing files.
    pub versions_skipped: Vec<(String, String)>,
    pub tags: usize,
}

/// One application with its versions, assembled before persisting.
struct Planned {
    app: Application,
    versions: Vec<Version>,
}

pub struct Reconciler<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    /// Merge the bundle at `bundle` into the catalog.
    pub fn reconcile(&self, bundle: &Path) -> Result<ReconcileReport, SyncError> {
        self.reconcile_release(bundle, None)
    }

    /// Like [`Reconciler::reconcile`], also recording `release` as the
    /// catalog version in the same transaction.
    pub fn reconcile_release(
        &self,
        bundle: &Path,
        release: Option<&str>,
    ) -> Result<ReconcileReport, SyncError> {
        let list = AppList::load(&bundle.join(LIST_FILE))?;
        let mut report = ReconcileReport::default();

        let existing: HashMap<String, Application> = self
            .store
            .apps()?
            .into_iter()
            .map(|a| (a.key.clone(), a))
            .collect();

        let mut planned: Vec<Planned> = Vec::with_capacity(list.items.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for item in &list.items {
            let Some(next) = self.plan_app(bundle, item, &existing, &mut report)? else {
                continue;
            };
            match seen.get(&item.key) {
                Some(&idx) => {
                    tracing::warn!("duplicate application key '{}'; last entry wins", item.key);
                    planned[idx] = next;
                }
                None => {
                    seen.insert(item.key.clone(), planned.len());
                    planned.push(next);
                }
            }
        }

        let mut tags: Vec<Tag> = Vec::with_capacity(list.tags.len());
        for t in &list.tags {
            if tags.iter().any(|x| x.key == t.key) {
                tracing::warn!("duplicate tag key '{}' in manifest ignored", t.key);
                continue;
            }
            tags.push(Tag {
                id: None,
                key: t.key.clone(),
                name: t.name.clone(),
            });
        }

        for p in &planned {
            if p.app.id.is_some() {
                report.apps_updated += 1;
            } else {
                report.apps_added += 1;
            }
            for v in &p.versions {
                if v.id.is_some() {
                    report.versions_updated += 1;
                } else {
                    report.versions_added += 1;
                }
            }
        }
        report.tags = tags.len();

        self.store.transaction(&mut |tx| {
            let mut new_apps: Vec<Application> = planned
                .iter()
                .filter(|p| p.app.id.is_none())
                .map(|p| p.app.clone())
                .collect();
            tx.insert_apps(&mut new_apps)?;

            tx.delete_all_tags()?;
            tx.delete_all_app_tags()?;
            let mut fresh_tags = tags.clone();
            tx.insert_tags(&mut fresh_tags)?;

            for p in planned.iter().filter(|p| p.app.id.is_some()) {
                tx.save_app(&p.app)?;
            }

            let ids: HashMap<&str, AppId> = planned
                .iter()
                .map(|p| &p.app)
                .chain(new_apps.iter())
                .filter_map(|a| a.id.map(|id| (a.key.as_str(), id)))
                .collect();
            let tag_ids: HashMap<&str, _> = fresh_tags
                .iter()
                .filter_map(|t| t.id.map(|id| (t.key.as_str(), id)))
                .collect();

            let mut rows = Vec::new();
            for p in &planned {
                let app_id = resolve(&ids, &p.app.key)?;
                for key in &p.app.tag_keys {
                    if let Some(&tag_id) = tag_ids.get(key.as_str()) {
                        rows.push(AppTag { app_id, tag_id });
                    }
                }
            }
            tx.insert_app_tags(&rows)?;

            let mut new_versions = Vec::new();
            for p in &planned {
                let app_id = resolve(&ids, &p.app.key)?;
                for v in p.versions.iter().filter(|v| v.id.is_none()) {
                    let mut v = v.clone();
                    v.app_id = Some(app_id);
                    new_versions.push(v);
                }
            }
            tx.insert_versions(&mut new_versions)?;

            for v in planned.iter().flat_map(|p| &p.versions).filter(|v| v.id.is_some()) {
                tx.update_version(v)?;
            }

            if let Some(release) = release {
                tx.set_catalog_version(release)?;
            }
            Ok(())
        })?;

        tracing::info!(
            "reconciled catalog: {} added, {} updated, {} skipped apps; {} added, {} updated, {} skipped versions; {} tags",
            report.apps_added,
            report.apps_updated,
            report.apps_skipped.len(),
            report.versions_added,
            report.versions_updated,
            report.versions_skipped.len(),
            report.tags,
        );
        Ok(report)
    }

    fn plan_app(
        &self,
        bundle: &Path,
        item: &AppDefine,
        existing: &HashMap<String, Application>,
        report: &mut ReconcileReport,
    ) -> Result<Option<Planned>, SyncError> {
        if !is_path_component(&item.key) {
            tracing::error!("skipping application '{}': key is not a plain directory name", item.key);
            report.apps_skipped.push(item.key.clone());
            return Ok(None);
        }
        let app_dir = bundle.join(&item.key);
        let icon_path = app_dir.join("metadata").join("logo.png");
        let icon = match std::fs::read(&icon_path) {
            Ok(bytes) => BASE64_STANDARD.encode(bytes),
            Err(e) => {
                tracing::error!("skipping application '{}': icon {}: {e}", item.key, icon_path.display());
                report.apps_skipped.push(item.key.clone());
                return Ok(None);
            }
        };

        let mut app = existing
            .get(&item.key)
            .cloned()
            .unwrap_or_else(|| Application::new(item.key.clone()));
        app.name = item.name.clone();
        app.icon = icon;
        app.recommend = item.rank();
        app.tag_keys = item.tags.clone();
        app.app_type = item.app_type;
        app.short_desc = item.short_desc.clone();
        app.required = item.required.clone();
        app.limit = item.limit;
        app.updated_at = Utc::now();

        let mut known: HashMap<String, Version> = match app.id {
            Some(id) => self
                .store
                .versions_of(id)?
                .into_iter()
                .map(|v| (v.version.clone(), v))
                .collect(),
            None => HashMap::new(),
        };

        let mut versions = Vec::with_capacity(item.versions.len());
        for name in &item.versions {
            if versions.iter().any(|v: &Version| &v.version == name) {
                continue;
            }
            if !is_path_component(name) {
                tracing::error!("skipping {}@{name}: version is not a plain directory name", item.key);
                report.versions_skipped.push((item.key.clone(), name.clone()));
                continue;
            }
            let dir = app_dir.join("versions").join(name);
            if !dir.is_dir() {
                tracing::error!("skipping {}@{name}: missing directory {}", item.key, dir.display());
                report.versions_skipped.push((item.key.clone(), name.clone()));
                continue;
            }
            let compose_path = dir.join(COMPOSE_FILE);
            let compose = match std::fs::read_to_string(&compose_path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("skipping {}@{name}: {}: {e}", item.key, compose_path.display());
                    report.versions_skipped.push((item.key.clone(), name.clone()));
                    continue;
                }
            };
            let mut version = known.remove(name).unwrap_or_else(|| Version::new(name.clone()));
            version.docker_compose = compose;
            version.readme = read_optional(&dir.join(README_FILE), &item.key, name);
            version.params = read_optional(&dir.join(PARAMS_FILE), &item.key, name);
            version.updated_at = Utc::now();
            versions.push(version);
        }

        Ok(Some(Planned { app, versions }))
    }
}

fn read_optional(path: &Path, key: &str, version: &str) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| {
        tracing::error!("{key}@{version}: {}: {e}", path.display());
        String::new()
    })
}

fn resolve(ids: &HashMap<&str, AppId>, key: &str) -> Result<AppId, StoreError> {
    ids.get(key)
        .copied()
        .ok_or_else(|| StoreError::not_found("application", key))
}
