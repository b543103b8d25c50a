//! Read-side catalog queries used by the CLI and the daemon.

use std::collections::HashMap;

use serde::Serialize;

use appdock_core::types::UNRANKED;
use appdock_core::{
    version, AppId, AppType, Application, CatalogStore, InstallStore, StoreError, Tag, Version,
};

/// Filter for [`Catalog::search`]; empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppQuery {
    /// Case-insensitive substring of the display name.
    pub name: Option<String>,
    /// Matches applications carrying any of these tag keys.
    pub tags: Vec<String>,
    pub app_type: Option<AppType>,
    /// Only applications with an explicit rank.
    pub recommended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSummary {
    #[serde(flatten)]
    pub app: Application,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppDetail {
    #[serde(flatten)]
    pub app: Application,
    /// Version strings, newest first.
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionDetail {
    #[serde(flatten)]
    pub version: Version,
    /// `config.json` parsed; `null` when absent or unparseable.
    pub form: serde_json::Value,
    /// `false` once the application's install limit is reached.
    pub enabled: bool,
}

pub struct Catalog<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> Catalog<'a> {
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    pub fn search(&self, query: &AppQuery) -> Result<Vec<AppSummary>, StoreError> {
        let tags: HashMap<_, Tag> = self
            .store
            .tags()?
            .into_iter()
            .filter_map(|t| t.id.map(|id| (id, t)))
            .collect();
        let mut by_app: HashMap<AppId, Vec<Tag>> = HashMap::new();
        for row in self.store.app_tags()? {
            if let Some(tag) = tags.get(&row.tag_id) {
                by_app.entry(row.app_id).or_default().push(tag.clone());
            }
        }
        let needle = query.name.as_ref().map(|n| n.to_lowercase());

        let mut hits: Vec<AppSummary> = self
            .store
            .apps()?
            .into_iter()
            .filter(|app| {
                needle
                    .as_ref()
                    .map_or(true, |n| app.name.to_lowercase().contains(n.as_str()))
            })
            .filter(|app| query.app_type.map_or(true, |t| app.app_type == t))
            .filter(|app| !query.recommended || app.recommend < UNRANKED)
            .map(|app| {
                let tags = app
                    .id
                    .and_then(|id| by_app.remove(&id))
                    .unwrap_or_default();
                AppSummary { app, tags }
            })
            .filter(|hit| {
                query.tags.is_empty() || hit.tags.iter().any(|t| query.tags.contains(&t.key))
            })
            .collect();
        hits.sort_by(|a, b| {
            a.app
                .recommend
                .cmp(&b.app.recommend)
                .then_with(|| a.app.key.cmp(&b.app.key))
        });
        Ok(hits)
    }

    pub fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        self.store.tags()
    }

    pub fn app_detail(&self, key: &str) -> Result<AppDetail, StoreError> {
        let app = self.store.app_by_key(key)?;
        let mut versions: Vec<String> = match app.id {
            Some(id) => self
                .store
                .versions_of(id)?
                .into_iter()
                .map(|v| v.version)
                .collect(),
            None => Vec::new(),
        };
        version::sort_descending(&mut versions);
        Ok(AppDetail { app, versions })
    }

    pub fn version_detail(
        &self,
        installs: &dyn InstallStore,
        app_id: AppId,
        version: &str,
    ) -> Result<VersionDetail, StoreError> {
        let app = self.store.app(app_id)?;
        let found = self
            .store
            .versions_of(app_id)?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| StoreError::not_found("version", format!("{}@{version}", app.key)))?;
        let installed = installs
            .installs()?
            .iter()
            .filter(|i| i.app_id == app_id)
            .count();
        let form = if found.params.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&found.params).unwrap_or_else(|e| {
                tracing::warn!("{}@{version}: config.json is not valid JSON: {e}", app.key);
                serde_json::Value::Null
            })
        };
        Ok(VersionDetail {
            version: found,
            form,
            enabled: !app.limit_reached(installed),
        })
    }
}
