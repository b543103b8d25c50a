//! Reconciliation: idempotence, partial-failure isolation, tag replacement.
//! Bundle layout: list.json, <key>/metadata/logo.png, <key>/versions/<v>/

use std::fs;
use std::path::Path;

use appdock_core::{types::UNRANKED, CatalogStore, FileStore};
use appdock_sync::{AppQuery, Catalog, Reconciler};
use serde_json::json;
use tempfile::TempDir;

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn add_app(bundle: &Path, key: &str, versions: &[&str]) {
    write(&bundle.join(key).join("metadata/logo.png"), "PNG");
    for v in versions {
        let dir = bundle.join(key).join("versions").join(v);
        write(&dir.join("docker-compose.yml"), &format!("services:\n  {key}:\n    image: {key}:{v}\n"));
        write(&dir.join("README.md"), &format!("# {key} {v}"));
        write(&dir.join("config.json"), r#"{"formFields": []}"#);
    }
}

fn write_list(bundle: &Path, list: serde_json::Value) {
    write(&bundle.join("list.json"), &list.to_string());
}

fn standard_bundle(bundle: &Path) {
    add_app(bundle, "wordpress", &["6.0", "6.1"]);
    add_app(bundle, "mysql", &["8.0"]);
    write_list(
        bundle,
        json!({
            "version": "1.0",
            "tags": [{"key": "website", "name": "Website"}, {"key": "db", "name": "Database"}],
            "items": [
                {"key": "wordpress", "name": "WordPress", "recommend": 1,
                 "tags": ["website"], "versions": ["6.0", "6.1"], "type": "website"},
                {"key": "mysql", "name": "MySQL", "tags": ["db"], "versions": ["8.0"],
                 "type": "runtime", "limit": 1}
            ]
        }),
    );
}

/// Persisted state with timestamps stripped.
fn snapshot(store: &FileStore) -> serde_json::Value {
    let mut apps = store.apps().unwrap();
    for a in &mut apps {
        a.created_at = chrono::DateTime::<chrono::Utc>::default();
        a.updated_at = chrono::DateTime::<chrono::Utc>::default();
    }
    let mut versions = Vec::new();
    for a in &apps {
        for mut v in store.versions_of(a.id.unwrap()).unwrap() {
            v.updated_at = chrono::DateTime::<chrono::Utc>::default();
            versions.push(v);
        }
    }
    json!({
        "apps": apps,
        "versions": versions,
        "tags": store.tags().unwrap(),
        "app_tags": store.app_tags().unwrap(),
    })
}

#[test]
fn reconcile_twice_is_idempotent() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    standard_bundle(bundle.path());
    let store = FileStore::open_at(home.path()).unwrap();

    let first = Reconciler::new(&store).reconcile(bundle.path()).expect("first");
    assert_eq!(first.apps_added, 2);
    assert_eq!(first.versions_added, 3);
    let before = snapshot(&store);

    let second = Reconciler::new(&store).reconcile(bundle.path()).expect("second");
    assert_eq!(second.apps_added, 0);
    assert_eq!(second.apps_updated, 2);
    assert_eq!(second.versions_added, 0);
    assert_eq!(second.versions_updated, 3);
    let after = snapshot(&store);

    // Tags get fresh ids on every replace, compare by key/name.
    let strip = |v: &serde_json::Value| {
        let mut v = v.clone();
        for t in v["tags"].as_array_mut().unwrap() {
            t.as_object_mut().unwrap().remove("id");
        }
        v.as_object_mut().unwrap().remove("app_tags");
        v
    };
    assert_eq!(strip(&before), strip(&after));
    assert_eq!(store.apps().unwrap().len(), 2);
    assert_eq!(store.app_tags().unwrap().len(), 2);
}

#[test]
fn missing_compose_file_skips_only_that_version() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    standard_bundle(bundle.path());
    fs::remove_file(bundle.path().join("wordpress/versions/6.1/docker-compose.yml")).unwrap();
    let store = FileStore::open_at(home.path()).unwrap();

    let report = Reconciler::new(&store).reconcile(bundle.path()).expect("reconcile");
    assert_eq!(report.versions_skipped, vec![("wordpress".to_string(), "6.1".to_string())]);

    let wp = store.app_by_key("wordpress").unwrap();
    let versions: Vec<_> = store
        .versions_of(wp.id.unwrap())
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec!["6.0"]);
    let mysql = store.app_by_key("mysql").unwrap();
    assert_eq!(store.versions_of(mysql.id.unwrap()).unwrap().len(), 1);
}

#[test]
fn missing_version_directory_and_optional_files() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    standard_bundle(bundle.path());
    fs::remove_dir_all(bundle.path().join("wordpress/versions/6.0")).unwrap();
    fs::remove_file(bundle.path().join("mysql/versions/8.0/README.md")).unwrap();
    fs::remove_file(bundle.path().join("mysql/versions/8.0/config.json")).unwrap();
    let store = FileStore::open_at(home.path()).unwrap();

    Reconciler::new(&store).reconcile(bundle.path()).expect("reconcile");
    let mysql = store.app_by_key("mysql").unwrap();
    let v = &store.versions_of(mysql.id.unwrap()).unwrap()[0];
    assert!(v.readme.is_empty());
    assert!(v.params.is_empty());
    assert!(v.docker_compose.contains("mysql:8.0"));

    let wp = store.app_by_key("wordpress").unwrap();
    assert_eq!(store.versions_of(wp.id.unwrap()).unwrap().len(), 1);
}

#[test]
fn unreadable_icon_skips_application() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    standard_bundle(bundle.path());
    fs::remove_file(bundle.path().join("mysql/metadata/logo.png")).unwrap();
    let store = FileStore::open_at(home.path()).unwrap();

    let report = Reconciler::new(&store).reconcile(bundle.path()).expect("reconcile");
    assert_eq!(report.apps_skipped, vec!["mysql".to_string()]);
    assert!(store.app_by_key("mysql").is_err());
    let wp = store.app_by_key("wordpress").unwrap();
    assert_eq!(wp.icon, "UE5H"); // base64("PNG")
    assert_eq!(wp.recommend, 1);
}

#[test]
fn keys_and_versions_that_leave_the_bundle_are_skipped() {
    let home = TempDir::new().unwrap();
    let root = TempDir::new().unwrap();
    let bundle = root.path().join("bundle");
    add_app(&bundle, "wordpress", &["6.0"]);
    // Targets the traversal would resolve to if joined unchecked.
    add_app(root.path(), "evil", &["1.0"]);
    write(&bundle.join("wordpress/6.0/docker-compose.yml"), "services:\n  x:\n    image: x\n");
    write_list(
        &bundle,
        json!({
            "version": "1.0",
            "items": [
                {"key": "../evil", "name": "Evil", "versions": ["1.0"]},
                {"key": "wordpress", "name": "WordPress", "versions": ["6.0", "../6.0", "a/b"]}
            ]
        }),
    );
    let store = FileStore::open_at(home.path()).unwrap();

    let report = Reconciler::new(&store).reconcile(&bundle).expect("reconcile");
    assert_eq!(report.apps_skipped, vec!["../evil".to_string()]);
    assert_eq!(
        report.versions_skipped,
        vec![
            ("wordpress".to_string(), "../6.0".to_string()),
            ("wordpress".to_string(), "a/b".to_string()),
        ]
    );
    assert!(store.app_by_key("../evil").is_err());
    let wp = store.app_by_key("wordpress").unwrap();
    let versions: Vec<_> = store
        .versions_of(wp.id.unwrap())
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec!["6.0"]);
}

#[test]
fn tags_are_fully_replaced() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    standard_bundle(bundle.path());
    let store = FileStore::open_at(home.path()).unwrap();
    Reconciler::new(&store).reconcile(bundle.path()).unwrap();

    write_list(
        bundle.path(),
        json!({
            "version": "1.1",
            "tags": [{"key": "cms", "name": "CMS"}],
            "items": [
                {"key": "wordpress", "name": "WordPress", "tags": ["cms", "website"],
                 "versions": ["6.0"]}
            ]
        }),
    );
    Reconciler::new(&store).reconcile(bundle.path()).unwrap();

    let tags = store.tags().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].key, "cms");
    let tag_ids: Vec<_> = tags.iter().map(|t| t.id.unwrap()).collect();
    let rows = store.app_tags().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows.iter().all(|r| tag_ids.contains(&r.tag_id)));

    // Never deleted by sync; rank falls back when the manifest drops it.
    let mysql = store.app_by_key("mysql").expect("kept");
    assert_eq!(mysql.limit, 1);
    let wp = store.app_by_key("wordpress").unwrap();
    assert_eq!(wp.recommend, UNRANKED);
    assert_eq!(store.versions_of(wp.id.unwrap()).unwrap().len(), 2);
}

#[test]
fn release_is_recorded_with_catalog() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    standard_bundle(bundle.path());
    let store = FileStore::open_at(home.path()).unwrap();
    Reconciler::new(&store)
        .reconcile_release(bundle.path(), Some("1.0"))
        .unwrap();
    assert_eq!(store.catalog_version().unwrap().as_deref(), Some("1.0"));
}

#[test]
fn missing_list_is_an_error_and_writes_nothing() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    let store = FileStore::open_at(home.path()).unwrap();
    assert!(Reconciler::new(&store).reconcile(bundle.path()).is_err());
    assert!(store.apps().unwrap().is_empty());
}

#[test]
fn search_filters_and_orders() {
    let home = TempDir::new().unwrap();
    let bundle = TempDir::new().unwrap();
    standard_bundle(bundle.path());
    let store = FileStore::open_at(home.path()).unwrap();
    Reconciler::new(&store).reconcile(bundle.path()).unwrap();
    let catalog = Catalog::new(&store);

    let all = catalog.search(&AppQuery::default()).unwrap();
    let keys: Vec<_> = all.iter().map(|s| s.app.key.as_str()).collect();
    assert_eq!(keys, vec!["wordpress", "mysql"]);
    assert_eq!(all[0].tags[0].key, "website");

    let by_tag = catalog
        .search(&AppQuery { tags: vec!["db".into()], ..Default::default() })
        .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].app.key, "mysql");

    let by_name = catalog
        .search(&AppQuery { name: Some("PRESS".into()), ..Default::default() })
        .unwrap();
    assert_eq!(by_name.len(), 1);

    let recommended = catalog
        .search(&AppQuery { recommended: true, ..Default::default() })
        .unwrap();
    assert_eq!(recommended.len(), 1);
    assert_eq!(recommended[0].app.key, "wordpress");

    let detail = catalog.app_detail("wordpress").unwrap();
    assert_eq!(detail.versions, vec!["6.1", "6.0"]);
}
