//! Integration tests for the plugin runtime over a manifest directory
//!
//! Plugins are discovered from `<dir>/<id>/plugin.json`, loaded through the
//! entry-point table and mounted under `/plugins/<id>`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use plugmon::plugin::{
    route_handler, BuiltinLoader, DynamicRouter, FileManifestStore, HttpMethod, Plugin, PluginDescriptor,
    PluginError, PluginManager, PluginRegistry, PluginStatus, RouteDescriptor, RouteRequest, RouteResponse,
};

/// Plugin exposing `GET /info` with the generation it was created in
struct InfoPlugin {
    id: String,
    generation: usize,
}

impl Plugin for InfoPlugin {
    fn plugin_id(&self) -> &str {
        &self.id
    }

    fn routes(&self) -> Vec<RouteDescriptor> {
        let id = self.id.clone();
        let generation = self.generation;
        vec![RouteDescriptor::new(
            "/info",
            &[HttpMethod::Get],
            route_handler(move |_request| {
                let id = id.clone();
                async move { Ok(RouteResponse::ok(serde_json::json!({ "plugin": id, "generation": generation }))) }
            }),
        )]
    }
}

fn write_manifest(root: &Path, id: &str, dependencies: &[&str], enabled: bool) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = serde_json::json!({
        "name": id,
        "version": "1.2.0",
        "description": format!("{} plugin", id),
        "dependencies": dependencies,
        "enabled": enabled,
    });
    std::fs::write(dir.join("plugin.json"), serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
}

fn read_enabled(root: &Path, id: &str) -> bool {
    let content = std::fs::read_to_string(root.join(id).join("plugin.json")).unwrap();
    let document: serde_json::Value = serde_json::from_str(&content).unwrap();
    document["enabled"].as_bool().unwrap()
}

struct Runtime {
    _dir: TempDir,
    root: PathBuf,
    generations: Arc<AtomicUsize>,
    manager: Arc<PluginManager>,
    router: DynamicRouter,
}

fn runtime(plugins: &[(&str, &[&str], bool)]) -> Runtime {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    for (id, deps, enabled) in plugins {
        write_manifest(&root, id, deps, *enabled);
    }

    let generations = Arc::new(AtomicUsize::new(0));
    let loader = Arc::new(BuiltinLoader::new());
    for (id, _, _) in plugins {
        let generations = Arc::clone(&generations);
        loader.register(id, move |descriptor: PluginDescriptor| {
            let generation = generations.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(Box::new(InfoPlugin { id: descriptor.id, generation }) as Box<dyn Plugin>) }
        });
    }

    let store = Arc::new(FileManifestStore::new(&root).unwrap());
    let registry = Arc::new(PluginRegistry::new(store));
    let manager = Arc::new(PluginManager::new(registry, loader));
    let router = DynamicRouter::new(Arc::clone(&manager));
    Runtime { _dir: dir, root, generations, manager, router }
}

fn get(path: &str) -> RouteRequest {
    RouteRequest::new(HttpMethod::Get, path)
}

#[tokio::test]
async fn test_dependency_must_be_loaded_first() {
    let rt = runtime(&[("core-auth", &[], true), ("billing", &["core-auth"], true)]);
    let scan = rt.manager.registry().scan().await.unwrap();
    assert_eq!(scan.added.len(), 2);

    let result = rt.router.load_plugin("billing").await;
    assert!(matches!(result, Err(PluginError::DependencyError { .. })));
    assert_eq!(rt.manager.status("billing").await.unwrap(), PluginStatus::Discovered);
    assert!(rt.router.mounted_routes().is_empty());

    assert_ok!(rt.router.load_plugin("core-auth").await);
    assert_eq!(assert_ok!(rt.router.load_plugin("billing").await), 1);

    let response = rt.router.dispatch(get("/plugins/billing/info")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["plugin"], "billing");
    assert_eq!(rt.router.namespaces(), vec!["billing", "core-auth"]);

    // core-auth cannot go while billing still needs it
    assert_err!(rt.router.unload_plugin("core-auth").await);
    assert_ok!(rt.router.unload_plugin("billing").await);
    assert_ok!(rt.router.unload_plugin("core-auth").await);
    assert_eq!(rt.router.dispatch(get("/plugins/billing/info")).await.status, 404);
}

#[tokio::test]
async fn test_enable_and_disable_persist_to_manifest() {
    let rt = runtime(&[("reports", &[], false)]);
    rt.manager.registry().scan().await.unwrap();
    assert!(!read_enabled(&rt.root, "reports"));

    assert_eq!(assert_ok!(rt.router.enable_plugin("reports").await), 1);
    assert!(read_enabled(&rt.root, "reports"));
    assert_eq!(rt.router.dispatch(get("/plugins/reports/info")).await.status, 200);

    assert_ok!(rt.router.disable_plugin("reports").await);
    assert!(!read_enabled(&rt.root, "reports"));
    assert!(!rt.manager.is_loaded("reports").await);
    assert_eq!(rt.router.dispatch(get("/plugins/reports/info")).await.status, 404);

    // A fresh registry over the same directory sees the persisted flag
    let store = Arc::new(FileManifestStore::new(&rt.root).unwrap());
    let registry = PluginRegistry::new(store);
    registry.scan().await.unwrap();
    assert!(!registry.get("reports").unwrap().enabled);
}

#[tokio::test]
async fn test_reload_all_follows_manifest_changes() {
    let rt = runtime(&[("core-auth", &[], true), ("billing", &["core-auth"], true), ("audit", &[], false)]);

    let report = assert_ok!(rt.router.reload_all().await);
    assert_eq!(report.loaded, vec!["core-auth", "billing"]);
    assert!(report.is_clean());
    assert_eq!(rt.generations.load(Ordering::SeqCst), 2);

    // Edit manifests on disk: turn billing off, audit on
    write_manifest(&rt.root, "billing", &["core-auth"], false);
    write_manifest(&rt.root, "audit", &[], true);

    let report = assert_ok!(rt.router.reload_all().await);
    assert_eq!(report.scan.updated, vec!["audit", "billing"]);
    assert_eq!(report.unloaded, vec!["billing"]);
    assert_eq!(report.reloaded, vec!["core-auth"]);
    assert_eq!(report.loaded, vec!["audit"]);
    assert_eq!(rt.router.namespaces(), vec!["audit", "core-auth"]);

    // core-auth was swapped for a new instance
    let response = rt.router.dispatch(get("/plugins/core-auth/info")).await;
    assert!(response.body["generation"].as_u64().unwrap() > 2);
}

#[tokio::test]
async fn test_malformed_manifest_is_rejected_without_aborting_scan() {
    let rt = runtime(&[("core-auth", &[], true)]);
    let broken = rt.root.join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("plugin.json"), "{ not json").unwrap();

    let report = assert_ok!(rt.router.reload_all().await);
    assert!(report.scan.rejected.contains_key("broken"));
    assert_eq!(report.loaded, vec!["core-auth"]);
    assert!(matches!(rt.manager.registry().get("broken"), Err(PluginError::NotFound { .. })));
}

#[test]
fn test_missing_plugin_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = FileManifestStore::new(dir.path().join("absent"));
    assert!(matches!(result, Err(PluginError::TransientIo { .. })));

    let store = Arc::new(FileManifestStore::new(dir.path()).unwrap());
    let registry = PluginRegistry::new(store);
    let report = tokio_test::block_on(registry.scan()).unwrap();
    assert_eq!(report.total_known(), 0);
}
