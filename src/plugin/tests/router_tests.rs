//! Tests for Dynamic Router
//!
//! Mounting, atomic reload and the dispatch error boundary.

use std::sync::Arc;
use super::mock_plugins::*;
use crate::plugin::error::PluginError;
use crate::plugin::router::DynamicRouter;
use crate::plugin::traits::{HttpMethod, PluginStatus, RouteRequest};

async fn loaded_runtime(ids: &[&str]) -> TestRuntime {
    let runtime = TestRuntime::new();
    for id in ids {
        runtime.add(id, &[], false, InitBehaviour::Succeed);
    }
    runtime.scan().await;
    for id in ids {
        runtime.router.load_plugin(id).await.unwrap();
    }
    runtime
}

#[tokio::test]
async fn test_routes_mounted_under_plugin_namespace() {
    let runtime = loaded_runtime(&["billing"]).await;

    let paths: Vec<String> = runtime.router.mounted_routes().into_iter().map(|r| r.path).collect();
    assert!(paths.contains(&"/plugins/billing/status".to_string()));
    assert!(paths.iter().all(|p| p.starts_with("/plugins/billing/")));
    assert_eq!(runtime.router.namespaces(), vec!["billing"]);

    let response = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/status")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["plugin"], "billing");
}

#[tokio::test]
async fn test_reload_cycle_restores_identical_routes() {
    let runtime = loaded_runtime(&["billing"]).await;
    let before = runtime.router.mounted_routes();

    runtime.router.unload_plugin("billing").await.unwrap();
    assert!(runtime.router.mounted_routes().is_empty());
    let response = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/status")).await;
    assert_eq!(response.status, 404);

    runtime.router.load_plugin("billing").await.unwrap();
    assert_eq!(runtime.router.mounted_routes(), before);
}

#[tokio::test]
async fn test_dependency_failure_leaves_routes_untouched() {
    let runtime = TestRuntime::new();
    runtime.add("core-auth", &[], false, InitBehaviour::Succeed);
    runtime.add("billing", &["core-auth"], false, InitBehaviour::Succeed);
    runtime.scan().await;

    let result = runtime.router.load_plugin("billing").await;
    assert!(matches!(result, Err(PluginError::DependencyError { .. })));
    assert!(runtime.router.mounted_routes().is_empty());

    runtime.router.load_plugin("core-auth").await.unwrap();
    runtime.router.load_plugin("billing").await.unwrap();
    assert_eq!(runtime.router.namespaces(), vec!["billing", "core-auth"]);

    let result = runtime.router.unload_plugin("core-auth").await;
    assert!(matches!(result, Err(PluginError::DependencyError { .. })));
    assert_eq!(runtime.router.namespaces(), vec!["billing", "core-auth"]);
}

#[tokio::test]
async fn test_dispatch_error_statuses() {
    let runtime = loaded_runtime(&["billing"]).await;
    let router = &runtime.router;

    let unknown = router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/ghost/status")).await;
    assert_eq!(unknown.status, 404);

    let outside = router.dispatch(RouteRequest::new(HttpMethod::Get, "/api/orders")).await;
    assert_eq!(outside.status, 404);

    let wrong_method = router.dispatch(RouteRequest::new(HttpMethod::Delete, "/plugins/billing/status")).await;
    assert_eq!(wrong_method.status, 405);

    let forbidden = router.dispatch(RouteRequest::new(HttpMethod::Post, "/plugins/billing/admin")).await;
    assert_eq!(forbidden.status, 403);

    let allowed = router
        .dispatch(RouteRequest::new(HttpMethod::Post, "/plugins/billing/admin").with_permission("admin"))
        .await;
    assert_eq!(allowed.status, 200);

    let invalid = router.dispatch(RouteRequest::new(HttpMethod::Post, "/plugins/billing/echo")).await;
    assert_eq!(invalid.status, 400);

    let echoed = router
        .dispatch(
            RouteRequest::new(HttpMethod::Post, "/plugins/billing/echo/")
                .with_body(serde_json::json!({ "amount": 12 })),
        )
        .await;
    assert_eq!(echoed.status, 200);
    assert_eq!(echoed.body["amount"], 12);
}

#[tokio::test]
async fn test_handler_failures_do_not_leak_internals() {
    let runtime = loaded_runtime(&["billing"]).await;

    let failed = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/broken")).await;
    assert_eq!(failed.status, 500);
    assert!(!failed.body.to_string().contains("secret"));

    let panicked = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/panic")).await;
    assert_eq!(panicked.status, 500);

    // The router keeps serving after a panicking handler
    let healthy = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/status")).await;
    assert_eq!(healthy.status, 200);
}

#[tokio::test]
async fn test_reload_all_mounts_exactly_enabled_plugins() {
    let runtime = TestRuntime::new();
    runtime.add("core-auth", &[], true, InitBehaviour::Succeed);
    runtime.add("billing", &["core-auth"], true, InitBehaviour::Succeed);
    runtime.add("reports", &[], true, InitBehaviour::Succeed);
    runtime.add("idle", &[], false, InitBehaviour::Succeed);

    let report = runtime.router.reload_all().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.loaded.len(), 3);
    assert_eq!(runtime.router.namespaces(), vec!["billing", "core-auth", "reports"]);

    // Disable one plugin on disk and reload again
    runtime.store.insert_raw("reports", &manifest("reports", &[], false));
    let report = runtime.router.reload_all().await.unwrap();
    assert_eq!(report.unloaded, vec!["reports"]);
    assert_eq!(report.reloaded, vec!["core-auth", "billing"]);
    assert_eq!(runtime.router.namespaces(), vec!["billing", "core-auth"]);
    assert!(!runtime.manager.is_loaded("reports").await);
}

#[tokio::test]
async fn test_reload_all_isolates_failures() {
    let runtime = TestRuntime::new();
    runtime.add("healthy", &[], true, InitBehaviour::Succeed);
    runtime.add("broken", &[], true, InitBehaviour::Fail);

    let report = runtime.router.reload_all().await.unwrap();
    assert!(!report.is_clean());
    assert!(report.failed.contains_key("broken"));
    assert_eq!(runtime.router.namespaces(), vec!["healthy"]);
}

#[tokio::test]
async fn test_reload_swaps_route_generation() {
    let runtime = TestRuntime::new();
    runtime.add("billing", &[], true, InitBehaviour::Succeed);
    runtime.router.reload_all().await.unwrap();

    let first = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/status")).await;
    assert_eq!(first.body["generation"], 1);

    runtime.router.reload_all().await.unwrap();
    let second = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/status")).await;
    assert_eq!(second.body["generation"], 2);
}

#[tokio::test]
async fn test_enable_and_disable_through_router() {
    let runtime = TestRuntime::new();
    runtime.add("billing", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    assert_eq!(runtime.router.enable_plugin("billing").await.unwrap(), 5);
    assert_eq!(runtime.router.namespaces(), vec!["billing"]);

    runtime.router.disable_plugin("billing").await.unwrap();
    assert!(runtime.router.namespaces().is_empty());
    assert_eq!(runtime.router.unregister_plugin_routes("billing"), 0);
}

#[tokio::test]
async fn test_registering_routes_of_unloaded_plugin_mounts_nothing() {
    let runtime = loaded_runtime(&["billing"]).await;
    runtime.add("reports", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    let result = runtime.router.register_plugin_routes("reports").await;
    assert!(matches!(result, Err(PluginError::InvalidState { .. })));
    assert_eq!(runtime.router.namespaces(), vec!["billing"]);

    runtime.manager.unload("billing").await.unwrap();
    let result = runtime.router.register_plugin_routes("billing").await;
    assert!(result.is_err());

    let response = runtime.router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/billing/status")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_unmount_refused_while_plugin_loading() {
    let runtime = TestRuntime::new();
    runtime.add("reports", &[], false, SLOW_INIT);
    runtime.scan().await;

    let router = Arc::new(DynamicRouter::new(Arc::clone(&runtime.manager)));
    let mounting = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.load_plugin("reports").await })
    };
    runtime.wait_for_status("reports", PluginStatus::Loading).await;

    let result = router.unload_plugin("reports").await;
    assert!(matches!(result, Err(PluginError::InvalidState { .. })));

    assert_eq!(mounting.await.unwrap().unwrap(), 5);
    assert_eq!(router.namespaces(), vec!["reports"]);
    let response = router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/reports/status")).await;
    assert_eq!(response.status, 200);
}
