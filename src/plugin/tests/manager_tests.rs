//! Tests for Plugin Manager
//!
//! Lifecycle transitions, dependency enforcement and failure isolation.

use std::sync::Arc;
use super::mock_plugins::*;
use crate::plugin::error::PluginError;
use crate::plugin::traits::PluginStatus;

#[tokio::test]
async fn test_load_requires_loaded_dependencies() {
    let runtime = TestRuntime::new();
    let core = runtime.add("core-auth", &[], false, InitBehaviour::Succeed);
    let billing = runtime.add("billing", &["core-auth"], false, InitBehaviour::Succeed);
    runtime.scan().await;

    let result = runtime.manager.load("billing").await;
    assert!(matches!(result, Err(PluginError::DependencyError { .. })));
    assert_eq!(runtime.manager.status("billing").await.unwrap(), PluginStatus::Discovered);
    assert!(runtime.manager.loaded_ids().await.is_empty());
    assert_eq!(billing.inits(), 0);

    runtime.manager.load("core-auth").await.unwrap();
    runtime.manager.load("billing").await.unwrap();
    assert_eq!(core.inits(), 1);
    assert_eq!(billing.inits(), 1);
    assert_eq!(runtime.manager.status("billing").await.unwrap(), PluginStatus::Loaded);
}

#[tokio::test]
async fn test_unload_refused_while_dependents_loaded() {
    let runtime = TestRuntime::new();
    let core = runtime.add("core-auth", &[], false, InitBehaviour::Succeed);
    runtime.add("billing", &["core-auth"], false, InitBehaviour::Succeed);
    runtime.scan().await;
    runtime.manager.load("core-auth").await.unwrap();
    runtime.manager.load("billing").await.unwrap();

    let result = runtime.manager.unload("core-auth").await;
    assert!(matches!(result, Err(PluginError::DependencyError { .. })));
    assert!(runtime.manager.is_loaded("core-auth").await);
    assert_eq!(core.cleanups(), 0);

    runtime.manager.unload("billing").await.unwrap();
    runtime.manager.unload("core-auth").await.unwrap();
    assert_eq!(core.cleanups(), 1);
    assert_eq!(runtime.manager.status("core-auth").await.unwrap(), PluginStatus::Discovered);
}

#[tokio::test]
async fn test_load_and_unload_are_idempotent() {
    let runtime = TestRuntime::new();
    let counters = runtime.add("billing", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    runtime.manager.load("billing").await.unwrap();
    runtime.manager.load("billing").await.unwrap();
    assert_eq!(counters.inits(), 1);

    runtime.manager.unload("billing").await.unwrap();
    runtime.manager.unload("billing").await.unwrap();
    assert_eq!(counters.cleanups(), 1);
}

#[tokio::test]
async fn test_unknown_plugin_is_not_found() {
    let runtime = TestRuntime::new();
    runtime.scan().await;

    assert!(matches!(runtime.manager.load("ghost").await, Err(PluginError::NotFound { .. })));
    assert!(matches!(runtime.manager.status("ghost").await, Err(PluginError::NotFound { .. })));
    assert!(matches!(runtime.manager.enable("ghost").await, Err(PluginError::NotFound { .. })));
}

#[tokio::test]
async fn test_init_failure_and_panic_become_load_errors() {
    let runtime = TestRuntime::new();
    runtime.add("refuses", &[], false, InitBehaviour::Fail);
    runtime.add("explodes", &[], false, InitBehaviour::Panic);
    runtime.add("healthy", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    let refused = runtime.manager.load("refuses").await;
    assert!(matches!(refused, Err(PluginError::LoadError { ref plugin_id, .. }) if plugin_id == "refuses"));
    assert_eq!(runtime.manager.status("refuses").await.unwrap(), PluginStatus::Failed);

    let exploded = runtime.manager.load("explodes").await;
    assert!(matches!(exploded, Err(PluginError::LoadError { .. })));
    assert_eq!(runtime.manager.status("explodes").await.unwrap(), PluginStatus::Failed);

    runtime.manager.load("healthy").await.unwrap();
    let summaries = runtime.manager.list().await;
    let failed = summaries.iter().find(|s| s.descriptor.id == "explodes").unwrap();
    assert!(failed.last_error.as_deref().unwrap().contains("panicked"));
    assert_eq!(runtime.manager.loaded_ids().await.into_iter().collect::<Vec<_>>(), vec!["healthy"]);
}

#[tokio::test]
async fn test_cleanup_failure_is_swallowed() {
    let runtime = TestRuntime::new();
    let counters = runtime.add("sticky", &[], false, InitBehaviour::FailingCleanup);
    runtime.scan().await;

    runtime.manager.load("sticky").await.unwrap();
    runtime.manager.unload("sticky").await.unwrap();
    assert_eq!(counters.cleanups(), 1);
    assert!(!runtime.manager.is_loaded("sticky").await);
}

#[tokio::test]
async fn test_enable_and_disable_persist_flag() {
    let runtime = TestRuntime::new();
    runtime.add("billing", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    runtime.manager.enable("billing").await.unwrap();
    assert!(runtime.manager.is_loaded("billing").await);
    assert!(runtime.store.manifest("billing").unwrap().enabled);
    assert!(runtime.manager.registry().enabled_ids().contains("billing"));

    runtime.manager.disable("billing").await.unwrap();
    assert!(!runtime.manager.is_loaded("billing").await);
    assert!(!runtime.store.manifest("billing").unwrap().enabled);
}

#[tokio::test]
async fn test_reload_swaps_instance() {
    let runtime = TestRuntime::new();
    let counters = runtime.add("billing", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    runtime.manager.load("billing").await.unwrap();
    runtime.manager.reload("billing").await.unwrap();

    assert_eq!(counters.inits(), 2);
    assert_eq!(counters.cleanups(), 1);
    assert_eq!(runtime.manager.status("billing").await.unwrap(), PluginStatus::Loaded);
}

#[tokio::test]
async fn test_load_all_and_unload_all_follow_dependency_order() {
    let runtime = TestRuntime::new();
    runtime.add("core-auth", &[], true, InitBehaviour::Succeed);
    runtime.add("billing", &["core-auth"], true, InitBehaviour::Succeed);
    runtime.add("reports", &["billing"], true, InitBehaviour::Succeed);
    runtime.add("idle", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    let results = runtime.manager.load_all_enabled().await;
    assert_eq!(results.len(), 3);
    assert!(results.values().all(|r| r.is_ok()));
    assert!(!runtime.manager.is_loaded("idle").await);

    let results = runtime.manager.unload_all().await;
    assert!(results.values().all(|r| r.is_ok()));
    assert!(runtime.manager.loaded_ids().await.is_empty());
}

#[tokio::test]
async fn test_routes_only_available_while_loaded() {
    let runtime = TestRuntime::new();
    runtime.add("billing", &[], false, InitBehaviour::Succeed);
    runtime.scan().await;

    assert!(matches!(runtime.manager.routes("billing").await, Err(PluginError::InvalidState { .. })));
    runtime.manager.load("billing").await.unwrap();
    assert_eq!(runtime.manager.routes("billing").await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_disable_refused_while_loading() {
    let runtime = TestRuntime::new();
    runtime.add("reports", &[], true, SLOW_INIT);
    runtime.scan().await;

    let manager = Arc::clone(&runtime.manager);
    let loading = tokio::spawn(async move { manager.load("reports").await });
    runtime.wait_for_status("reports", PluginStatus::Loading).await;

    let result = runtime.manager.disable("reports").await;
    assert!(matches!(result, Err(PluginError::InvalidState { .. })));
    assert!(runtime.store.manifest("reports").unwrap().enabled);

    loading.await.unwrap().unwrap();
    assert_eq!(runtime.manager.status("reports").await.unwrap(), PluginStatus::Loaded);
    assert!(runtime.manager.registry().enabled_ids().contains("reports"));
}

#[tokio::test]
async fn test_dependency_unload_refused_while_dependent_loading() {
    let runtime = TestRuntime::new();
    let core = runtime.add("core-auth", &[], false, InitBehaviour::Succeed);
    runtime.add("billing", &["core-auth"], false, SLOW_INIT);
    runtime.scan().await;
    runtime.manager.load("core-auth").await.unwrap();

    let manager = Arc::clone(&runtime.manager);
    let loading = tokio::spawn(async move { manager.load("billing").await });
    runtime.wait_for_status("billing", PluginStatus::Loading).await;

    let result = runtime.manager.unload("core-auth").await;
    assert!(matches!(result, Err(PluginError::DependencyError { .. })));
    assert_eq!(core.cleanups(), 0);

    loading.await.unwrap().unwrap();
    assert!(runtime.manager.is_loaded("core-auth").await);
    assert!(runtime.manager.is_loaded("billing").await);
}

#[tokio::test]
async fn test_unload_refused_while_reloading() {
    let runtime = TestRuntime::new();
    let counters = runtime.add("billing", &[], false, SLOW_INIT);
    runtime.scan().await;
    runtime.manager.load("billing").await.unwrap();

    let manager = Arc::clone(&runtime.manager);
    let reloading = tokio::spawn(async move { manager.reload("billing").await });
    while counters.inits() < 2 {
        tokio::task::yield_now().await;
    }

    let result = runtime.manager.unload("billing").await;
    assert!(matches!(result, Err(PluginError::InvalidState { .. })));
    assert!(runtime.manager.is_loaded("billing").await);

    reloading.await.unwrap().unwrap();
    assert!(runtime.manager.is_loaded("billing").await);
    assert_eq!(counters.cleanups(), 1);

    runtime.manager.unload("billing").await.unwrap();
    assert_eq!(counters.cleanups(), 2);
}
