//! Integration tests for the alerting pipeline
//!
//! Metrics go in through the coordinator; alerts come out through the
//! notifier, the alert store and the alert feed plugin routes.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use plugmon::monitoring::{
    AlertFilter, AlertType, FileAlertStore, FixedProbe, ManualClock, MetricsPayload, MonitoringConfig,
    MonitoringCoordinator, Severity, SystemSnapshot, ThresholdConfig,
};
use plugmon::notifications::{AlertNotifier, BroadcastSink};
use plugmon::plugin::{
    builtin, BuiltinLoader, DynamicRouter, HttpMethod, MemoryManifestStore, PluginDescriptor, PluginManager,
    PluginRegistry, RouteRequest,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Pipeline {
    clock: Arc<ManualClock>,
    probe: Arc<FixedProbe>,
    notifier: Arc<AlertNotifier>,
    coordinator: Arc<MonitoringCoordinator>,
}

fn pipeline_with_store(store_dir: &TempDir) -> Pipeline {
    init_logging();
    let clock = Arc::new(ManualClock::default());
    let probe = Arc::new(FixedProbe::idle());
    let notifier = Arc::new(AlertNotifier::new());
    let coordinator = Arc::new(MonitoringCoordinator::with_store(
        MonitoringConfig::default(),
        ThresholdConfig::default(),
        Arc::new(FileAlertStore::new(store_dir.path().join("alerts.json"))),
        Arc::clone(&notifier),
        probe.clone(),
        clock.clone(),
    ));
    Pipeline { clock, probe, notifier, coordinator }
}

#[tokio::test]
async fn test_warning_and_critical_from_pivot() {
    let dir = TempDir::new().unwrap();
    let p = pipeline_with_store(&dir);

    let warning = p.coordinator.ingest(MetricsPayload::new("billing").with_cpu(82.0)).await.unwrap();
    assert_eq!(warning.len(), 1);
    assert_eq!(warning[0].alert_type, AlertType::HighCpu);
    assert_eq!(warning[0].severity, Severity::Warning);
    assert_eq!(warning[0].threshold_value, 80.0);

    let critical = p.coordinator.ingest(MetricsPayload::new("orders").with_cpu(97.0)).await.unwrap();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].severity, Severity::Critical);
    assert_eq!(critical[0].current_value, 97.0);
}

#[tokio::test]
async fn test_repeated_condition_deduplicated_within_cooldown() {
    let dir = TempDir::new().unwrap();
    let p = pipeline_with_store(&dir);
    let sink = Arc::new(BroadcastSink::new("dashboard", 64));
    let mut deliveries = sink.subscribe();
    p.notifier.register_sink(sink).unwrap();

    // Every 10s for 4 minutes
    let mut raised = 0;
    for _ in 0..24 {
        raised += p.coordinator.ingest(MetricsPayload::new("billing").with_cpu(97.0)).await.unwrap().len();
        p.clock.advance(Duration::from_secs(10));
    }
    assert_eq!(raised, 1);
    assert!(deliveries.try_recv().is_ok());
    assert!(deliveries.try_recv().is_err());

    // Cooldown (5 minutes) has elapsed since the first alert
    p.clock.advance(Duration::from_secs(61));
    let again = p.coordinator.ingest(MetricsPayload::new("billing").with_cpu(97.0)).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].severity, Severity::Critical);

    let filter = AlertFilter { plugin_id: Some("billing".to_string()), ..AlertFilter::default() };
    assert_eq!(p.coordinator.engine().list(&filter).len(), 2);
}

#[tokio::test]
async fn test_silent_plugin_raises_single_offline_alert() {
    let dir = TempDir::new().unwrap();
    let p = pipeline_with_store(&dir);
    p.coordinator.ingest(MetricsPayload::new("billing").with_cpu(5.0)).await.unwrap();

    let mut offline = Vec::new();
    for _ in 0..20 {
        p.clock.advance(Duration::from_secs(60));
        offline.extend(p.coordinator.run_tick().await.offline);
    }
    assert_eq!(offline, vec!["billing"]);

    let alerts = p.coordinator.engine().list(&AlertFilter {
        alert_type: Some(AlertType::PluginOffline),
        ..AlertFilter::default()
    });
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Error);
    assert!(!alerts[0].resolved);

    p.coordinator.ingest(MetricsPayload::new("billing").with_cpu(5.0)).await.unwrap();
    assert!(p.coordinator.engine().get(&alerts[0].id).unwrap().resolved);
}

#[tokio::test]
async fn test_system_breach_raised_from_probe() {
    let dir = TempDir::new().unwrap();
    let p = pipeline_with_store(&dir);
    p.probe.set(SystemSnapshot { cpu_usage: 10.0, memory_usage: 10.0, disk_usage: 97.0 });

    let report = p.coordinator.run_tick().await;
    assert_eq!(report.system_alerts.len(), 1);
    let alert = p.coordinator.engine().get(&report.system_alerts[0]).unwrap();
    assert_eq!(alert.alert_type, AlertType::SystemDisk);
    assert!(alert.plugin_id.is_none());
}

#[tokio::test]
async fn test_alerts_and_cooldowns_survive_restart() {
    let dir = TempDir::new().unwrap();
    let first = pipeline_with_store(&dir);
    let raised = first.coordinator.ingest(MetricsPayload::new("billing").with_cpu(97.0)).await.unwrap();
    assert_eq!(raised.len(), 1);
    let resolved_elsewhere = first.coordinator.ingest(MetricsPayload::new("orders").with_cpu(85.0)).await.unwrap();
    first.coordinator.engine().resolve(&resolved_elsewhere[0].id).await.unwrap();

    let second = pipeline_with_store(&dir);
    let restored = second.coordinator.engine().restore().await.unwrap();
    assert_eq!(restored, 2);

    let restored_alert = second.coordinator.engine().get(&raised[0].id).unwrap();
    assert!(!restored_alert.resolved);
    assert!(second.coordinator.engine().get(&resolved_elsewhere[0].id).unwrap().resolved);

    // Cooldown carried over from the first process
    let repeat = second.coordinator.ingest(MetricsPayload::new("billing").with_cpu(97.0)).await.unwrap();
    assert!(repeat.is_empty());
}

#[tokio::test]
async fn test_alert_feed_routes_over_live_engine() {
    init_logging();
    let manifests = Arc::new(MemoryManifestStore::new());
    manifests
        .insert(
            builtin::alert_feed::PLUGIN_ID,
            &PluginDescriptor::new(builtin::alert_feed::PLUGIN_ID, "1.0.0").with_enabled(true).to_manifest(),
        )
        .unwrap();
    let loader = Arc::new(BuiltinLoader::with_builtins());
    let manager = Arc::new(PluginManager::new(Arc::new(PluginRegistry::new(manifests)), loader.clone()));
    let router = DynamicRouter::new(Arc::clone(&manager));

    let coordinator = MonitoringCoordinator::in_memory(
        MonitoringConfig::default(),
        ThresholdConfig::default(),
        Arc::new(FixedProbe::idle()),
        Arc::new(ManualClock::default()),
    )
    .with_plugin_manager(Arc::clone(&manager));
    builtin::register_alert_feed(&loader, Arc::clone(coordinator.engine()));

    let report = router.reload_all().await.unwrap();
    assert_eq!(report.loaded, vec![builtin::alert_feed::PLUGIN_ID]);

    let raised = coordinator.ingest(MetricsPayload::new("billing").with_error_rate(20.0)).await.unwrap();
    assert_eq!(raised.len(), 1);

    let listed = router.dispatch(RouteRequest::new(HttpMethod::Get, "/plugins/alert-feed/alerts")).await;
    assert_eq!(listed.status, 200);
    assert_eq!(listed.body["count"], 1);

    let body = serde_json::json!({ "id": raised[0].id });
    let denied = router
        .dispatch(RouteRequest::new(HttpMethod::Post, "/plugins/alert-feed/resolve").with_body(body.clone()))
        .await;
    assert_eq!(denied.status, 403);

    let resolved = router
        .dispatch(
            RouteRequest::new(HttpMethod::Post, "/plugins/alert-feed/resolve")
                .with_body(body)
                .with_permission(builtin::alert_feed::WRITE_PERMISSION),
        )
        .await;
    assert_eq!(resolved.status, 200);
    assert!(coordinator.engine().get(&raised[0].id).unwrap().resolved);
}
