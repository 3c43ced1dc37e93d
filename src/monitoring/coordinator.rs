//! Monitoring Coordinator
//!
//! Wires metric ingestion to threshold and trend evaluation, and owns the
//! periodic loop that detects silent plugins, probes system resources and
//! purges old alerts.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use crate::monitoring::alert::{Alert, AlertType, CandidateAlert, DedupKey, Severity};
use crate::monitoring::clock::{to_chrono, Clock};
use crate::monitoring::engine::{AlertEngine, AlertEngineConfig, PurgeReport};
use crate::monitoring::error::{MonitorError, MonitorResult};
use crate::monitoring::metrics::{MetricsPayload, MetricsStore, DEFAULT_SAMPLE_CAPACITY};
use crate::monitoring::store::{AlertStore, MemoryAlertStore};
use crate::monitoring::system::{SystemProbe, SystemSnapshot};
use crate::monitoring::threshold::{PivotTable, SharedThresholds, ThresholdConfig, ThresholdEvaluator};
use crate::monitoring::trend::{TrendAnalyzer, TrendConfig};
use crate::notifications::AlertNotifier;
use crate::plugin::PluginManager;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub tick_interval: Duration,
    /// Silence after which a plugin is considered offline
    pub inactivity_bound: Duration,
    /// Bound on joining the loop in [`MonitoringCoordinator::stop`]
    pub stop_timeout: Duration,
    pub sample_capacity: usize,
    /// Resolve threshold alerts automatically after this delay
    pub auto_resolve_after: Option<Duration>,
    pub alerts: AlertEngineConfig,
    pub trend: TrendConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            inactivity_bound: Duration::from_secs(5 * 60),
            stop_timeout: Duration::from_secs(5),
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            auto_resolve_after: None,
            alerts: AlertEngineConfig::default(),
            trend: TrendConfig::default(),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Plugins that went offline during this tick
    pub offline: Vec<String>,
    pub system: Option<SystemSnapshot>,
    /// Ids of system alerts raised
    pub system_alerts: Vec<String>,
    pub probe_error: Option<String>,
    pub purge: Option<PurgeReport>,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the monitoring loop
pub struct MonitoringCoordinator {
    config: MonitoringConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsStore>,
    thresholds: Arc<SharedThresholds>,
    evaluator: ThresholdEvaluator,
    trends: TrendAnalyzer,
    engine: Arc<AlertEngine>,
    probe: Arc<dyn SystemProbe>,
    plugins: Option<Arc<PluginManager>>,
    /// Derived from the metrics store: plugin id -> currently considered active
    activity: Mutex<HashMap<String, bool>>,
    running: Mutex<Option<RunningLoop>>,
}

impl MonitoringCoordinator {
    pub fn new(
        config: MonitoringConfig,
        engine: Arc<AlertEngine>,
        metrics: Arc<MetricsStore>,
        thresholds: Arc<SharedThresholds>,
        probe: Arc<dyn SystemProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let trends = TrendAnalyzer::new(Arc::clone(&metrics), config.trend.clone());
        Self {
            config,
            clock,
            metrics,
            thresholds,
            evaluator: ThresholdEvaluator::default(),
            trends,
            engine,
            probe,
            plugins: None,
            activity: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
        }
    }

    /// Coordinator over an in-memory alert store and a fresh notifier
    pub fn in_memory(
        config: MonitoringConfig,
        thresholds: ThresholdConfig,
        probe: Arc<dyn SystemProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store: Arc<dyn AlertStore> = Arc::new(MemoryAlertStore::new());
        Self::with_store(config, thresholds, store, Arc::new(AlertNotifier::new()), probe, clock)
    }

    /// Coordinator with its own metrics store and alert engine over `store`
    pub fn with_store(
        config: MonitoringConfig,
        thresholds: ThresholdConfig,
        store: Arc<dyn AlertStore>,
        notifier: Arc<AlertNotifier>,
        probe: Arc<dyn SystemProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(AlertEngine::new(config.alerts.clone(), Arc::clone(&clock), store, notifier));
        let metrics = Arc::new(MetricsStore::new(config.sample_capacity, Arc::clone(&clock)));
        let thresholds = Arc::new(SharedThresholds::new(thresholds));
        Self::new(config, engine, metrics, thresholds, probe, clock)
    }

    /// Use the plugin manager for plugin names and to ignore unloaded plugins
    pub fn with_plugin_manager(mut self, manager: Arc<PluginManager>) -> Self {
        self.plugins = Some(manager);
        self
    }

    pub fn with_pivots(mut self, pivots: PivotTable) -> Self {
        self.evaluator = ThresholdEvaluator::new(pivots);
        self
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn thresholds(&self) -> &Arc<SharedThresholds> {
        &self.thresholds
    }

    pub fn trends(&self) -> &TrendAnalyzer {
        &self.trends
    }

    /// Validate, store and evaluate one metrics payload.
    ///
    /// Returns the alerts that survived deduplication.
    pub async fn ingest(&self, payload: MetricsPayload) -> MonitorResult<Vec<Alert>> {
        let sample = payload.into_sample(self.clock.now())?;
        let plugin_id = sample.plugin_id.clone();
        self.metrics.ingest(sample.clone());
        self.mark_active(&plugin_id).await;

        let plugin_name = self.plugin_name(&plugin_id);
        let thresholds = self.thresholds.get();
        let mut candidates = self.evaluator.evaluate(&sample, &thresholds, plugin_name.as_deref());
        candidates.extend(self.trends.analyze(&plugin_id, plugin_name.as_deref()));

        let accepted = self.engine.accept_all(candidates).await;

        if let Some(delay) = self.config.auto_resolve_after {
            for alert in accepted.iter().filter(|a| a.metric.and_then(AlertType::for_threshold) == Some(a.alert_type)) {
                self.engine.auto_resolve_after(&alert.id, delay);
            }
        }
        Ok(accepted)
    }

    fn plugin_name(&self, plugin_id: &str) -> Option<String> {
        self.plugins
            .as_ref()
            .and_then(|m| m.registry().get(plugin_id).ok())
            .map(|d| d.name)
    }

    async fn mark_active(&self, plugin_id: &str) {
        let recovered = self.activity.lock().insert(plugin_id.to_string(), true) == Some(false);
        if recovered {
            log::info!("Plugin '{}' reporting again", plugin_id);
            if let Some(alert) = self.engine.resolve_by_key(&DedupKey::offline(plugin_id)).await {
                log::debug!("Resolved offline alert {} for '{}'", alert.id, plugin_id);
            }
        }
    }

    /// Whether the coordinator currently considers a plugin active
    pub fn is_active(&self, plugin_id: &str) -> Option<bool> {
        self.activity.lock().get(plugin_id).copied()
    }

    /// Rebuild the activity map from the metrics store
    pub fn rebuild_activity(&self) {
        let now = self.clock.now();
        let bound = to_chrono(self.config.inactivity_bound);
        let rebuilt: HashMap<String, bool> = self.metrics
            .activity_snapshot()
            .into_iter()
            .map(|(id, last)| (id, now - last <= bound))
            .collect();
        *self.activity.lock() = rebuilt;
    }

    /// Run one monitoring pass: offline detection, system probe, purge.
    ///
    /// A failed system probe ends the pass early.
    pub async fn run_tick(&self) -> TickReport {
        let mut report = TickReport::default();

        self.check_activity(&mut report).await;

        let probe = Arc::clone(&self.probe);
        let probed = tokio::task::spawn_blocking(move || probe.probe())
            .await
            .unwrap_or_else(|e| Err(MonitorError::probe_failed(format!("probe task failed: {}", e))));
        let snapshot = match probed {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("System probe failed, ending tick early: {}", e);
                report.probe_error = Some(e.to_string());
                return report;
            }
        };

        let candidates = self.evaluator.evaluate_system(&snapshot, &self.thresholds.get());
        report.system = Some(snapshot);
        report.system_alerts = self.engine
            .accept_all(candidates)
            .await
            .into_iter()
            .map(|a| a.id)
            .collect();

        report.purge = Some(self.engine.purge().await);
        report
    }

    async fn check_activity(&self, report: &mut TickReport) {
        let now = self.clock.now();
        let bound = to_chrono(self.config.inactivity_bound);

        let unloaded: Vec<String> = match &self.plugins {
            Some(manager) => {
                let loaded = manager.loaded_ids().await;
                manager
                    .registry()
                    .list()
                    .into_iter()
                    .filter(|d| !loaded.contains(&d.id))
                    .map(|d| d.id)
                    .collect()
            }
            None => Vec::new(),
        };

        let mut candidates = Vec::new();
        {
            let mut activity = self.activity.lock();
            for (plugin_id, last_activity) in self.metrics.activity_snapshot() {
                if unloaded.contains(&plugin_id) {
                    continue;
                }

                let idle = now - last_activity;
                let active = activity.entry(plugin_id.clone()).or_insert(true);
                if *active && idle > bound {
                    *active = false;
                    log::warn!("Plugin '{}' silent for {}s; marking inactive", plugin_id, idle.num_seconds());
                    candidates.push(self.offline_candidate(&plugin_id, idle.num_seconds()));
                }
            }
        }

        for candidate in candidates {
            let plugin_id = candidate.plugin_id.clone().unwrap_or_default();
            if self.engine.accept(candidate).await.is_some() {
                report.offline.push(plugin_id);
            }
        }
    }

    fn offline_candidate(&self, plugin_id: &str, idle_seconds: i64) -> CandidateAlert {
        let plugin_name = self.plugin_name(plugin_id);
        let display = plugin_name.clone().unwrap_or_else(|| plugin_id.to_string());
        let bound = self.config.inactivity_bound.as_secs();
        CandidateAlert::new(
            AlertType::PluginOffline,
            Severity::Error,
            format!("{} offline", display),
            format!("Plugin '{}' has not reported metrics for {}s (limit {}s)", plugin_id, idle_seconds, bound),
        )
        .for_plugin(plugin_id, plugin_name.as_deref())
        .with_values(idle_seconds as f64, bound as f64)
    }

    /// Start the periodic loop. Idempotent; must be called inside a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().map_or(false, |r| !r.handle.is_finished()) {
            log::debug!("Monitoring loop already running");
            return false;
        }

        let token = CancellationToken::new();
        let coordinator = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { coordinator.run_loop(loop_token).await });
        *running = Some(RunningLoop { token, handle });
        log::info!("Monitoring started (tick every {:?})", self.config.tick_interval);
        true
    }

    /// Stop the loop, waiting at most `stop_timeout`. Safe to call when not running.
    pub async fn stop(&self) {
        let Some(RunningLoop { token, mut handle }) = self.running.lock().take() else {
            log::debug!("Monitoring loop not running");
            return;
        };

        token.cancel();
        match tokio::time::timeout(self.config.stop_timeout, &mut handle).await {
            Ok(Ok(())) => log::info!("Monitoring stopped"),
            Ok(Err(e)) => log::warn!("Monitoring loop ended abnormally: {}", e),
            Err(_) => {
                log::warn!("Monitoring loop did not stop within {:?}; aborting", self.config.stop_timeout);
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().map_or(false, |r| !r.handle.is_finished())
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match AssertUnwindSafe(self.run_tick()).catch_unwind().await {
                        Ok(report) => log::trace!("Monitoring tick: {:?}", report),
                        Err(_) => log::error!("Monitoring tick panicked; continuing on next interval"),
                    }
                }
            }
        }
        log::debug!("Monitoring loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::clock::ManualClock;
    use crate::monitoring::engine::AlertFilter;
    use crate::monitoring::metrics::MetricKind;
    use crate::monitoring::system::FixedProbe;

    fn coordinator(clock: Arc<ManualClock>, probe: Arc<FixedProbe>) -> Arc<MonitoringCoordinator> {
        Arc::new(MonitoringCoordinator::in_memory(
            MonitoringConfig::default(),
            ThresholdConfig::default(),
            probe,
            clock,
        ))
    }

    #[tokio::test]
    async fn test_ingest_raises_warning_then_critical() {
        let clock = Arc::new(ManualClock::default());
        let coordinator = coordinator(clock.clone(), Arc::new(FixedProbe::idle()));

        let alerts = coordinator.ingest(MetricsPayload::new("billing").with_cpu(82.0)).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);

        let other = coordinator.ingest(MetricsPayload::new("orders").with_cpu(97.0)).await.unwrap();
        assert_eq!(other[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_payload() {
        let coordinator = coordinator(Arc::new(ManualClock::default()), Arc::new(FixedProbe::idle()));
        let result = coordinator.ingest(MetricsPayload::new("billing").with_memory(-3.0)).await;
        assert!(matches!(result, Err(MonitorError::ValidationError { .. })));
        assert!(coordinator.metrics().is_empty());
    }

    #[tokio::test]
    async fn test_offline_alert_raised_once_and_resolved_on_return() {
        let clock = Arc::new(ManualClock::default());
        let coordinator = coordinator(clock.clone(), Arc::new(FixedProbe::idle()));
        coordinator.ingest(MetricsPayload::new("billing").with_cpu(10.0)).await.unwrap();

        let mut offline = 0;
        for _ in 0..30 {
            clock.advance(Duration::from_secs(30));
            offline += coordinator.run_tick().await.offline.len();
        }
        assert_eq!(offline, 1);
        assert_eq!(coordinator.is_active("billing"), Some(false));

        let filter = AlertFilter { alert_type: Some(AlertType::PluginOffline), ..AlertFilter::default() };
        assert_eq!(coordinator.engine().list(&filter).len(), 1);

        coordinator.ingest(MetricsPayload::new("billing").with_cpu(10.0)).await.unwrap();
        assert_eq!(coordinator.is_active("billing"), Some(true));
        assert!(coordinator.engine().list(&filter)[0].resolved);
    }

    #[tokio::test]
    async fn test_rising_series_raises_one_trend_alert_per_cooldown() {
        let clock = Arc::new(ManualClock::default());
        let coordinator = coordinator(clock.clone(), Arc::new(FixedProbe::idle()));
        let trend = AlertFilter { alert_type: Some(AlertType::Trend), ..AlertFilter::default() };

        for i in 0..20 {
            clock.advance(Duration::from_secs(10));
            coordinator.ingest(MetricsPayload::new("billing").with_cpu(50.0 + i as f64)).await.unwrap();
        }
        let raised = coordinator.engine().list(&trend);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].metric, Some(MetricKind::CpuUsage));
        assert!(coordinator.engine().list(&AlertFilter::default()).iter().all(|a| a.alert_type == AlertType::Trend));

        clock.advance(Duration::from_secs(5 * 60));
        let alerts = coordinator.ingest(MetricsPayload::new("billing").with_cpu(70.0)).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Trend);
        assert_eq!(coordinator.engine().list(&trend).len(), 2);
    }

    #[tokio::test]
    async fn test_probe_failure_ends_tick_early() {
        let clock = Arc::new(ManualClock::default());
        let probe = Arc::new(FixedProbe::idle());
        probe.fail("no /proc");
        let coordinator = coordinator(clock, probe.clone());

        let report = coordinator.run_tick().await;
        assert!(report.probe_error.is_some());
        assert!(report.purge.is_none());

        probe.set(SystemSnapshot { cpu_usage: 99.0, memory_usage: 10.0, disk_usage: 10.0 });
        let report = coordinator.run_tick().await;
        assert_eq!(report.system_alerts.len(), 1);
        assert!(report.purge.is_some());

        // Same condition on the next tick is deduplicated
        let report = coordinator.run_tick().await;
        assert!(report.system_alerts.is_empty());
    }

    #[tokio::test]
    async fn test_auto_resolve_threshold_alerts() {
        let config = MonitoringConfig {
            auto_resolve_after: Some(Duration::from_millis(20)),
            ..MonitoringConfig::default()
        };
        let coordinator = MonitoringCoordinator::in_memory(
            config,
            ThresholdConfig::default(),
            Arc::new(FixedProbe::idle()),
            Arc::new(ManualClock::default()),
        );

        let alerts = coordinator.ingest(MetricsPayload::new("billing").with_cpu(90.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(coordinator.engine().get(&alerts[0].id).unwrap().resolved);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let coordinator = coordinator(Arc::new(ManualClock::default()), Arc::new(FixedProbe::idle()));

        coordinator.stop().await;
        assert!(coordinator.start());
        assert!(!coordinator.start());
        assert!(coordinator.is_running());

        coordinator.stop().await;
        assert!(!coordinator.is_running());
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_rebuild_activity_from_store() {
        let clock = Arc::new(ManualClock::default());
        let coordinator = coordinator(clock.clone(), Arc::new(FixedProbe::idle()));
        coordinator.ingest(MetricsPayload::new("billing")).await.unwrap();
        clock.advance(Duration::from_secs(10 * 60));
        coordinator.ingest(MetricsPayload::new("orders")).await.unwrap();

        coordinator.rebuild_activity();
        assert_eq!(coordinator.is_active("billing"), Some(false));
        assert_eq!(coordinator.is_active("orders"), Some(true));
    }
}
