//! Administrative Facade
//!
//! Every administrative operation over the plugin runtime and the alerting
//! engine, returning a uniform [`ApiResponse`]. An HTTP layer can serialise
//! these directly; no operation panics or returns a bare error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::monitoring::{
    Alert, AlertFilter, AlertSummary, Baseline, MetricKind, MetricsPayload, MonitorError,
    MonitoringCoordinator, PluginMetricsSnapshot, ThresholdConfig,
};
use crate::plugin::{DynamicRouter, MountedRouteInfo, PluginError, PluginSummary, ReloadReport};

/// Classification of a failed administrative operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Dependency,
    Load,
    Validation,
    TransientIo,
    Permission,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Load => "load",
            ErrorKind::Validation => "validation",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Permission => "permission",
            ErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Error body of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&PluginError> for ApiError {
    fn from(err: &PluginError) -> Self {
        let kind = match err {
            PluginError::NotFound { .. } | PluginError::RouteNotFound { .. } => ErrorKind::NotFound,
            PluginError::DependencyError { .. } => ErrorKind::Dependency,
            PluginError::LoadError { .. } => ErrorKind::Load,
            PluginError::ValidationError { .. }
            | PluginError::VersionIncompatible { .. }
            | PluginError::InvalidState { .. } => ErrorKind::Validation,
            PluginError::TransientIo { .. } => ErrorKind::TransientIo,
            PluginError::PermissionDenied { .. } => ErrorKind::Permission,
        };
        Self { kind, detail: err.to_string() }
    }
}

impl From<&MonitorError> for ApiError {
    fn from(err: &MonitorError) -> Self {
        let kind = match err {
            MonitorError::AlertNotFound { .. } | MonitorError::NoMetrics { .. } => ErrorKind::NotFound,
            MonitorError::ValidationError { .. } => ErrorKind::Validation,
            MonitorError::TransientIo { .. } => ErrorKind::TransientIo,
            MonitorError::ProbeFailed { .. } => ErrorKind::Internal,
        };
        Self { kind, detail: err.to_string() }
    }
}

/// Uniform `{success, message, data, error}` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: ApiError) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error),
        }
    }

    /// Error kind of a failed response
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Outcome of [`AdminService::bulk_resolve_alerts`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkResolveReport {
    pub resolved: Vec<Alert>,
    pub failed: BTreeMap<String, ApiError>,
}

/// Metrics view of one plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginMetricsView {
    #[serde(flatten)]
    pub snapshot: PluginMetricsSnapshot,
    /// Least-squares slope over the trend window, where the window is full
    pub trends: BTreeMap<MetricKind, f64>,
    pub baselines: BTreeMap<MetricKind, Baseline>,
    pub active: Option<bool>,
}

/// Facade over the router (and through it the plugin manager) and the
/// monitoring coordinator
pub struct AdminService {
    router: Arc<DynamicRouter>,
    monitoring: Arc<MonitoringCoordinator>,
}

impl AdminService {
    pub fn new(router: Arc<DynamicRouter>, monitoring: Arc<MonitoringCoordinator>) -> Self {
        Self { router, monitoring }
    }

    pub fn router(&self) -> &Arc<DynamicRouter> {
        &self.router
    }

    pub fn monitoring(&self) -> &Arc<MonitoringCoordinator> {
        &self.monitoring
    }

    // Alerts

    pub fn list_alerts(&self, filter: &AlertFilter) -> ApiResponse<Vec<Alert>> {
        let alerts = self.monitoring.engine().list(filter);
        ApiResponse::ok(format!("{} alert(s)", alerts.len()), alerts)
    }

    pub fn get_alert(&self, alert_id: &str) -> ApiResponse<Alert> {
        match self.monitoring.engine().get(alert_id) {
            Ok(alert) => ApiResponse::ok("Alert found", alert),
            Err(e) => monitor_failure("Failed to get alert", &e),
        }
    }

    pub async fn resolve_alert(&self, alert_id: &str) -> ApiResponse<Alert> {
        match self.monitoring.engine().resolve(alert_id).await {
            Ok(alert) => ApiResponse::ok(format!("Alert {} resolved", alert_id), alert),
            Err(e) => monitor_failure("Failed to resolve alert", &e),
        }
    }

    /// Resolve several alerts; succeeds when at least one id resolved
    pub async fn bulk_resolve_alerts(&self, alert_ids: &[String]) -> ApiResponse<BulkResolveReport> {
        let outcomes = self.monitoring.engine().bulk_resolve(alert_ids).await;
        let mut report = BulkResolveReport::default();
        for (alert_id, outcome) in outcomes {
            match outcome {
                Ok(alert) => report.resolved.push(alert),
                Err(e) => {
                    report.failed.insert(alert_id, ApiError::from(&e));
                }
            }
        }

        let message = format!("{} resolved, {} failed", report.resolved.len(), report.failed.len());
        if report.resolved.is_empty() && !report.failed.is_empty() {
            let error = ApiError {
                kind: ErrorKind::NotFound,
                detail: "No alert could be resolved".to_string(),
            };
            let mut response = ApiResponse::failed(message, error);
            response.data = Some(report);
            return response;
        }
        ApiResponse::ok(message, report)
    }

    pub fn alert_summary(&self) -> ApiResponse<AlertSummary> {
        ApiResponse::ok("Alert summary", self.monitoring.engine().summary())
    }

    // Thresholds

    pub fn get_thresholds(&self) -> ApiResponse<ThresholdConfig> {
        ApiResponse::ok("Current thresholds", self.monitoring.thresholds().get())
    }

    /// Replace the threshold configuration; invalid configs leave the current one in place
    pub fn update_thresholds(&self, config: ThresholdConfig) -> ApiResponse<ThresholdConfig> {
        match self.monitoring.thresholds().update(config.clone()) {
            Ok(_) => {
                log::info!("Thresholds updated: {:?}", config);
                ApiResponse::ok("Thresholds updated", config)
            }
            Err(e) => monitor_failure("Failed to update thresholds", &e),
        }
    }

    // Metrics

    pub fn get_plugin_metrics(&self, plugin_id: &str) -> ApiResponse<PluginMetricsView> {
        let Some(snapshot) = self.monitoring.metrics().snapshot(plugin_id) else {
            return monitor_failure("Failed to get metrics", &MonitorError::no_metrics(plugin_id));
        };

        let trends = self.monitoring.trends();
        let view = PluginMetricsView {
            snapshot,
            trends: MetricKind::ALL
                .iter()
                .filter_map(|&metric| trends.trend(plugin_id, metric).map(|slope| (metric, slope)))
                .collect(),
            baselines: MetricKind::ALL
                .iter()
                .filter_map(|&metric| trends.baseline(plugin_id, metric).map(|b| (metric, b)))
                .collect(),
            active: self.monitoring.is_active(plugin_id),
        };
        ApiResponse::ok(format!("Metrics for {}", plugin_id), view)
    }

    /// Ingest a metrics payload; the data is the alerts it raised
    pub async fn update_plugin_metrics(&self, payload: MetricsPayload) -> ApiResponse<Vec<Alert>> {
        let plugin_id = payload.plugin_id.clone();
        match self.monitoring.ingest(payload).await {
            Ok(alerts) => ApiResponse::ok(
                format!("Metrics recorded for {} ({} alert(s))", plugin_id, alerts.len()),
                alerts,
            ),
            Err(e) => monitor_failure("Failed to record metrics", &e),
        }
    }

    // Plugins

    pub async fn list_plugins(&self) -> ApiResponse<Vec<PluginSummary>> {
        let plugins = self.router.manager().list().await;
        ApiResponse::ok(format!("{} plugin(s)", plugins.len()), plugins)
    }

    pub async fn get_plugin(&self, plugin_id: &str) -> ApiResponse<PluginSummary> {
        match self.summary_of(plugin_id).await {
            Ok(summary) => ApiResponse::ok("Plugin found", summary),
            Err(e) => plugin_failure("Failed to get plugin", &e),
        }
    }

    pub async fn load_plugin(&self, plugin_id: &str) -> ApiResponse<PluginSummary> {
        let result = self.router.load_plugin(plugin_id).await.map(|_| ());
        self.plugin_action(plugin_id, "loaded", result).await
    }

    pub async fn unload_plugin(&self, plugin_id: &str) -> ApiResponse<PluginSummary> {
        let result = self.router.unload_plugin(plugin_id).await;
        self.plugin_action(plugin_id, "unloaded", result).await
    }

    pub async fn enable_plugin(&self, plugin_id: &str) -> ApiResponse<PluginSummary> {
        let result = self.router.enable_plugin(plugin_id).await.map(|_| ());
        self.plugin_action(plugin_id, "enabled", result).await
    }

    pub async fn disable_plugin(&self, plugin_id: &str) -> ApiResponse<PluginSummary> {
        let result = self.router.disable_plugin(plugin_id).await;
        self.plugin_action(plugin_id, "disabled", result).await
    }

    /// Rescan manifests and reconcile loaded plugins with the enabled set
    pub async fn reload_plugins(&self) -> ApiResponse<ReloadReport> {
        match self.router.reload_all().await {
            Ok(report) => {
                self.monitoring.rebuild_activity();
                let message = format!(
                    "{} reloaded, {} loaded, {} unloaded, {} failed",
                    report.reloaded.len(),
                    report.loaded.len(),
                    report.unloaded.len(),
                    report.failed.len()
                );
                ApiResponse::ok(message, report)
            }
            Err(e) => plugin_failure("Failed to reload plugins", &e),
        }
    }

    pub fn list_routes(&self) -> ApiResponse<Vec<MountedRouteInfo>> {
        let routes = self.router.mounted_routes();
        ApiResponse::ok(format!("{} route(s)", routes.len()), routes)
    }

    async fn summary_of(&self, plugin_id: &str) -> Result<PluginSummary, PluginError> {
        self.router
            .manager()
            .list()
            .await
            .into_iter()
            .find(|s| s.descriptor.id == plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))
    }

    async fn plugin_action(
        &self,
        plugin_id: &str,
        verb: &str,
        result: Result<(), PluginError>,
    ) -> ApiResponse<PluginSummary> {
        if let Err(e) = result {
            return plugin_failure(&format!("Plugin {} could not be {}", plugin_id, verb), &e);
        }
        match self.summary_of(plugin_id).await {
            Ok(summary) => ApiResponse::ok(format!("Plugin {} {}", plugin_id, verb), summary),
            Err(e) => plugin_failure(&format!("Plugin {} {}", plugin_id, verb), &e),
        }
    }
}

fn plugin_failure<T>(message: &str, err: &PluginError) -> ApiResponse<T> {
    log::warn!("{}: {}", message, err);
    ApiResponse::failed(message, ApiError::from(err))
}

fn monitor_failure<T>(message: &str, err: &MonitorError) -> ApiResponse<T> {
    log::warn!("{}: {}", message, err);
    ApiResponse::failed(message, ApiError::from(err))
}
