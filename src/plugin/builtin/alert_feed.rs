//! Alert feed plugin: read and resolve alerts through plugin routes
//!
//! - `GET  /plugins/alert-feed/alerts`   unresolved alerts, newest first
//! - `GET  /plugins/alert-feed/summary`  counts by severity and type
//! - `POST /plugins/alert-feed/resolve`  `{"id": "..."}`, needs `alerts:write`

use std::sync::Arc;
use crate::monitoring::{AlertEngine, AlertFilter, MonitorError};
use crate::plugin::error::PluginError;
use crate::plugin::traits::{
    route_handler, HttpMethod, Plugin, PluginDescriptor, RouteDescriptor, RouteResponse,
};

pub const PLUGIN_ID: &str = "alert-feed";

/// Permission required to resolve alerts
pub const WRITE_PERMISSION: &str = "alerts:write";

const DEFAULT_LIMIT: usize = 50;

pub struct AlertFeedPlugin {
    engine: Arc<AlertEngine>,
    default_limit: usize,
}

impl AlertFeedPlugin {
    pub fn new(descriptor: &PluginDescriptor, engine: Arc<AlertEngine>) -> Self {
        let default_limit = descriptor
            .config
            .get("default_limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_LIMIT);
        Self { engine, default_limit }
    }
}

impl Plugin for AlertFeedPlugin {
    fn plugin_id(&self) -> &str {
        PLUGIN_ID
    }

    fn routes(&self) -> Vec<RouteDescriptor> {
        let list_engine = Arc::clone(&self.engine);
        let default_limit = self.default_limit;
        let list = RouteDescriptor::new(
            "/alerts",
            &[HttpMethod::Get],
            route_handler(move |request| {
                let engine = Arc::clone(&list_engine);
                async move {
                    let limit = match request.query.get("limit") {
                        Some(raw) => match raw.parse::<usize>() {
                            Ok(limit) => limit,
                            Err(_) => return Err(PluginError::validation(format!("Invalid limit: {}", raw))),
                        },
                        None => default_limit,
                    };
                    let filter = AlertFilter {
                        plugin_id: request.query.get("plugin_id").cloned(),
                        limit: Some(limit),
                        ..AlertFilter::unresolved()
                    };
                    let alerts = engine.list(&filter);
                    Ok(RouteResponse::ok(serde_json::json!({
                        "success": true,
                        "count": alerts.len(),
                        "alerts": alerts,
                    })))
                }
            }),
        );

        let summary_engine = Arc::clone(&self.engine);
        let summary = RouteDescriptor::new(
            "/summary",
            &[HttpMethod::Get],
            route_handler(move |_request| {
                let engine = Arc::clone(&summary_engine);
                async move {
                    Ok(RouteResponse::ok(serde_json::json!({
                        "success": true,
                        "summary": engine.summary(),
                    })))
                }
            }),
        );

        let resolve_engine = Arc::clone(&self.engine);
        let resolve = RouteDescriptor::new(
            "/resolve",
            &[HttpMethod::Post],
            route_handler(move |request| {
                let engine = Arc::clone(&resolve_engine);
                async move {
                    let Some(alert_id) = request.body.get("id").and_then(|v| v.as_str()).map(str::to_string) else {
                        return Err(PluginError::validation("Request body must contain an alert id"));
                    };
                    match engine.resolve(&alert_id).await {
                        Ok(alert) => Ok(RouteResponse::ok(serde_json::json!({
                            "success": true,
                            "alert": alert,
                        }))),
                        Err(MonitorError::AlertNotFound { .. }) => Ok(RouteResponse::error(404, "Alert not found")),
                        Err(e) => Err(PluginError::transient_io(e.to_string())),
                    }
                }
            }),
        )
        .with_permission(WRITE_PERMISSION);

        vec![list, summary, resolve]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{
        AlertEngineConfig, AlertType, CandidateAlert, ManualClock, MemoryAlertStore, Severity,
    };
    use crate::notifications::AlertNotifier;
    use crate::plugin::traits::RouteRequest;

    fn engine() -> Arc<AlertEngine> {
        Arc::new(AlertEngine::new(
            AlertEngineConfig::default(),
            Arc::new(ManualClock::default()),
            Arc::new(MemoryAlertStore::new()),
            Arc::new(AlertNotifier::new()),
        ))
    }

    fn route<'a>(routes: &'a [RouteDescriptor], path: &str) -> &'a RouteDescriptor {
        routes.iter().find(|r| r.path == path).unwrap()
    }

    #[tokio::test]
    async fn test_lists_and_resolves_alerts() {
        let engine = engine();
        let alert = engine
            .accept(CandidateAlert::new(AlertType::Custom, Severity::Warning, "t", "m").for_plugin("billing", None))
            .await
            .unwrap();

        let plugin = AlertFeedPlugin::new(&PluginDescriptor::new(PLUGIN_ID, "1.0.0"), Arc::clone(&engine));
        let routes = plugin.routes();
        assert_eq!(routes.len(), 3);
        assert!(route(&routes, "/resolve").permissions.contains(WRITE_PERMISSION));

        let listed = (route(&routes, "/alerts").handler)(RouteRequest::new(HttpMethod::Get, "/alerts"))
            .await
            .unwrap();
        assert_eq!(listed.body["count"], 1);
        assert_eq!(listed.body["alerts"][0]["id"], alert.id.as_str());

        let resolved = (route(&routes, "/resolve").handler)(
            RouteRequest::new(HttpMethod::Post, "/resolve").with_body(serde_json::json!({ "id": alert.id })),
        )
        .await
        .unwrap();
        assert_eq!(resolved.body["alert"]["resolved"], true);

        let missing = (route(&routes, "/resolve").handler)(
            RouteRequest::new(HttpMethod::Post, "/resolve").with_body(serde_json::json!({ "id": "ghost" })),
        )
        .await
        .unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_validation_errors() {
        let plugin = AlertFeedPlugin::new(&PluginDescriptor::new(PLUGIN_ID, "1.0.0"), engine());
        let routes = plugin.routes();

        let mut request = RouteRequest::new(HttpMethod::Get, "/alerts");
        request.query.insert("limit".to_string(), "many".to_string());
        let result = (route(&routes, "/alerts").handler)(request).await;
        assert!(matches!(result, Err(PluginError::ValidationError { .. })));

        let result = (route(&routes, "/resolve").handler)(RouteRequest::new(HttpMethod::Post, "/resolve")).await;
        assert!(matches!(result, Err(PluginError::ValidationError { .. })));
    }
}
