//! Health plugin: `GET /plugins/health/health`

use std::time::Instant;
use crate::plugin::traits::{
    route_handler, HttpMethod, Plugin, PluginDescriptor, RouteDescriptor, RouteResponse,
};

pub const PLUGIN_ID: &str = "health";

pub struct HealthPlugin {
    version: String,
    started: Instant,
}

impl HealthPlugin {
    pub fn new(descriptor: &PluginDescriptor) -> Self {
        Self {
            version: descriptor.version.clone(),
            started: Instant::now(),
        }
    }
}

impl Plugin for HealthPlugin {
    fn plugin_id(&self) -> &str {
        PLUGIN_ID
    }

    fn routes(&self) -> Vec<RouteDescriptor> {
        let version = self.version.clone();
        let started = self.started;
        vec![RouteDescriptor::new(
            "/health",
            &[HttpMethod::Get],
            route_handler(move |_request| {
                let version = version.clone();
                async move {
                    Ok(RouteResponse::ok(serde_json::json!({
                        "status": "ok",
                        "version": version,
                        "uptime_seconds": started.elapsed().as_secs(),
                    })))
                }
            }),
        )]
    }
}
