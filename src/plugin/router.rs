//! Dynamic Router
//!
//! Mounts the routes of loaded plugins under `/plugins/<plugin-id>` and
//! dispatches requests to them. Every handler runs behind a permission
//! check and a panic/error boundary that never leaks plugin internals.
//!
//! Route sets are stored per plugin and replaced as a whole, so a plugin's
//! routes swap atomically and no operation ever leaves other plugins
//! without routes.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::manager::PluginManager;
use crate::plugin::registry::ScanReport;
use crate::plugin::traits::{HttpMethod, RouteDescriptor, RouteRequest, RouteResponse};

/// Prefix under which every plugin namespace is mounted
pub const PLUGIN_ROUTE_PREFIX: &str = "/plugins";

#[derive(Clone)]
struct MountedRoute {
    full_path: String,
    descriptor: RouteDescriptor,
}

/// Snapshot of a mounted route
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MountedRouteInfo {
    pub plugin_id: String,
    pub path: String,
    pub methods: BTreeSet<HttpMethod>,
    pub permissions: BTreeSet<String>,
}

/// Outcome of [`DynamicRouter::reload_all`]
#[derive(Debug, Default, Serialize)]
pub struct ReloadReport {
    pub scan: ScanReport,
    /// Plugins that were loaded before and were reloaded in place
    pub reloaded: Vec<String>,
    /// Plugins newly loaded
    pub loaded: Vec<String>,
    /// Plugins unloaded because they are no longer enabled
    pub unloaded: Vec<String>,
    /// Per-plugin failures
    pub failed: BTreeMap<String, String>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Router over the routes of loaded plugins
pub struct DynamicRouter {
    manager: Arc<PluginManager>,
    routes: RwLock<BTreeMap<String, Arc<Vec<MountedRoute>>>>,
}

/// Full mounted path of a plugin route
pub fn mounted_path(plugin_id: &str, route_path: &str) -> String {
    let trimmed = route_path.trim_matches('/');
    if trimmed.is_empty() {
        format!("{}/{}", PLUGIN_ROUTE_PREFIX, plugin_id)
    } else {
        format!("{}/{}/{}", PLUGIN_ROUTE_PREFIX, plugin_id, trimmed)
    }
}

fn normalize_request_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }
}

/// Plugin namespace a request path falls into
fn namespace_of(path: &str) -> Option<&str> {
    path.strip_prefix(PLUGIN_ROUTE_PREFIX)?
        .strip_prefix('/')?
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
}

impl DynamicRouter {
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self {
            manager,
            routes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// Mount the routes of a loaded plugin, replacing any previous set.
    ///
    /// Returns the number of routes mounted. If the plugin stops being loaded
    /// while the set is staged, the set is withdrawn again.
    pub async fn register_plugin_routes(&self, plugin_id: &str) -> PluginResult<usize> {
        let declared = self.manager.routes(plugin_id).await?;

        let mut staged: Vec<MountedRoute> = Vec::with_capacity(declared.len());
        let mut bound: BTreeSet<(String, HttpMethod)> = BTreeSet::new();
        for descriptor in declared {
            if !descriptor.path.is_empty() && !descriptor.path.starts_with('/') {
                return Err(PluginError::validation(format!(
                    "Plugin '{}' route path must start with '/': {}", plugin_id, descriptor.path
                )));
            }
            if descriptor.methods.is_empty() {
                return Err(PluginError::validation(format!(
                    "Plugin '{}' route {} declares no methods", plugin_id, descriptor.path
                )));
            }

            let full_path = mounted_path(plugin_id, &descriptor.path);
            for method in &descriptor.methods {
                if !bound.insert((full_path.clone(), *method)) {
                    return Err(PluginError::validation(format!(
                        "Plugin '{}' binds {:?} {} twice", plugin_id, method, full_path
                    )));
                }
            }
            staged.push(MountedRoute { full_path, descriptor });
        }

        let count = staged.len();
        let staged = Arc::new(staged);
        self.routes.write().insert(plugin_id.to_string(), Arc::clone(&staged));

        if !self.manager.is_loaded(plugin_id).await {
            let mut routes = self.routes.write();
            if routes.get(plugin_id).is_some_and(|set| Arc::ptr_eq(set, &staged)) {
                routes.remove(plugin_id);
            }
            log::warn!("Plugin '{}' unloaded while mounting, routes withdrawn", plugin_id);
            return Err(PluginError::invalid_state(format!("Plugin '{}' is not loaded", plugin_id)));
        }

        log::info!("Mounted {} route(s) for plugin '{}'", count, plugin_id);
        Ok(count)
    }

    /// Remove every route of a plugin. Idempotent; returns the number removed.
    pub fn unregister_plugin_routes(&self, plugin_id: &str) -> usize {
        match self.routes.write().remove(plugin_id) {
            Some(set) => {
                log::info!("Unmounted {} route(s) for plugin '{}'", set.len(), plugin_id);
                set.len()
            }
            None => 0,
        }
    }

    /// Load a plugin and mount its routes
    pub async fn load_plugin(&self, plugin_id: &str) -> PluginResult<usize> {
        self.manager.load(plugin_id).await?;
        self.mount_or_roll_back(plugin_id).await
    }

    /// Unmount a plugin's routes and unload it
    pub async fn unload_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let previous = self.routes.write().remove(plugin_id);
        if let Err(e) = self.manager.unload(plugin_id).await {
            if let Some(previous) = previous {
                self.routes.write().insert(plugin_id.to_string(), previous);
            }
            return Err(e);
        }
        self.routes.write().remove(plugin_id);
        Ok(())
    }

    /// Enable (persist + load) a plugin and mount its routes
    pub async fn enable_plugin(&self, plugin_id: &str) -> PluginResult<usize> {
        self.manager.enable(plugin_id).await?;
        self.mount_or_roll_back(plugin_id).await
    }

    /// Unmount, unload and persist the disabled flag
    pub async fn disable_plugin(&self, plugin_id: &str) -> PluginResult<()> {
        let previous = self.routes.write().remove(plugin_id);
        if let Err(e) = self.manager.disable(plugin_id).await {
            if self.manager.is_loaded(plugin_id).await {
                if let Some(previous) = previous {
                    self.routes.write().insert(plugin_id.to_string(), previous);
                }
            }
            return Err(e);
        }
        self.routes.write().remove(plugin_id);
        Ok(())
    }

    /// Rescan manifests and bring the loaded set in line with the enabled set.
    ///
    /// Plugins no longer enabled are unmounted and unloaded. Enabled plugins
    /// are reloaded in place (or loaded) in dependency order and their route
    /// sets swapped one plugin at a time. Failures are collected per plugin.
    pub async fn reload_all(&self) -> PluginResult<ReloadReport> {
        let mut report = ReloadReport {
            scan: self.manager.registry().scan().await?,
            ..ReloadReport::default()
        };

        let registry = Arc::clone(self.manager.registry());
        let enabled = registry.enabled_ids();
        let loaded = self.manager.loaded_ids().await;

        let stale: BTreeSet<String> = loaded.difference(&enabled).cloned().collect();
        let mut unload_order = registry.load_order(&stale);
        unload_order.reverse();
        for plugin_id in unload_order {
            match self.unload_plugin(&plugin_id).await {
                Ok(()) => report.unloaded.push(plugin_id),
                Err(e) => {
                    log::warn!("reload: failed to unload '{}': {}", plugin_id, e);
                    report.failed.insert(plugin_id, e.to_string());
                }
            }
        }

        for plugin_id in registry.load_order(&enabled) {
            let was_loaded = loaded.contains(&plugin_id);
            let outcome = if was_loaded {
                self.manager.reload(&plugin_id).await
            } else {
                self.manager.load(&plugin_id).await
            };

            let outcome = match outcome {
                Ok(()) => self.mount_or_roll_back(&plugin_id).await.map(|_| ()),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) if was_loaded => report.reloaded.push(plugin_id),
                Ok(()) => report.loaded.push(plugin_id),
                Err(e) => {
                    log::warn!("reload: plugin '{}' failed: {}", plugin_id, e);
                    report.failed.insert(plugin_id, e.to_string());
                }
            }
        }

        log::info!(
            "Reload complete: {} reloaded, {} loaded, {} unloaded, {} failed",
            report.reloaded.len(),
            report.loaded.len(),
            report.unloaded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Dispatch a request to the matching plugin route.
    ///
    /// Never fails: routing problems, permission failures and handler errors
    /// all become responses.
    pub async fn dispatch(&self, request: RouteRequest) -> RouteResponse {
        let path = normalize_request_path(&request.path);

        let Some(plugin_id) = namespace_of(&path).map(str::to_string) else {
            return RouteResponse::error(404, "Not found");
        };

        let route_set = self.routes.read().get(&plugin_id).cloned();
        let Some(route_set) = route_set else {
            return RouteResponse::error(404, "Not found");
        };

        let matching: Vec<&MountedRoute> = route_set.iter().filter(|r| r.full_path == path).collect();
        if matching.is_empty() {
            return RouteResponse::error(404, "Not found");
        }
        let Some(route) = matching.into_iter().find(|r| r.descriptor.methods.contains(&request.method)) else {
            return RouteResponse::error(405, "Method not allowed");
        };

        if !self.manager.is_loaded(&plugin_id).await {
            return RouteResponse::error(404, "Not found");
        }

        if let Some(missing) = route.descriptor.permissions.iter().find(|p| !request.permissions.contains(*p)) {
            log::debug!("Denied {:?} {}: missing permission '{}'", request.method, path, missing);
            return RouteResponse::error(403, "Forbidden");
        }

        let handler = Arc::clone(&route.descriptor.handler);
        let method = request.method;
        match AssertUnwindSafe(handler(request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(PluginError::ValidationError { message })) => {
                log::debug!("Plugin '{}' rejected {:?} {}: {}", plugin_id, method, path, message);
                RouteResponse::error(400, "Invalid request")
            }
            Ok(Err(e)) => {
                log::error!("Plugin '{}' handler for {:?} {} failed: {}", plugin_id, method, path, e);
                RouteResponse::error(500, "Internal plugin error")
            }
            Err(_) => {
                log::error!("Plugin '{}' handler for {:?} {} panicked", plugin_id, method, path);
                RouteResponse::error(500, "Internal plugin error")
            }
        }
    }

    /// Every mounted route, sorted by plugin then path
    pub fn mounted_routes(&self) -> Vec<MountedRouteInfo> {
        let routes = self.routes.read();
        let mut all: Vec<MountedRouteInfo> = routes
            .iter()
            .flat_map(|(plugin_id, set)| {
                set.iter().map(move |r| MountedRouteInfo {
                    plugin_id: plugin_id.clone(),
                    path: r.full_path.clone(),
                    methods: r.descriptor.methods.clone(),
                    permissions: r.descriptor.permissions.clone(),
                })
            })
            .collect();
        all.sort();
        all
    }

    /// Plugin ids that currently have a mounted namespace
    pub fn namespaces(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    async fn mount_or_roll_back(&self, plugin_id: &str) -> PluginResult<usize> {
        match self.register_plugin_routes(plugin_id).await {
            Ok(count) => Ok(count),
            Err(e) => {
                log::error!("Failed to mount routes for '{}', unloading: {}", plugin_id, e);
                self.routes.write().remove(plugin_id);
                if let Err(unload_error) = self.manager.unload(plugin_id).await {
                    log::warn!("Rollback unload of '{}' failed: {}", plugin_id, unload_error);
                }
                Err(e)
            }
        }
    }
}
