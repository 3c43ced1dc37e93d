//! Plugin Manager
//!
//! Drives plugin lifecycle: load, unload, enable, disable and in-place
//! reload. Plugin code runs outside the runtime-state lock; only the final
//! state commit happens under it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::registry::PluginRegistry;
use crate::plugin::traits::{Plugin, PluginDescriptor, PluginLoader, PluginStatus, RouteDescriptor};

/// Runtime state for one plugin; the instance is exclusively owned here
struct RuntimeEntry {
    status: PluginStatus,
    instance: Option<Box<dyn Plugin>>,
    last_error: Option<String>,
    loaded_at: Option<DateTime<Utc>>,
    /// Set while a replacement instance is being built; status stays Loaded
    reloading: bool,
}

impl RuntimeEntry {
    fn discovered() -> Self {
        Self {
            status: PluginStatus::Discovered,
            instance: None,
            last_error: None,
            loaded_at: None,
            reloading: false,
        }
    }
}

/// Descriptor plus runtime status, as reported to administrators
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    #[serde(flatten)]
    pub descriptor: PluginDescriptor,
    pub status: PluginStatus,
    pub last_error: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Central plugin manager
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    loader: Arc<dyn PluginLoader>,
    runtime: RwLock<HashMap<String, RuntimeEntry>>,
}

impl PluginManager {
    /// Create a new plugin manager
    pub fn new(registry: Arc<PluginRegistry>, loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            registry,
            loader,
            runtime: RwLock::new(HashMap::new()),
        }
    }

    /// Get shared access to the plugin registry
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Load a plugin.
    ///
    /// Succeeds without doing anything if it is already loaded. Every declared
    /// dependency must already be loaded. Errors raised (or panics) by plugin
    /// initialisation are returned as [`PluginError::LoadError`] and leave the
    /// plugin in [`PluginStatus::Failed`].
    pub async fn load(&self, plugin_id: &str) -> PluginResult<()> {
        let descriptor = self.registry.get(plugin_id)?;

        let previous = {
            let mut runtime = self.runtime.write().await;
            let status = runtime.get(plugin_id).map(|e| e.status).unwrap_or(PluginStatus::Discovered);
            match status {
                PluginStatus::Loaded => {
                    log::debug!("Plugin '{}' already loaded", plugin_id);
                    return Ok(());
                }
                PluginStatus::Loading | PluginStatus::Unloading => {
                    return Err(PluginError::invalid_state(format!(
                        "Plugin '{}' is {}", plugin_id, status
                    )));
                }
                PluginStatus::Discovered | PluginStatus::Failed => {}
            }

            Self::check_dependencies_loaded(&runtime, &descriptor)?;

            let entry = runtime.entry(plugin_id.to_string()).or_insert_with(RuntimeEntry::discovered);
            entry.status = PluginStatus::Loading;
            log::info!("Plugin '{}': {} -> loading", plugin_id, status);
            status
        };

        let result = self.instantiate(&descriptor).await;

        let (outcome, orphan) = {
            let mut runtime = self.runtime.write().await;
            let still_loading = runtime.get(plugin_id).map(|e| e.status) == Some(PluginStatus::Loading);
            let dependencies = Self::check_dependencies_loaded(&runtime, &descriptor);
            let entry = runtime.entry(plugin_id.to_string()).or_insert_with(RuntimeEntry::discovered);

            match result {
                Ok(instance) if !still_loading => {
                    log::warn!("Plugin '{}' left loading state during initialisation ({})", plugin_id, entry.status);
                    let error = PluginError::invalid_state(format!(
                        "Plugin '{}' is {}", plugin_id, entry.status
                    ));
                    (Err(error), Some(instance))
                }
                Ok(instance) => match dependencies {
                    Ok(()) => {
                        entry.status = PluginStatus::Loaded;
                        entry.instance = Some(instance);
                        entry.last_error = None;
                        entry.loaded_at = Some(Utc::now());
                        log::info!("Plugin '{}': loading -> loaded (v{})", plugin_id, descriptor.version);
                        (Ok(()), None)
                    }
                    Err(e) => {
                        entry.status = previous;
                        log::error!("Plugin '{}': loading -> {}: {}", plugin_id, previous, e);
                        (Err(e), Some(instance))
                    }
                },
                Err(e) => {
                    entry.status = PluginStatus::Failed;
                    entry.instance = None;
                    entry.last_error = Some(e.to_string());
                    log::error!("Plugin '{}': loading -> failed: {}", plugin_id, e);
                    (Err(e), None)
                }
            }
        };

        if let Some(instance) = orphan {
            Self::run_cleanup(plugin_id, instance).await;
        }
        outcome
    }

    /// Unload a plugin.
    ///
    /// Succeeds without doing anything if it is not loaded. Refuses while it
    /// is mid-transition (loading, unloading or reloading) and while another
    /// loaded or loading plugin depends on it. Cleanup failures are logged
    /// and swallowed.
    pub async fn unload(&self, plugin_id: &str) -> PluginResult<()> {
        let instance = {
            let mut runtime = self.runtime.write().await;
            let (status, reloading) = runtime
                .get(plugin_id)
                .map(|e| (e.status, e.reloading))
                .unwrap_or((PluginStatus::Discovered, false));
            match status {
                PluginStatus::Discovered | PluginStatus::Failed => {
                    log::debug!("Plugin '{}' not loaded ({}), nothing to unload", plugin_id, status);
                    return Ok(());
                }
                PluginStatus::Loading | PluginStatus::Unloading => {
                    return Err(PluginError::invalid_state(format!(
                        "Plugin '{}' is {}", plugin_id, status
                    )));
                }
                PluginStatus::Loaded if reloading => {
                    return Err(PluginError::invalid_state(format!(
                        "Plugin '{}' is reloading", plugin_id
                    )));
                }
                PluginStatus::Loaded => {}
            }

            let dependents = self.loaded_dependents(&runtime, plugin_id);
            if !dependents.is_empty() {
                return Err(PluginError::dependency_error(format!(
                    "Plugin '{}' is required by loaded plugin(s): {}",
                    plugin_id,
                    dependents.join(", ")
                )));
            }

            let entry = runtime.get_mut(plugin_id)
                .ok_or_else(|| PluginError::not_found(plugin_id))?;
            entry.status = PluginStatus::Unloading;
            log::info!("Plugin '{}': loaded -> unloading", plugin_id);
            entry.instance.take()
        };

        if let Some(instance) = instance {
            Self::run_cleanup(plugin_id, instance).await;
        }

        let mut runtime = self.runtime.write().await;
        let entry = runtime.entry(plugin_id.to_string()).or_insert_with(RuntimeEntry::discovered);
        entry.status = PluginStatus::Discovered;
        entry.loaded_at = None;
        log::info!("Plugin '{}': unloading -> discovered", plugin_id);
        Ok(())
    }

    /// Persist the enabled flag, then load
    pub async fn enable(&self, plugin_id: &str) -> PluginResult<()> {
        self.registry.set_enabled(plugin_id, true).await?;
        self.load(plugin_id).await
    }

    /// Unload, then persist the disabled flag
    pub async fn disable(&self, plugin_id: &str) -> PluginResult<()> {
        self.registry.get(plugin_id)?;
        self.unload(plugin_id).await?;
        self.registry.set_enabled(plugin_id, false).await?;
        Ok(())
    }

    /// Replace a loaded plugin's instance with a freshly loaded one.
    ///
    /// The new instance is built first; the plugin stays loaded with its old
    /// instance (and keeps serving) if that fails. Unload is refused while the
    /// replacement is being built. Not-loaded plugins are simply loaded.
    pub async fn reload(&self, plugin_id: &str) -> PluginResult<()> {
        let descriptor = self.registry.get(plugin_id)?;
        {
            let mut runtime = self.runtime.write().await;
            let state = runtime.get(plugin_id).map(|e| (e.status, e.reloading));
            match state {
                Some((PluginStatus::Loaded, true)) => {
                    return Err(PluginError::invalid_state(format!(
                        "Plugin '{}' is already reloading", plugin_id
                    )));
                }
                Some((PluginStatus::Loaded, false)) => {}
                _ => {
                    drop(runtime);
                    return self.load(plugin_id).await;
                }
            }
            Self::check_dependencies_loaded(&runtime, &descriptor)?;
            if let Some(entry) = runtime.get_mut(plugin_id) {
                entry.reloading = true;
            }
        }

        let result = self.instantiate(&descriptor).await;

        let (outcome, retired) = {
            let mut runtime = self.runtime.write().await;
            let dependencies = Self::check_dependencies_loaded(&runtime, &descriptor);
            let entry = runtime.entry(plugin_id.to_string()).or_insert_with(RuntimeEntry::discovered);
            let still_reloading = entry.reloading && entry.status == PluginStatus::Loaded;
            entry.reloading = false;

            match result {
                Ok(fresh) if !still_reloading => {
                    let error = PluginError::invalid_state(format!(
                        "Plugin '{}' is {}", plugin_id, entry.status
                    ));
                    (Err(error), Some(fresh))
                }
                Ok(fresh) => match dependencies {
                    Ok(()) => {
                        let previous = entry.instance.replace(fresh);
                        entry.last_error = None;
                        entry.loaded_at = Some(Utc::now());
                        log::info!("Plugin '{}': reloaded (v{})", plugin_id, descriptor.version);
                        (Ok(()), previous)
                    }
                    Err(e) => {
                        log::error!("Plugin '{}': reload aborted, keeping running instance: {}", plugin_id, e);
                        (Err(e), Some(fresh))
                    }
                },
                Err(e) => {
                    log::error!("Plugin '{}': reload failed, keeping running instance: {}", plugin_id, e);
                    (Err(e), None)
                }
            }
        };

        if let Some(instance) = retired {
            Self::run_cleanup(plugin_id, instance).await;
        }
        outcome
    }

    /// Load every enabled plugin in dependency order, collecting per-plugin results
    pub async fn load_all_enabled(&self) -> BTreeMap<String, PluginResult<()>> {
        let order = self.registry.load_order(&self.registry.enabled_ids());
        let mut results = BTreeMap::new();
        for plugin_id in order {
            let result = self.load(&plugin_id).await;
            results.insert(plugin_id, result);
        }
        results
    }

    /// Unload every loaded plugin, dependents first
    pub async fn unload_all(&self) -> BTreeMap<String, PluginResult<()>> {
        let loaded = self.loaded_ids().await;
        let mut order = self.registry.load_order(&loaded);
        order.reverse();

        let mut results = BTreeMap::new();
        for plugin_id in order {
            let result = self.unload(&plugin_id).await;
            results.insert(plugin_id, result);
        }
        results
    }

    /// Current status of a known plugin
    pub async fn status(&self, plugin_id: &str) -> PluginResult<PluginStatus> {
        self.registry.get(plugin_id)?;
        Ok(self.runtime
            .read()
            .await
            .get(plugin_id)
            .map(|e| e.status)
            .unwrap_or(PluginStatus::Discovered))
    }

    pub async fn is_loaded(&self, plugin_id: &str) -> bool {
        self.runtime
            .read()
            .await
            .get(plugin_id)
            .map(|e| e.status == PluginStatus::Loaded)
            .unwrap_or(false)
    }

    /// Ids of loaded plugins
    pub async fn loaded_ids(&self) -> BTreeSet<String> {
        self.runtime
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.status == PluginStatus::Loaded)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every known plugin with its runtime status
    pub async fn list(&self) -> Vec<PluginSummary> {
        let runtime = self.runtime.read().await;
        self.registry
            .list()
            .into_iter()
            .map(|descriptor| {
                let entry = runtime.get(&descriptor.id);
                PluginSummary {
                    status: entry.map(|e| e.status).unwrap_or(PluginStatus::Discovered),
                    last_error: entry.and_then(|e| e.last_error.clone()),
                    loaded_at: entry.and_then(|e| e.loaded_at),
                    descriptor,
                }
            })
            .collect()
    }

    /// Routes declared by a loaded plugin
    pub async fn routes(&self, plugin_id: &str) -> PluginResult<Vec<RouteDescriptor>> {
        let runtime = self.runtime.read().await;
        match runtime.get(plugin_id) {
            Some(RuntimeEntry { status: PluginStatus::Loaded, instance: Some(instance), .. }) => {
                Ok(instance.routes())
            }
            _ => Err(PluginError::invalid_state(format!("Plugin '{}' is not loaded", plugin_id))),
        }
    }

    fn check_dependencies_loaded(
        runtime: &HashMap<String, RuntimeEntry>,
        descriptor: &PluginDescriptor,
    ) -> PluginResult<()> {
        let missing: Vec<&str> = descriptor
            .dependencies
            .iter()
            .filter(|dep| {
                runtime.get(dep.as_str()).map(|e| e.status) != Some(PluginStatus::Loaded)
            })
            .map(|dep| dep.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PluginError::dependency_error(format!(
                "Plugin '{}' requires unloaded dependencies: {}",
                descriptor.id,
                missing.join(", ")
            )))
        }
    }

    fn loaded_dependents(&self, runtime: &HashMap<String, RuntimeEntry>, plugin_id: &str) -> Vec<String> {
        let mut dependents: Vec<String> = runtime
            .iter()
            .filter(|(id, e)| {
                id.as_str() != plugin_id
                    && matches!(e.status, PluginStatus::Loaded | PluginStatus::Loading)
            })
            .filter(|(id, _)| {
                self.registry
                    .get(id)
                    .map(|d| d.dependencies.contains(plugin_id))
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// Run plugin initialisation in its own task so a panic surfaces as an error
    async fn instantiate(&self, descriptor: &PluginDescriptor) -> PluginResult<Box<dyn Plugin>> {
        let loader = Arc::clone(&self.loader);
        let owned = descriptor.clone();
        let handle = tokio::spawn(async move { loader.load(&owned).await });

        match handle.await {
            Ok(Ok(instance)) => Ok(instance),
            Ok(Err(PluginError::LoadError { message, .. })) => {
                Err(PluginError::load_error(&descriptor.id, message))
            }
            Ok(Err(e)) => Err(PluginError::load_error(&descriptor.id, e.to_string())),
            Err(join_error) => Err(PluginError::load_error(
                &descriptor.id,
                format!("initialisation panicked: {}", join_error),
            )),
        }
    }

    async fn run_cleanup(plugin_id: &str, mut instance: Box<dyn Plugin>) {
        let handle = tokio::spawn(async move { instance.cleanup().await });
        match handle.await {
            Ok(Ok(())) => log::debug!("Plugin '{}' cleanup complete", plugin_id),
            Ok(Err(e)) => log::warn!("Plugin '{}' cleanup failed (ignored): {}", plugin_id, e),
            Err(join_error) => log::warn!("Plugin '{}' cleanup panicked (ignored): {}", plugin_id, join_error),
        }
    }
}
