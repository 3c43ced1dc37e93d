//! Plugin Registry
//!
//! Owns plugin descriptors and their enabled flags. The registry is the
//! single source of truth for which plugins exist; runtime state lives in
//! the plugin manager.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::Serialize;
use crate::plugin::compatibility::VersionCompatibilityChecker;
use crate::plugin::discovery::ManifestStore;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::traits::PluginDescriptor;

/// Result of a manifest scan
#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    /// Newly discovered plugins
    pub added: Vec<String>,
    /// Known plugins whose manifest changed
    pub updated: Vec<String>,
    /// Known plugins whose manifest is unchanged
    pub unchanged: Vec<String>,
    /// Known plugins whose manifest disappeared; kept, never dropped silently
    pub retained: Vec<String>,
    /// Manifests rejected by validation or cycle detection
    #[serde(serialize_with = "serialize_errors")]
    pub rejected: BTreeMap<String, PluginError>,
}

fn serialize_errors<S: serde::Serializer>(
    errors: &BTreeMap<String, PluginError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(errors.iter().map(|(id, e)| (id, e.to_string())))
}

impl ScanReport {
    pub fn total_known(&self) -> usize {
        self.added.len() + self.updated.len() + self.unchanged.len() + self.retained.len()
    }
}

/// Registry of plugin descriptors backed by a manifest store
pub struct PluginRegistry {
    store: Arc<dyn ManifestStore>,
    checker: VersionCompatibilityChecker,
    descriptors: RwLock<HashMap<String, PluginDescriptor>>,
}

impl PluginRegistry {
    /// Create an empty registry over `store`; call [`scan`](Self::scan) to populate it
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self::with_checker(store, VersionCompatibilityChecker::default())
    }

    pub fn with_checker(store: Arc<dyn ManifestStore>, checker: VersionCompatibilityChecker) -> Self {
        Self {
            store,
            checker,
            descriptors: RwLock::new(HashMap::new()),
        }
    }

    /// Re-read all manifests and merge them into the registry.
    ///
    /// Malformed manifests are logged and skipped. Plugins whose manifests
    /// form a dependency cycle are rejected; if they were known before the
    /// scan, their previous descriptor is kept.
    pub async fn scan(&self) -> PluginResult<ScanReport> {
        let entries = self.store.load_manifests().await?;
        let mut report = ScanReport::default();

        let previous = self.descriptors.read().clone();
        let mut candidate = previous.clone();
        let mut seen = BTreeSet::new();
        let mut changed = BTreeSet::new();

        for entry in entries {
            seen.insert(entry.id.clone());

            let descriptor = match entry.manifest {
                Ok(manifest) => PluginDescriptor::from_manifest(entry.id.clone(), manifest),
                Err(e) => {
                    log::warn!("Skipping malformed manifest '{}' in {}: {}", entry.id, self.store.location(), e);
                    report.rejected.insert(entry.id, e);
                    continue;
                }
            };

            if let Err(e) = self.checker.validate_descriptor(&descriptor) {
                log::warn!("Rejecting plugin manifest '{}': {}", entry.id, e);
                report.rejected.insert(entry.id, e);
                continue;
            }

            if previous.get(&entry.id) != Some(&descriptor) {
                changed.insert(entry.id.clone());
            }
            candidate.insert(entry.id, descriptor);
        }

        // The previous graph was acyclic, so every cycle runs through a changed
        // descriptor; backing those out terminates.
        loop {
            let cycles = self.checker.find_cycles(&candidate);
            let offenders: Vec<String> = cycles.into_iter().filter(|id| changed.contains(id)).collect();
            if offenders.is_empty() {
                break;
            }

            for id in offenders {
                log::warn!("Rejecting plugin '{}': dependency cycle detected", id);
                changed.remove(&id);
                match previous.get(&id) {
                    Some(old) => {
                        candidate.insert(id.clone(), old.clone());
                    }
                    None => {
                        candidate.remove(&id);
                    }
                }
                report.rejected.insert(
                    id.clone(),
                    PluginError::dependency_error(format!("Plugin '{}' is part of a dependency cycle", id)),
                );
            }
        }

        for id in candidate.keys() {
            if changed.contains(id) {
                if previous.contains_key(id) {
                    report.updated.push(id.clone());
                } else {
                    report.added.push(id.clone());
                }
            } else if seen.contains(id) || report.rejected.contains_key(id) {
                report.unchanged.push(id.clone());
            } else {
                if candidate[id].enabled {
                    log::warn!("Manifest for enabled plugin '{}' disappeared; keeping descriptor", id);
                } else {
                    log::debug!("Manifest for plugin '{}' disappeared; keeping descriptor", id);
                }
                report.retained.push(id.clone());
            }
        }
        report.added.sort();
        report.updated.sort();
        report.unchanged.sort();
        report.retained.sort();

        *self.descriptors.write() = candidate;

        log::info!(
            "Plugin scan of {}: {} added, {} updated, {} unchanged, {} retained, {} rejected",
            self.store.location(),
            report.added.len(),
            report.updated.len(),
            report.unchanged.len(),
            report.retained.len(),
            report.rejected.len()
        );

        Ok(report)
    }

    /// Get a descriptor by id
    pub fn get(&self, plugin_id: &str) -> PluginResult<PluginDescriptor> {
        self.descriptors
            .read()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| PluginError::not_found(plugin_id))
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.descriptors.read().contains_key(plugin_id)
    }

    /// All descriptors, sorted by id
    pub fn list(&self) -> Vec<PluginDescriptor> {
        let mut all: Vec<PluginDescriptor> = self.descriptors.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Ids of enabled plugins
    pub fn enabled_ids(&self) -> BTreeSet<String> {
        self.descriptors
            .read()
            .values()
            .filter(|d| d.enabled)
            .map(|d| d.id.clone())
            .collect()
    }

    /// Persist a plugin's enabled flag, then update the in-memory descriptor
    pub async fn set_enabled(&self, plugin_id: &str, enabled: bool) -> PluginResult<PluginDescriptor> {
        if !self.contains(plugin_id) {
            return Err(PluginError::not_found(plugin_id));
        }

        self.store.save_enabled(plugin_id, enabled).await?;

        let mut descriptors = self.descriptors.write();
        let descriptor = descriptors
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        descriptor.enabled = enabled;
        log::info!("Plugin '{}' {}", plugin_id, if enabled { "enabled" } else { "disabled" });
        Ok(descriptor.clone())
    }

    /// Dependency-first ordering of `ids`
    pub fn load_order(&self, ids: &BTreeSet<String>) -> Vec<String> {
        let descriptors = self.descriptors.read();
        self.checker.load_order(&descriptors, ids)
    }

    /// Get the count of known plugins
    pub fn plugin_count(&self) -> usize {
        self.descriptors.read().len()
    }
}
