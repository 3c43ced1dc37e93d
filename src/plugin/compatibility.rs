//! Version Compatibility Checker
//!
//! Validates manifests against the host plugin API version and checks the
//! dependency graph for cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use crate::plugin::traits::PluginDescriptor;
use crate::plugin::error::{PluginError, PluginResult};

include!(concat!(env!("OUT_DIR"), "/version_api.rs"));

/// Get the host plugin API version (YYYYMMDD, from Cargo.toml metadata)
pub fn get_api_version() -> u32 {
    BASE_API_VERSION
}

/// Checker for manifest validity, API compatibility and dependency graphs
pub struct VersionCompatibilityChecker {
    /// Current API version
    api_version: u32,
}

impl VersionCompatibilityChecker {
    /// Create a new version compatibility checker
    pub fn new(api_version: u32) -> Self {
        Self { api_version }
    }

    /// Check if a plugin API version is compatible
    pub fn is_api_compatible(&self, plugin_api_version: u32) -> bool {
        // Same major version (year) is compatible
        self.get_major_version(self.api_version) == self.get_major_version(plugin_api_version)
    }

    /// Get major version (year) from API version
    pub fn get_major_version(&self, api_version: u32) -> u32 {
        api_version / 10000
    }

    /// Validate a single descriptor in isolation
    pub fn validate_descriptor(&self, descriptor: &PluginDescriptor) -> PluginResult<()> {
        if !is_valid_plugin_id(&descriptor.id) {
            return Err(PluginError::validation(format!(
                "Invalid plugin id '{}': expected lowercase letters, digits, '-' or '_'",
                descriptor.id
            )));
        }

        if descriptor.name.trim().is_empty() {
            return Err(PluginError::validation(format!(
                "Plugin '{}' has an empty name", descriptor.id
            )));
        }

        if !is_valid_version(&descriptor.version) {
            return Err(PluginError::validation(format!(
                "Plugin '{}' has invalid version format: {}", descriptor.id, descriptor.version
            )));
        }

        if descriptor.dependencies.contains(&descriptor.id) {
            return Err(PluginError::dependency_error(format!(
                "Plugin '{}' depends on itself", descriptor.id
            )));
        }

        if let Some(api_version) = descriptor.api_version {
            if !self.is_api_compatible(api_version) {
                return Err(PluginError::version_incompatible(format!(
                    "Plugin '{}' requires API version {} but current version is {}",
                    descriptor.id, api_version, self.api_version
                )));
            }
        }

        Ok(())
    }

    /// Ids of every plugin that sits on a dependency cycle.
    ///
    /// Dependencies on unknown ids are ignored here; they surface at load time.
    pub fn find_cycles(&self, descriptors: &HashMap<String, PluginDescriptor>) -> BTreeSet<String> {
        let graph: BTreeMap<&str, Vec<&str>> = descriptors
            .values()
            .map(|d| {
                let edges = d.dependencies
                    .iter()
                    .filter(|dep| descriptors.contains_key(dep.as_str()))
                    .map(|dep| dep.as_str())
                    .collect();
                (d.id.as_str(), edges)
            })
            .collect();

        let mut tarjan = Tarjan::default();
        for &node in graph.keys() {
            if !tarjan.index.contains_key(node) {
                tarjan.strong_connect(node, &graph);
            }
        }

        let mut cyclic = BTreeSet::new();
        for component in tarjan.components {
            let self_loop = component.len() == 1
                && graph.get(component[0]).map(|e| e.contains(&component[0])).unwrap_or(false);
            if component.len() > 1 || self_loop {
                cyclic.extend(component.into_iter().map(str::to_string));
            }
        }
        cyclic
    }

    /// Dependency-first ordering of the given ids.
    ///
    /// Assumes the graph is acyclic (cycles are rejected at scan). Ids are
    /// visited in sorted order so the result is deterministic.
    pub fn load_order(&self, descriptors: &HashMap<String, PluginDescriptor>, ids: &BTreeSet<String>) -> Vec<String> {
        fn visit(
            id: &str,
            descriptors: &HashMap<String, PluginDescriptor>,
            wanted: &BTreeSet<String>,
            seen: &mut BTreeSet<String>,
            order: &mut Vec<String>,
        ) {
            if !seen.insert(id.to_string()) {
                return;
            }
            if let Some(descriptor) = descriptors.get(id) {
                for dep in &descriptor.dependencies {
                    visit(dep, descriptors, wanted, seen, order);
                }
            }
            if wanted.contains(id) {
                order.push(id.to_string());
            }
        }

        let mut seen = BTreeSet::new();
        let mut order = Vec::with_capacity(ids.len());
        for id in ids {
            visit(id, descriptors, ids, &mut seen, &mut order);
        }
        order
    }
}

impl Default for VersionCompatibilityChecker {
    fn default() -> Self {
        Self::new(get_api_version())
    }
}

#[derive(Default)]
struct Tarjan<'a> {
    next_index: usize,
    index: HashMap<&'a str, usize>,
    lowlink: HashMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    components: Vec<Vec<&'a str>>,
}

impl<'a> Tarjan<'a> {
    fn strong_connect(&mut self, node: &'a str, graph: &BTreeMap<&'a str, Vec<&'a str>>) {
        self.index.insert(node, self.next_index);
        self.lowlink.insert(node, self.next_index);
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        for &next in graph.get(node).map(|e| e.as_slice()).unwrap_or(&[]) {
            if !self.index.contains_key(next) {
                self.strong_connect(next, graph);
                let low = self.lowlink[node].min(self.lowlink[next]);
                self.lowlink.insert(node, low);
            } else if self.on_stack.contains(next) {
                let low = self.lowlink[node].min(self.index[next]);
                self.lowlink.insert(node, low);
            }
        }

        if self.lowlink[node] == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

/// Plugin ids double as URL namespaces, so keep them path-safe
fn is_valid_plugin_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Basic version validation (simplified semver)
fn is_valid_version(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return false;
    }
    parts.iter().all(|part| part.parse::<u32>().is_ok())
}
