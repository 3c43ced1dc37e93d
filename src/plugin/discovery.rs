//! Plugin Manifest Discovery
//!
//! Manifest stores the registry scans: a directory of `<id>/plugin.json`
//! files for production and an in-memory store for tests and embedding.

use super::error::{PluginError, PluginResult};
use super::traits::PluginManifest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;

/// Manifest file name inside each plugin directory
pub const MANIFEST_FILE: &str = "plugin.json";

/// Outcome of reading one manifest; a malformed manifest does not abort the scan
#[derive(Debug)]
pub struct ManifestEntry {
    pub id: String,
    pub manifest: PluginResult<PluginManifest>,
}

/// Backing store for plugin manifests
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Read every manifest.
    ///
    /// Fails only when the store as a whole is unreachable; per-manifest
    /// problems are reported through [`ManifestEntry::manifest`].
    async fn load_manifests(&self) -> PluginResult<Vec<ManifestEntry>>;

    /// Persist the enabled flag of one manifest, leaving other fields untouched
    async fn save_enabled(&self, plugin_id: &str, enabled: bool) -> PluginResult<()>;

    /// Human readable location for log messages
    fn location(&self) -> String;
}

/// Parse manifest JSON
pub fn parse_manifest(content: &str) -> PluginResult<PluginManifest> {
    serde_json::from_str(content)
        .map_err(|e| PluginError::validation(format!("Failed to parse manifest: {}", e)))
}

/// Set `enabled` on a raw manifest document, preserving unknown fields
fn rewrite_enabled(content: &str, enabled: bool) -> PluginResult<String> {
    let mut document: serde_json::Value = serde_json::from_str(content)?;
    let object = document.as_object_mut()
        .ok_or_else(|| PluginError::validation("Manifest is not a JSON object"))?;
    object.insert("enabled".to_string(), serde_json::Value::Bool(enabled));
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Directory based manifest store: `<root>/<plugin-id>/plugin.json`
#[derive(Debug)]
pub struct FileManifestStore {
    root: PathBuf,
}

impl FileManifestStore {
    /// Create a store over an existing plugin directory
    pub fn new<P: AsRef<Path>>(plugin_directory: P) -> PluginResult<Self> {
        let path = plugin_directory.as_ref().to_path_buf();

        if !path.exists() {
            return Err(PluginError::transient_io(format!(
                "Plugin directory does not exist: {}",
                path.display()
            )));
        }

        if !path.is_dir() {
            return Err(PluginError::validation(format!(
                "Plugin path is not a directory: {}",
                path.display()
            )));
        }

        Ok(Self { root: path })
    }

    /// Root directory being scanned
    pub fn plugin_directory(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self, plugin_id: &str) -> PathBuf {
        self.root.join(plugin_id).join(MANIFEST_FILE)
    }

    async fn read_manifest(path: &Path) -> PluginResult<PluginManifest> {
        let content = fs::read_to_string(path).await
            .map_err(|e| PluginError::transient_io(format!("Failed to read {}: {}", path.display(), e)))?;
        parse_manifest(&content)
    }
}

#[async_trait]
impl ManifestStore for FileManifestStore {
    async fn load_manifests(&self) -> PluginResult<Vec<ManifestEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await
            .map_err(|e| PluginError::transient_io(format!("Failed to read directory {}: {}", self.root.display(), e)))?;

        while let Some(entry) = dir.next_entry().await
            .map_err(|e| PluginError::transient_io(format!("Failed to read directory entry: {}", e)))? {

            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let manifest_path = path.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                log::debug!("Skipping {}: no {}", path.display(), MANIFEST_FILE);
                continue;
            }

            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                log::warn!("Skipping plugin directory with non UTF-8 name: {}", path.display());
                continue;
            };

            let manifest = Self::read_manifest(&manifest_path).await;
            entries.push(ManifestEntry { id, manifest });
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn save_enabled(&self, plugin_id: &str, enabled: bool) -> PluginResult<()> {
        let path = self.manifest_path(plugin_id);
        if !path.is_file() {
            return Err(PluginError::not_found(plugin_id));
        }

        let content = fs::read_to_string(&path).await
            .map_err(|e| PluginError::transient_io(format!("Failed to read {}: {}", path.display(), e)))?;
        let updated = rewrite_enabled(&content, enabled)?;

        // Write beside the target then rename so readers never see a torn file
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, updated).await
            .map_err(|e| PluginError::transient_io(format!("Failed to write {}: {}", staging.display(), e)))?;
        fs::rename(&staging, &path).await
            .map_err(|e| PluginError::transient_io(format!("Failed to replace {}: {}", path.display(), e)))?;

        log::debug!("Persisted enabled={} for plugin '{}'", enabled, plugin_id);
        Ok(())
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

/// In-memory manifest store holding raw manifest documents
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    documents: RwLock<BTreeMap<String, String>>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a manifest
    pub fn insert(&self, plugin_id: &str, manifest: &PluginManifest) -> PluginResult<()> {
        let content = serde_json::to_string(manifest)?;
        self.documents.write().insert(plugin_id.to_string(), content);
        Ok(())
    }

    /// Insert a raw document, which may be malformed
    pub fn insert_raw(&self, plugin_id: &str, content: &str) {
        self.documents.write().insert(plugin_id.to_string(), content.to_string());
    }

    pub fn remove(&self, plugin_id: &str) {
        self.documents.write().remove(plugin_id);
    }

    /// Current parsed manifest, if present and well formed
    pub fn manifest(&self, plugin_id: &str) -> Option<PluginManifest> {
        self.documents.read().get(plugin_id).and_then(|c| parse_manifest(c).ok())
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn load_manifests(&self) -> PluginResult<Vec<ManifestEntry>> {
        Ok(self.documents
            .read()
            .iter()
            .map(|(id, content)| ManifestEntry {
                id: id.clone(),
                manifest: parse_manifest(content),
            })
            .collect())
    }

    async fn save_enabled(&self, plugin_id: &str, enabled: bool) -> PluginResult<()> {
        let mut documents = self.documents.write();
        let content = documents.get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        let updated = rewrite_enabled(content, enabled)?;
        documents.insert(plugin_id.to_string(), updated);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
