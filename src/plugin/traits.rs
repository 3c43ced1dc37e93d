//! Core Plugin Traits
//!
//! Defines the plugin contract, the manifest/descriptor data model and the
//! typed route descriptors plugins expose to the dynamic router.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Serialize, Deserialize};
use super::error::{PluginError, PluginResult};

/// Core plugin interface that every loaded plugin implements
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Id of the plugin this instance was loaded for
    fn plugin_id(&self) -> &str;

    /// Routes this plugin wants mounted while it is loaded.
    ///
    /// Paths are relative to the plugin's namespace; the router prefixes them.
    fn routes(&self) -> Vec<RouteDescriptor> {
        Vec::new()
    }

    /// Release plugin resources before the instance is dropped
    async fn cleanup(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

/// Resolves a descriptor into a live plugin instance
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Construct and initialise the plugin described by `descriptor`
    async fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Box<dyn Plugin>>;

    /// Whether this loader has an entry point for `plugin_id`
    fn has_entry_point(&self, plugin_id: &str) -> bool;
}

/// Runtime lifecycle status of a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Discovered,
    Loading,
    Loaded,
    Unloading,
    Failed,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginStatus::Discovered => "discovered",
            PluginStatus::Loading => "loading",
            PluginStatus::Loaded => "loaded",
            PluginStatus::Unloading => "unloading",
            PluginStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// On-disk plugin manifest (`plugin.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Host plugin API version this plugin was written against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<u32>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Registry view of a plugin, built from its manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub category: String,
    pub dependencies: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    pub enabled: bool,
    pub config: serde_json::Map<String, serde_json::Value>,
    pub api_version: Option<u32>,
}

impl PluginDescriptor {
    /// Build a descriptor for plugin `id` from its manifest
    pub fn from_manifest(id: impl Into<String>, manifest: PluginManifest) -> Self {
        Self {
            id: id.into(),
            name: manifest.name,
            version: manifest.version,
            description: manifest.description,
            author: manifest.author,
            category: manifest.category,
            dependencies: manifest.dependencies.into_iter().collect(),
            permissions: manifest.permissions.into_iter().collect(),
            enabled: manifest.enabled,
            config: manifest.config,
            api_version: manifest.api_version,
        }
    }

    /// Minimal descriptor, mostly useful for tests and builtin registration
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            version: version.to_string(),
            description: String::new(),
            author: String::new(),
            category: default_category(),
            dependencies: BTreeSet::new(),
            permissions: BTreeSet::new(),
            enabled: false,
            config: serde_json::Map::new(),
            api_version: None,
        }
    }

    pub fn with_dependency(mut self, dependency: &str) -> Self {
        self.dependencies.insert(dependency.to_string());
        self
    }

    pub fn with_permission(mut self, permission: &str) -> Self {
        self.permissions.insert(permission.to_string());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Convert back into manifest form for persistence
    pub fn to_manifest(&self) -> PluginManifest {
        PluginManifest {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            category: self.category.clone(),
            dependencies: self.dependencies.iter().cloned().collect(),
            permissions: self.permissions.iter().cloned().collect(),
            enabled: self.enabled,
            config: self.config.clone(),
            api_version: self.api_version,
        }
    }
}

/// HTTP methods a plugin route can bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::str::FromStr for HttpMethod {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(PluginError::validation(format!("Unsupported HTTP method: {}", other))),
        }
    }
}

/// Request handed to a plugin route handler
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: serde_json::Value,
    /// Permissions held by the authenticated caller
    pub permissions: BTreeSet<String>,
}

impl RouteRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            body: serde_json::Value::Null,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: &str) -> Self {
        self.permissions.insert(permission.to_string());
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }
}

/// Response produced by a route handler or by the router itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl RouteResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "success": false, "error": message }),
        }
    }
}

/// Type-erased async route handler
pub type RouteHandler =
    Arc<dyn Fn(RouteRequest) -> BoxFuture<'static, PluginResult<RouteResponse>> + Send + Sync>;

/// Wrap an async closure as a [`RouteHandler`]
pub fn route_handler<F, Fut>(f: F) -> RouteHandler
where
    F: Fn(RouteRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<RouteResponse>> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Declarative binding of a path + methods to a plugin handler
#[derive(Clone)]
pub struct RouteDescriptor {
    pub path: String,
    pub methods: BTreeSet<HttpMethod>,
    pub handler: RouteHandler,
    pub permissions: BTreeSet<String>,
}

impl RouteDescriptor {
    pub fn new(path: &str, methods: &[HttpMethod], handler: RouteHandler) -> Self {
        Self {
            path: path.to_string(),
            methods: methods.iter().copied().collect(),
            handler,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: &str) -> Self {
        self.permissions.insert(permission.to_string());
        self
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}
