//! Plugin Runtime Module
//!
//! Discovers plugin manifests, loads plugins in dependency order and mounts
//! their routes under a per-plugin namespace.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use plugmon::plugin::{BuiltinLoader, DynamicRouter, FileManifestStore, PluginManager, PluginRegistry};
//!
//! # async fn example() -> plugmon::plugin::PluginResult<()> {
//! let store = Arc::new(FileManifestStore::new("./plugins")?);
//! let registry = Arc::new(PluginRegistry::new(store));
//! registry.scan().await?;
//!
//! let loader = Arc::new(BuiltinLoader::with_builtins());
//! let manager = Arc::new(PluginManager::new(registry, loader));
//! let router = DynamicRouter::new(manager);
//! let report = router.reload_all().await?;
//! println!("{} plugins mounted", report.loaded.len());
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub mod error;
pub mod registry;
pub mod discovery;
pub mod compatibility;
pub mod loader;
pub mod manager;
pub mod router;
pub mod builtin;

#[cfg(test)]
pub mod tests;

// Re-export core types for easier access
pub use traits::{Plugin, PluginLoader, PluginStatus};
pub use error::{PluginError, PluginResult};

// Plugin metadata and routes
pub use traits::{
    route_handler, HttpMethod, PluginDescriptor, PluginManifest, RouteDescriptor, RouteHandler,
    RouteRequest, RouteResponse,
};

// Registry and management
pub use registry::{PluginRegistry, ScanReport};
pub use discovery::{FileManifestStore, ManifestStore, MemoryManifestStore};
pub use compatibility::VersionCompatibilityChecker;
pub use loader::BuiltinLoader;
pub use manager::{PluginManager, PluginSummary};
pub use router::{DynamicRouter, MountedRouteInfo, ReloadReport};
