//! Plugin Entry Points
//!
//! Typed entry-point table mapping plugin ids to factories. Replaces
//! name-based reflection: a plugin can only be loaded if its id has a
//! registered factory.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use crate::plugin::error::{PluginError, PluginResult};
use crate::plugin::traits::{Plugin, PluginDescriptor, PluginLoader};

/// Factory producing a plugin instance from its descriptor
pub type PluginFactory =
    Arc<dyn Fn(PluginDescriptor) -> BoxFuture<'static, PluginResult<Box<dyn Plugin>>> + Send + Sync>;

/// Loader backed by a registered map of entry points
#[derive(Default)]
pub struct BuiltinLoader {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader pre-populated with the plugins shipped in this crate
    pub fn with_builtins() -> Self {
        let loader = Self::new();
        crate::plugin::builtin::register_builtin_plugins(&loader);
        loader
    }

    /// Register an async factory for `plugin_id`, replacing any previous one
    pub fn register<F, Fut>(&self, plugin_id: &str, factory: F)
    where
        F: Fn(PluginDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<Box<dyn Plugin>>> + Send + 'static,
    {
        let factory: PluginFactory = Arc::new(move |descriptor| Box::pin(factory(descriptor)));
        if self.factories.write().insert(plugin_id.to_string(), factory).is_some() {
            log::debug!("Replaced entry point for plugin '{}'", plugin_id);
        }
    }

    /// Ids with a registered entry point
    pub fn entry_points(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl PluginLoader for BuiltinLoader {
    async fn load(&self, descriptor: &PluginDescriptor) -> PluginResult<Box<dyn Plugin>> {
        let factory = self.factories
            .read()
            .get(&descriptor.id)
            .cloned()
            .ok_or_else(|| PluginError::load_error(&descriptor.id, "no entry point registered"))?;

        factory(descriptor.clone()).await
    }

    fn has_entry_point(&self, plugin_id: &str) -> bool {
        self.factories.read().contains_key(plugin_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare(String);

    impl Plugin for Bare {
        fn plugin_id(&self) -> &str {
            &self.0
        }
    }

    #[tokio::test]
    async fn test_registered_factory_loads() {
        let loader = BuiltinLoader::new();
        loader.register("bare", |d: PluginDescriptor| async move {
            Ok(Box::new(Bare(d.id)) as Box<dyn Plugin>)
        });

        assert!(loader.has_entry_point("bare"));
        let plugin = loader.load(&PluginDescriptor::new("bare", "1.0.0")).await.unwrap();
        assert_eq!(plugin.plugin_id(), "bare");
    }

    #[tokio::test]
    async fn test_missing_entry_point_is_load_error() {
        let loader = BuiltinLoader::new();
        let result = loader.load(&PluginDescriptor::new("ghost", "1.0.0")).await;
        assert!(matches!(result, Err(PluginError::LoadError { .. })));
    }
}
