//! Built-in Plugin Implementations
//!
//! Plugins shipped with the runtime. They are loaded through the same
//! entry-point table as any other plugin and still need a manifest.

pub mod health;
pub mod alert_feed;

pub use health::HealthPlugin;
pub use alert_feed::AlertFeedPlugin;

use std::sync::Arc;
use crate::monitoring::AlertEngine;
use crate::plugin::loader::BuiltinLoader;
use crate::plugin::traits::{Plugin, PluginDescriptor};

/// Ids of the built-in plugins that need no host services
pub fn get_builtin_plugins() -> Vec<&'static str> {
    vec![health::PLUGIN_ID]
}

/// Register entry points for the self-contained built-in plugins
pub fn register_builtin_plugins(loader: &BuiltinLoader) {
    loader.register(health::PLUGIN_ID, |descriptor: PluginDescriptor| async move {
        Ok(Box::new(HealthPlugin::new(&descriptor)) as Box<dyn Plugin>)
    });
}

/// Register the alert feed plugin, which reads from a running alert engine
pub fn register_alert_feed(loader: &BuiltinLoader, engine: Arc<AlertEngine>) {
    loader.register(alert_feed::PLUGIN_ID, move |descriptor: PluginDescriptor| {
        let engine = Arc::clone(&engine);
        async move { Ok(Box::new(AlertFeedPlugin::new(&descriptor, engine)) as Box<dyn Plugin>) }
    });
}
