//! Plugin factory registry.
//!
//! External collaborators register a [`PluginFactory`] together with the
//! plugin's parameter blob; the scheduler resolves pipeline plugin names
//! here and instantiates one instance per worker chain (or one shared
//! instance for shareable plugins).

use std::sync::Arc;

use dashmap::DashMap;
use flowgate_core::error::{FlowgateError, Result};
use flowgate_core::traits::{Plugin, PluginFactory};

struct RegisteredPlugin {
    factory: Arc<dyn PluginFactory>,
    config: serde_json::Value,
}

/// Maps plugin names to their factories and configuration.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, RegisteredPlugin>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory with its plugin's parameter blob, replacing any
    /// previous registration under the same name.
    pub fn register(&self, factory: Arc<dyn PluginFactory>, config: serde_json::Value) {
        self.plugins.insert(
            factory.plugin_name().to_string(),
            RegisteredPlugin { factory, config },
        );
    }

    /// Remove a registration. Returns whether it existed.
    pub fn unregister(&self, plugin: &str) -> bool {
        self.plugins.remove(plugin).is_some()
    }

    /// Whether a plugin name resolves.
    pub fn contains(&self, plugin: &str) -> bool {
        self.plugins.contains_key(plugin)
    }

    /// All registered plugin names.
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether instances of a plugin may be shared across workers.
    pub fn shareable(&self, plugin: &str) -> Result<bool> {
        let entry = self
            .plugins
            .get(plugin)
            .ok_or_else(|| FlowgateError::PluginNotFound {
                plugin: plugin.to_string(),
            })?;
        Ok(entry.factory.shareable())
    }

    /// Create a new instance of a plugin from its registered factory and
    /// parameter blob.
    pub fn instantiate(&self, plugin: &str) -> Result<Arc<dyn Plugin>> {
        let entry = self
            .plugins
            .get(plugin)
            .ok_or_else(|| FlowgateError::PluginNotFound {
                plugin: plugin.to_string(),
            })?;
        entry.factory.create(&entry.config)
    }
}
