//! Task type to plugin resolution

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::Plugin;
use crate::error::{Error, Result};

/// Plugin registry maps task type tags to plugins
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    default_plugin: Option<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin for every task type it declares
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let task_types = plugin.task_types();
        if let Some(taken) = task_types.iter().find(|t| self.plugins.contains_key(*t)) {
            return Err(Error::PluginAlreadyExists(taken.clone()));
        }

        for task_type in task_types {
            debug!("Registering plugin {} for task type {}", plugin.id(), task_type);
            self.plugins.insert(task_type, Arc::clone(&plugin));
        }
        Ok(())
    }

    /// Plugin used for task types nobody registered
    pub fn set_default(&mut self, plugin: Arc<dyn Plugin>) {
        self.default_plugin = Some(plugin);
    }

    /// Find the plugin for a task type
    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn Plugin>> {
        self.plugins
            .get(task_type)
            .or(self.default_plugin.as_ref())
            .cloned()
            .ok_or_else(|| Error::PluginNotFound(task_type.to_string()))
    }

    /// Every distinct plugin, the default one included
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut distinct: Vec<Arc<dyn Plugin>> = Vec::new();
        for plugin in self.plugins.values().chain(self.default_plugin.iter()) {
            if !distinct.iter().any(|p| Arc::ptr_eq(p, plugin)) {
                distinct.push(Arc::clone(plugin));
            }
        }
        distinct.sort_by(|a, b| a.id().cmp(b.id()));
        distinct
    }

    /// Registered task types, sorted
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
