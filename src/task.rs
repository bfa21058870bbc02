//! Task specification and resource overrides

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;

/// Memoization settings declared on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    pub discoverable: bool,
    /// Bumped by task authors to invalidate earlier cached outputs
    pub version: String,
}

/// The task a node runs, as authored in the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    /// Tag selecting the plugin that executes this task
    pub task_type: String,
    /// Plugin-specific configuration
    #[serde(default)]
    pub custom: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,
    #[serde(default)]
    pub interruptible: bool,
}

impl TaskTemplate {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            custom: Value::Null,
            cache: None,
            interruptible: false,
        }
    }

    pub fn with_custom(mut self, custom: Value) -> Self {
        self.custom = custom;
        self
    }

    pub fn with_cache(mut self, version: impl Into<String>) -> Self {
        self.cache = Some(CacheSpec {
            discoverable: true,
            version: version.into(),
        });
        self
    }
}

/// Read access to the node's task specification
#[async_trait]
pub trait TaskReader: Send + Sync {
    async fn read(&self) -> Result<TaskTemplate>;
}

/// CPU, memory and similar quantities, keyed by resource name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Overrides declared on the node for this task
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskOverrides {
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Free-form plugin configuration overrides
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl TaskOverrides {
    pub fn with_request(mut self, name: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.resources.requests.insert(name.into(), quantity.into());
        self
    }

    pub fn with_limit(mut self, name: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.resources.limits.insert(name.into(), quantity.into());
        self
    }
}
