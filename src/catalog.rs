//! Advisory access to the output cache
//!
//! The catalog memoizes task outputs by a fingerprint of the task and its
//! inputs. It is strictly advisory: a failing catalog degrades to a miss and
//! never fails a pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::DataRef;
use crate::task::TaskTemplate;

/// Lookup key for a cached output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogKey {
    pub task_id: String,
    pub cache_version: String,
    /// SHA-256 over the task definition and inputs
    pub fingerprint: String,
}

impl CatalogKey {
    /// Key for `template` run against `inputs`, `None` if the task is not cacheable
    pub fn for_task(template: &TaskTemplate, inputs: &Value) -> Option<Self> {
        let cache = template.cache.as_ref().filter(|c| c.discoverable)?;

        // serde_json maps are ordered, so equal values hash equally.
        let canonical = json!({
            "task_type": template.task_type,
            "custom": template.custom,
            "inputs": inputs,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());

        Some(Self {
            task_id: template.id.clone(),
            cache_version: cache.version.clone(),
            fingerprint: format!("{:x}", hasher.finalize()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub outputs: DataRef,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_execution: Option<String>,
}

impl CatalogEntry {
    pub fn new(outputs: DataRef) -> Self {
        Self {
            outputs,
            created_at: Utc::now(),
            source_execution: None,
        }
    }

    pub fn with_source(mut self, generated_name: impl Into<String>) -> Self {
        self.source_execution = Some(generated_name.into());
        self
    }
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get(&self, key: &CatalogKey) -> Result<Option<CatalogEntry>>;
    async fn put(&self, key: &CatalogKey, entry: CatalogEntry) -> Result<()>;
}

/// Outcome of an advisory lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLookup {
    Hit(CatalogEntry),
    Miss,
    /// The catalog could not be reached; treat as a miss
    Unavailable,
}

impl CatalogLookup {
    pub fn entry(&self) -> Option<&CatalogEntry> {
        match self {
            CatalogLookup::Hit(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Catalog wrapper that swallows failures
#[derive(Clone)]
pub struct AdvisoryCatalog {
    client: Arc<dyn CatalogClient>,
}

impl AdvisoryCatalog {
    pub fn new(client: Arc<dyn CatalogClient>) -> Self {
        Self { client }
    }

    pub async fn lookup(&self, key: &CatalogKey) -> CatalogLookup {
        match self.client.get(key).await {
            Ok(Some(entry)) => {
                debug!("Catalog hit for {} ({})", key.task_id, key.fingerprint);
                CatalogLookup::Hit(entry)
            }
            Ok(None) => CatalogLookup::Miss,
            Err(e) => {
                warn!("Catalog lookup failed for {}: {}", key.task_id, e);
                CatalogLookup::Unavailable
            }
        }
    }

    /// Record an output; returns whether the catalog accepted it
    pub async fn record(&self, key: &CatalogKey, entry: CatalogEntry) -> bool {
        match self.client.put(key, entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Catalog write failed for {}: {}", key.task_id, e);
                false
            }
        }
    }
}
