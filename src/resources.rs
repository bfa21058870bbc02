//! Allocation hooks for concurrency-limited external resources
//!
//! Plugins allocate a token in a named namespace before starting work that
//! consumes external quota, and release it once the work is done. Running out
//! of quota is not an execution failure; the plugin reports that it is waiting
//! and the pass is retried later.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Result of an allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Granted,
    ExhaustedQuota,
}

impl AllocationStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, AllocationStatus::Granted)
    }
}

#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Allocate `token` in `namespace`; re-allocating a held token is granted
    async fn allocate(&self, namespace: &str, token: &str) -> Result<AllocationStatus>;

    /// Release `token`; releasing an unknown token is a no-op
    async fn release(&self, namespace: &str, token: &str) -> Result<()>;
}

/// Grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResourceManager;

#[async_trait]
impl ResourceManager for NoopResourceManager {
    async fn allocate(&self, _namespace: &str, _token: &str) -> Result<AllocationStatus> {
        Ok(AllocationStatus::Granted)
    }

    async fn release(&self, _namespace: &str, _token: &str) -> Result<()> {
        Ok(())
    }
}

/// Fixed number of concurrently held tokens per namespace.
///
/// Namespaces without a configured quota are unlimited.
#[derive(Debug, Default)]
pub struct QuotaResourceManager {
    quotas: HashMap<String, usize>,
    held: Mutex<HashMap<String, HashSet<String>>>,
}

impl QuotaResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(mut self, namespace: impl Into<String>, limit: usize) -> Self {
        self.quotas.insert(namespace.into(), limit);
        self
    }

    /// Tokens currently held in `namespace`
    pub async fn held(&self, namespace: &str) -> usize {
        self.held
            .lock()
            .await
            .get(namespace)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ResourceManager for QuotaResourceManager {
    async fn allocate(&self, namespace: &str, token: &str) -> Result<AllocationStatus> {
        let mut held = self.held.lock().await;
        let tokens = held.entry(namespace.to_string()).or_default();

        if tokens.contains(token) {
            return Ok(AllocationStatus::Granted);
        }
        if let Some(limit) = self.quotas.get(namespace) {
            if tokens.len() >= *limit {
                debug!("Quota exhausted in {} ({} held)", namespace, tokens.len());
                return Ok(AllocationStatus::ExhaustedQuota);
            }
        }

        tokens.insert(token.to_string());
        Ok(AllocationStatus::Granted)
    }

    async fn release(&self, namespace: &str, token: &str) -> Result<()> {
        if let Some(tokens) = self.held.lock().await.get_mut(namespace) {
            tokens.remove(token);
        }
        Ok(())
    }
}

/// A plugin's view of the resource manager.
///
/// Namespaces are prefixed with the plugin id, so plugins cannot allocate
/// from or release tokens in each other's namespaces.
#[derive(Clone)]
pub struct ScopedResourceManager {
    inner: Arc<dyn ResourceManager>,
    scope: String,
}

impl ScopedResourceManager {
    pub fn new(inner: Arc<dyn ResourceManager>, plugin_id: &str) -> Self {
        Self {
            inner,
            scope: plugin_id.to_string(),
        }
    }

    /// The namespace as seen by the underlying manager
    pub fn qualify(&self, namespace: &str) -> String {
        format!("{}:{}", self.scope, namespace)
    }

    pub async fn allocate(&self, namespace: &str, token: &str) -> Result<AllocationStatus> {
        self.inner.allocate(&self.qualify(namespace), token).await
    }

    /// Allocate or fail with a retryable [`Error::AdmissionDenied`]
    pub async fn allocate_or_deny(&self, namespace: &str, token: &str) -> Result<()> {
        match self.allocate(namespace, token).await? {
            AllocationStatus::Granted => Ok(()),
            AllocationStatus::ExhaustedQuota => Err(Error::AdmissionDenied {
                namespace: self.qualify(namespace),
                token: token.to_string(),
            }),
        }
    }

    pub async fn release(&self, namespace: &str, token: &str) -> Result<()> {
        self.inner.release(&self.qualify(namespace), token).await
    }
}
