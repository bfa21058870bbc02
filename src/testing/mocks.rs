//! Mock implementations of the boundary traits

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::RwLock;

use crate::catalog::{CatalogClient, CatalogEntry, CatalogKey};
use crate::error::{Error, Result};
use crate::node::{NodeStateWriter, OwnerId, OwnerQueue, TaskNodeState};
use crate::secrets::SecretManager;
use crate::storage::StorageError;
use crate::task::{TaskReader, TaskTemplate};

/// Serves a fixed task template
#[derive(Debug, Clone)]
pub struct StaticTaskReader {
    template: TaskTemplate,
}

impl StaticTaskReader {
    pub fn new(template: TaskTemplate) -> Self {
        Self { template }
    }
}

#[async_trait]
impl TaskReader for StaticTaskReader {
    async fn read(&self) -> Result<TaskTemplate> {
        Ok(self.template.clone())
    }
}

/// Holds the task node state in memory, as the controller's status record would
#[derive(Debug, Default)]
pub struct MemoryNodeStateWriter {
    state: Mutex<TaskNodeState>,
    puts: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryNodeStateWriter {
    pub fn new(initial: TaskNodeState) -> Self {
        Self {
            state: Mutex::new(initial),
            ..Self::default()
        }
    }

    pub fn current(&self) -> TaskNodeState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail as if the status record were unreachable
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NodeStateWriter for MemoryNodeStateWriter {
    async fn put_task_node_state(&self, state: TaskNodeState) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("node status record unreachable").into());
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records enqueued owners in order
#[derive(Debug, Default)]
pub struct MemoryOwnerQueue {
    owners: Mutex<Vec<OwnerId>>,
}

impl MemoryOwnerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> Vec<OwnerId> {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OwnerQueue for MemoryOwnerQueue {
    fn enqueue_owner(&self, owner: &OwnerId) -> Result<()> {
        self.owners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(owner.clone());
        Ok(())
    }
}

/// In-memory output cache
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<HashMap<CatalogKey, CatalogEntry>>,
    unavailable: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("catalog unreachable").into());
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn get(&self, key: &CatalogKey) -> Result<Option<CatalogEntry>> {
        self.check_available()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CatalogKey, entry: CatalogEntry) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.insert(key.clone(), entry);
        Ok(())
    }
}

/// Secrets from a fixed map
#[derive(Debug, Clone, Default)]
pub struct StaticSecretManager {
    secrets: HashMap<String, String>,
}

impl StaticSecretManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretManager for StaticSecretManager {
    async fn get(&self, name: &str) -> Result<String> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SecretNotFound(name.to_string()))
    }
}
