//! In-memory storage backend for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::DataStore,
    types::{DataRef, ObjectMetadata},
};

/// In-memory storage backend for testing
///
/// Cloning shares the underlying objects, so a test can keep a handle and
/// inspect what a pass wrote.
#[derive(Clone, Default)]
pub struct MemoryDataStore {
    objects: Arc<RwLock<HashMap<DataRef, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing connectivity to the backing store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn write_raw(&self, reference: &DataRef, bytes: &[u8]) -> StorageResult<()> {
        self.check_available()?;
        self.objects
            .write()
            .await
            .insert(reference.clone(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_raw(&self, reference: &DataRef) -> StorageResult<Vec<u8>> {
        self.check_available()?;
        self.objects
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::not_found(reference))
    }

    async fn head(&self, reference: &DataRef) -> StorageResult<Option<ObjectMetadata>> {
        self.check_available()?;
        Ok(self
            .objects
            .read()
            .await
            .get(reference)
            .map(|bytes| ObjectMetadata::for_bytes(bytes)))
    }
}
