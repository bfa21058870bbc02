//! Core trait definitions for the durable store adapter

use async_trait::async_trait;

use super::error::StorageResult;
use super::types::{DataRef, ObjectMetadata};

/// Durable blob store used for task outputs and checkpoints.
///
/// Implementations must be safe for concurrent use by many nodes' passes and
/// must make `write_raw` atomic: a concurrent or later reader sees either the
/// previous object or the complete new one.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Write an object, replacing any previous content
    async fn write_raw(&self, reference: &DataRef, bytes: &[u8]) -> StorageResult<()>;

    /// Read an object
    async fn read_raw(&self, reference: &DataRef) -> StorageResult<Vec<u8>>;

    /// Get object metadata, `None` if the object does not exist
    async fn head(&self, reference: &DataRef) -> StorageResult<Option<ObjectMetadata>>;
}
