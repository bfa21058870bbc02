//! Output locations for one task attempt
//!
//! Every attempt writes under its own prefix inside the node's data
//! directory:
//!
//! ```text
//! <data_dir>/<attempt>/outputs.json
//! <data_dir>/<attempt>/error.json
//! <data_dir>/checkpoints/<attempt>/...
//! ```

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::plugin::ExecutionErrorInfo;
use crate::storage::{content_digest, DataRef, DataStore, StorageError};

pub const OUTPUTS_FILE: &str = "outputs.json";
pub const ERROR_FILE: &str = "error.json";
const CHECKPOINTS_DIR: &str = "checkpoints";

/// Writes task outputs to the durable store.
///
/// Anything under the node's data directory may be read, but only the current
/// attempt's output and checkpoint prefixes may be written. A published
/// `outputs.json` is never replaced with different content.
#[derive(Clone)]
pub struct OutputWriter {
    store: Arc<dyn DataStore>,
    data_dir: DataRef,
    output_prefix: DataRef,
    checkpoint_prefix: DataRef,
    previous_checkpoint: Option<DataRef>,
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("output_prefix", &self.output_prefix)
            .field("checkpoint_prefix", &self.checkpoint_prefix)
            .finish()
    }
}

impl OutputWriter {
    /// Resolve the output locations of `retry_attempt` under `data_dir`
    pub fn resolve(store: Arc<dyn DataStore>, data_dir: &DataRef, retry_attempt: u32) -> Result<Self> {
        let output_prefix = data_dir.join(&retry_attempt.to_string())?;
        let checkpoints = data_dir.join(CHECKPOINTS_DIR)?;
        let checkpoint_prefix = checkpoints.join(&retry_attempt.to_string())?;
        let previous_checkpoint = match retry_attempt.checked_sub(1) {
            Some(previous) => Some(checkpoints.join(&previous.to_string())?),
            None => None,
        };

        Ok(Self {
            store,
            data_dir: data_dir.clone(),
            output_prefix,
            checkpoint_prefix,
            previous_checkpoint,
        })
    }

    pub fn output_prefix(&self) -> &DataRef {
        &self.output_prefix
    }

    pub fn outputs_path(&self) -> Result<DataRef> {
        Ok(self.output_prefix.join(OUTPUTS_FILE)?)
    }

    pub fn error_path(&self) -> Result<DataRef> {
        Ok(self.output_prefix.join(ERROR_FILE)?)
    }

    /// Where this attempt may write checkpoints
    pub fn checkpoint_prefix(&self) -> &DataRef {
        &self.checkpoint_prefix
    }

    /// Checkpoints left by the previous attempt, if there was one
    pub fn previous_checkpoint(&self) -> Option<&DataRef> {
        self.previous_checkpoint.as_ref()
    }

    /// A reference for `name` under the output prefix
    pub fn sub_path(&self, name: &str) -> Result<DataRef> {
        if name.trim_matches('/').is_empty() || name.contains("://") {
            return Err(StorageError::invalid_reference(format!("invalid output name: {name:?}")).into());
        }
        Ok(self.output_prefix.join(name)?)
    }

    /// Write `data`, replacing whatever the reference held.
    ///
    /// The attempt's `outputs.json` goes through [`Self::write_immutable`].
    pub async fn write(&self, reference: &DataRef, data: &[u8]) -> Result<()> {
        self.check_writable(reference)?;
        if reference == &self.outputs_path()? {
            return self.write_immutable(reference, data).await;
        }
        self.store.write_raw(reference, data).await?;
        debug!("Wrote {} bytes to {}", data.len(), reference);
        Ok(())
    }

    /// Write `data` unless the reference already holds it.
    ///
    /// Identical existing content is accepted so a repeated pass can write
    /// the same output again; different content is an [`Error::OutputConflict`].
    pub async fn write_immutable(&self, reference: &DataRef, data: &[u8]) -> Result<()> {
        self.check_writable(reference)?;
        if let Some(existing) = self.store.head(reference).await? {
            if existing.digest == content_digest(data) {
                debug!("{} already holds identical content", reference);
                return Ok(());
            }
            return Err(Error::OutputConflict(format!(
                "{} already exists with different content",
                reference
            )));
        }
        self.store.write_raw(reference, data).await?;
        debug!("Wrote {} bytes to {}", data.len(), reference);
        Ok(())
    }

    /// Serialize `outputs` to `outputs.json` immutably
    pub async fn write_outputs<T: Serialize>(&self, outputs: &T) -> Result<DataRef> {
        let path = self.outputs_path()?;
        let data = serde_json::to_vec_pretty(outputs)?;
        self.write_immutable(&path, &data).await?;
        Ok(path)
    }

    /// Record the failure of this attempt in `error.json`
    pub async fn write_error(&self, error: &ExecutionErrorInfo) -> Result<DataRef> {
        let path = self.error_path()?;
        let data = serde_json::to_vec_pretty(error)?;
        self.write(&path, &data).await?;
        Ok(path)
    }

    pub async fn read(&self, reference: &DataRef) -> Result<Vec<u8>> {
        self.check_scope(reference)?;
        Ok(self.store.read_raw(reference).await?)
    }

    pub async fn exists(&self, reference: &DataRef) -> Result<bool> {
        self.check_scope(reference)?;
        Ok(self.store.head(reference).await?.is_some())
    }

    fn check_scope(&self, reference: &DataRef) -> Result<()> {
        if reference.starts_with(&self.data_dir) && reference != &self.data_dir {
            Ok(())
        } else {
            Err(StorageError::invalid_reference(format!(
                "{} is outside {}",
                reference, self.data_dir
            ))
            .into())
        }
    }

    fn check_writable(&self, reference: &DataRef) -> Result<()> {
        self.check_scope(reference)?;
        let under = |prefix: &DataRef| reference.starts_with(prefix) && reference != prefix;
        if under(&self.output_prefix) || under(&self.checkpoint_prefix) {
            Ok(())
        } else {
            Err(StorageError::invalid_reference(format!(
                "{} is read-only for this attempt",
                reference
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDataStore;
    use serde_json::json;

    fn writer(store: &MemoryDataStore, attempt: u32) -> OutputWriter {
        let data_dir = DataRef::new("mem://wf/exec-1/n1").unwrap();
        OutputWriter::resolve(Arc::new(store.clone()), &data_dir, attempt).unwrap()
    }

    #[test]
    fn test_resolved_layout() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 2);

        assert_eq!(w.output_prefix().as_str(), "mem://wf/exec-1/n1/2");
        assert_eq!(w.outputs_path().unwrap().as_str(), "mem://wf/exec-1/n1/2/outputs.json");
        assert_eq!(w.error_path().unwrap().as_str(), "mem://wf/exec-1/n1/2/error.json");
        assert_eq!(
            w.checkpoint_prefix().as_str(),
            "mem://wf/exec-1/n1/checkpoints/2"
        );
        assert_eq!(
            w.previous_checkpoint().map(DataRef::as_str),
            Some("mem://wf/exec-1/n1/checkpoints/1")
        );
        assert!(writer(&store, 0).previous_checkpoint().is_none());
    }

    #[test]
    fn test_sub_path_rejects_escapes() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 0);

        assert_eq!(
            w.sub_path("logs/stdout.txt").unwrap().as_str(),
            "mem://wf/exec-1/n1/0/logs/stdout.txt"
        );
        for name in ["../other", "a/../../b", "", "/", "s3://bucket/x"] {
            assert!(w.sub_path(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_write_outputs_is_idempotent() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 0);

        let path = w.write_outputs(&json!({"o0": 42})).await.unwrap();
        w.write_outputs(&json!({"o0": 42})).await.unwrap();

        assert!(w.exists(&path).await.unwrap());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_write_immutable_conflict_is_permanent() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 0);
        let r = w.sub_path("result.bin").unwrap();

        w.write_immutable(&r, b"first").await.unwrap();
        let err = w.write_immutable(&r, b"second").await.unwrap_err();
        assert!(matches!(err, Error::OutputConflict(_)));
        assert!(!err.is_retryable());
        assert_eq!(w.read(&r).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_write_error_overwrites() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 1);
        let info = |message: &str| ExecutionErrorInfo {
            code: "OOMKilled".into(),
            message: message.into(),
            retryable: true,
        };

        w.write_error(&info("first")).await.unwrap();
        let path = w.write_error(&info("second")).await.unwrap();

        let stored: ExecutionErrorInfo =
            serde_json::from_slice(&w.read(&path).await.unwrap()).unwrap();
        assert_eq!(stored.message, "second");
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 0);
        store.set_unavailable(true);

        let err = w.write_outputs(&json!({})).await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_references_outside_data_dir_rejected() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 0);
        let foreign = DataRef::new("mem://wf/exec-1/n2/0/outputs.json").unwrap();

        let err = w.write(&foreign, b"x").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_write_cannot_replace_published_outputs() {
        let store = MemoryDataStore::new();
        let w = writer(&store, 0);
        let path = w.write_outputs(&json!({"o0": 42})).await.unwrap();
        let published = w.read(&path).await.unwrap();

        let err = w.write(&path, b"clobbered").await.unwrap_err();
        assert!(matches!(err, Error::OutputConflict(_)));
        w.write(&path, &published).await.unwrap();
        assert_eq!(w.read(&path).await.unwrap(), published);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_earlier_attempt_outputs_are_read_only() {
        let store = MemoryDataStore::new();
        let first = writer(&store, 0);
        let path = first.write_outputs(&json!({"o0": 42})).await.unwrap();

        let second = writer(&store, 1);
        let err = second.write(&path, b"{}").await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::InvalidReference(_))));
        assert!(second.write_immutable(&path, b"{}").await.is_err());

        assert!(second.exists(&path).await.unwrap());
        let stored: serde_json::Value =
            serde_json::from_slice(&second.read(&path).await.unwrap()).unwrap();
        assert_eq!(stored, json!({"o0": 42}));
    }

    #[tokio::test]
    async fn test_previous_checkpoint_is_read_only() {
        let store = MemoryDataStore::new();
        let first = writer(&store, 0);
        let saved = first.checkpoint_prefix().join("ckpt").unwrap();
        first.write(&saved, b"step-1").await.unwrap();

        let second = writer(&store, 1);
        let previous = second.previous_checkpoint().unwrap().join("ckpt").unwrap();
        assert_eq!(previous, saved);

        let err = second.write(&previous, b"step-2").await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::InvalidReference(_))));
        assert_eq!(second.read(&previous).await.unwrap(), b"step-1");

        let own = second.checkpoint_prefix().join("ckpt").unwrap();
        second.write(&own, b"step-2").await.unwrap();
        assert_eq!(store.write_count(), 2);
    }
}
