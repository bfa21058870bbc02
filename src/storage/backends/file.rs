//! File-based storage backend implementation

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::storage::{
    error::{StorageError, StorageResult},
    traits::DataStore,
    types::{DataRef, ObjectMetadata},
};

/// File-based storage backend
///
/// References are resolved relative to `base_dir`; a `file://` scheme is
/// accepted and stripped. Writes go to a temp file that is renamed into place.
#[derive(Debug, Clone)]
pub struct FileDataStore {
    base_dir: PathBuf,
}

impl FileDataStore {
    /// Create a new file backend rooted at `base_dir`
    pub async fn new(base_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a reference onto a path under the base directory
    fn get_path(&self, reference: &DataRef) -> StorageResult<PathBuf> {
        let raw = reference.as_str();
        let relative = match raw.split_once("://") {
            Some(("file", rest)) => rest,
            Some((scheme, _)) => {
                return Err(StorageError::invalid_reference(format!(
                    "unsupported scheme {scheme:?} for file store"
                )))
            }
            None => raw,
        };
        Ok(self.base_dir.join(relative.trim_start_matches('/')))
    }
}

#[async_trait]
impl DataStore for FileDataStore {
    async fn write_raw(&self, reference: &DataRef, bytes: &[u8]) -> StorageResult<()> {
        let path = self.get_path(reference)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(e, reference.as_str()))?;
        }

        // Write atomically using temp file
        let temp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| StorageError::from_io(e, reference.as_str()))?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::from_io(e, reference.as_str()));
        }

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn read_raw(&self, reference: &DataRef) -> StorageResult<Vec<u8>> {
        let path = self.get_path(reference)?;
        fs::read(&path)
            .await
            .map_err(|e| StorageError::from_io(e, reference.as_str()))
    }

    async fn head(&self, reference: &DataRef) -> StorageResult<Option<ObjectMetadata>> {
        let path = self.get_path(reference)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(ObjectMetadata::for_bytes(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::from_io(e, reference.as_str())),
        }
    }
}
