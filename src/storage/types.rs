//! Type definitions for the durable store adapter

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::error::{StorageError, StorageResult};

/// Location of an object in the durable store.
///
/// References are `/`-separated and never contain `..` segments, so a
/// reference derived from a node's data directory cannot escape it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRef(String);

impl DataRef {
    /// Create a reference, normalizing duplicate and trailing separators
    pub fn new(raw: impl AsRef<str>) -> StorageResult<Self> {
        let raw = raw.as_ref();
        let scheme_end = raw.find("://").map(|i| i + 3).unwrap_or(0);
        let (scheme, path) = raw.split_at(scheme_end);

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(StorageError::invalid_reference(format!(
                "empty reference: {raw:?}"
            )));
        }
        if segments.iter().any(|s| *s == ".." || *s == ".") {
            return Err(StorageError::invalid_reference(format!(
                "relative segments are not allowed: {raw:?}"
            )));
        }

        let leading = if scheme.is_empty() && path.starts_with('/') {
            "/"
        } else {
            ""
        };
        Ok(Self(format!("{scheme}{leading}{}", segments.join("/"))))
    }

    /// Append one or more `/`-separated segments
    pub fn join(&self, child: &str) -> StorageResult<Self> {
        Self::new(format!("{}/{}", self.0, child))
    }

    /// Whether `self` lies under `prefix`
    pub fn starts_with(&self, prefix: &DataRef) -> bool {
        self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata describing a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub size: u64,
    /// Hex-encoded SHA-256 of the object contents
    pub digest: String,
}

impl ObjectMetadata {
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u64,
            digest: content_digest(bytes),
        }
    }
}

/// Hex-encoded SHA-256 of `bytes`
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
