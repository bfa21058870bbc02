//! Error types for the durable store adapter

use std::fmt;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks access to the object
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Reference is not a valid location for this store
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Storage backend unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout occurred
    #[error("Timeout: operation took longer than {0:?}")]
    Timeout(std::time::Duration),
}

impl StorageError {
    /// Create a not found error
    pub fn not_found<E: fmt::Display>(item: E) -> Self {
        Self::NotFound(item.to_string())
    }

    /// Create an unavailable error
    pub fn unavailable<E: fmt::Display>(msg: E) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Create an invalid reference error
    pub fn invalid_reference<E: fmt::Display>(msg: E) -> Self {
        Self::InvalidReference(msg.to_string())
    }

    /// Classify an I/O error the way the store's callers care about it
    pub fn from_io(err: std::io::Error, reference: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(reference.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(reference.to_string()),
            _ => Self::Io(err),
        }
    }

    /// Check if this is a retryable error
    ///
    /// Connectivity problems are retryable; permission and not-found errors
    /// are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Unavailable(_) | Self::Connection(_) | Self::Timeout(_)
        )
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
