use thiserror::Error;

use crate::plugin::PluginError;
use crate::storage::StorageError;

/// Errors raised while assembling or running one reconciliation pass.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Plugin state version mismatch: persisted codec version {found}, current {expected}, no migration registered")]
    StateVersionMismatch { found: u32, expected: u32 },

    #[error("Plugin state schema mismatch (state version {state_version}): {reason}")]
    StateSchemaMismatch { state_version: u8, reason: String },

    #[error("Plugin state corrupted: {0}")]
    StateCorrupted(String),

    #[error("Plugin state too large: {size} bytes exceeds limit of {limit} bytes")]
    StateTooLarge { size: usize, limit: usize },

    #[error("Runtime execution error for node {node_id}: {message}")]
    RuntimeExecution {
        node_id: String,
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    #[error("Output conflict: {0}")]
    OutputConflict(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Resource admission denied in namespace {namespace} for token {token}")]
    AdmissionDenied { namespace: String, token: String },

    #[error("No plugin registered for task type: {0}")]
    PluginNotFound(String),

    #[error("Plugin already registered for task type: {0}")]
    PluginAlreadyExists(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("Event flush failed: {0}")]
    EventFlush(#[source] anyhow::Error),

    #[error("Pass cancelled for node {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a context assembly failure for `node_id`.
    pub fn runtime_execution(node_id: &str, message: impl Into<String>, source: Error) -> Self {
        Error::RuntimeExecution {
            node_id: node_id.to_string(),
            message: message.into(),
            source: Box::new(source),
        }
    }

    /// Whether the surrounding controller should retry the pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RuntimeExecution { source, .. } => !source.is_permanent_cause(),
            Error::StorageUnavailable(_)
            | Error::AdmissionDenied { .. }
            | Error::EventFlush(_)
            | Error::Cancelled(_) => true,
            Error::Storage(err) => err.is_retryable(),
            Error::Plugin(err) => err.is_retryable(),
            Error::Configuration(_)
            | Error::StateVersionMismatch { .. }
            | Error::StateSchemaMismatch { .. }
            | Error::StateCorrupted(_)
            | Error::StateTooLarge { .. }
            | Error::OutputConflict(_)
            | Error::SecretNotFound(_)
            | Error::PluginNotFound(_)
            | Error::PluginAlreadyExists(_)
            | Error::Serialization(_) => false,
        }
    }

    // Causes that no amount of retrying fixes without operator action.
    fn is_permanent_cause(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::StateVersionMismatch { .. }
                | Error::StateSchemaMismatch { .. }
                | Error::StateCorrupted(_)
        )
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        if err.is_retryable() {
            Error::StorageUnavailable(err)
        } else {
            Error::Storage(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
