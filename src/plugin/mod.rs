//! Plugin interface
//!
//! A plugin drives one kind of task (batch job, external service call,
//! container workload) to completion over many passes. The runtime selects
//! it by the task type tag on the node's task template and hands it a
//! [`TaskExecutionContext`] for exactly one pass.

use async_trait::async_trait;
use thiserror::Error;

use crate::context::TaskExecutionContext;

pub mod phase;
pub mod registry;
pub mod setup;

pub use phase::{ExecutionErrorInfo, PhaseInfo, TaskPhase};
pub use registry::PluginRegistry;
pub use setup::SetupContext;

/// Failure reported by a plugin, classified by the plugin itself
#[derive(Error, Debug)]
pub enum PluginError {
    /// The pass should be retried later; nothing from this pass is persisted
    #[error("retryable plugin failure [{code}]: {source}")]
    Retryable {
        code: String,
        #[source]
        source: anyhow::Error,
    },

    /// The task cannot succeed; state and events produced so far are kept
    #[error("permanent plugin failure [{code}]: {source}")]
    Permanent {
        code: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PluginError {
    pub fn retryable(code: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        PluginError::Retryable {
            code: code.into(),
            source: source.into(),
        }
    }

    pub fn permanent(code: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        PluginError::Permanent {
            code: code.into(),
            source: source.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PluginError::Retryable { .. })
    }

    pub fn code(&self) -> &str {
        match self {
            PluginError::Retryable { code, .. } | PluginError::Permanent { code, .. } => code,
        }
    }
}

impl From<crate::error::Error> for PluginError {
    fn from(err: crate::error::Error) -> Self {
        if err.is_retryable() {
            PluginError::retryable("RuntimeError", err)
        } else {
            PluginError::permanent("RuntimeError", err)
        }
    }
}

/// An executor implementation for one or more task types
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier, also used to scope the plugin's resource namespaces
    fn id(&self) -> &str;

    /// Task type tags this plugin handles
    fn task_types(&self) -> Vec<String>;

    /// Called once before the plugin's first pass
    async fn setup(&self, _setup: &SetupContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Take one bounded step toward completing the task
    async fn handle(&self, tctx: &TaskExecutionContext) -> Result<PhaseInfo, PluginError>;

    /// Stop any external work started for the task
    async fn abort(&self, _tctx: &TaskExecutionContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Release anything held for the task once it will not run again
    async fn finalize(&self, _tctx: &TaskExecutionContext) -> Result<(), PluginError> {
        Ok(())
    }
}
