//! Task phases reported by plugins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible phase of a node's task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    #[default]
    Undefined,
    NotReady,
    WaitingForResources,
    Queued,
    Initializing,
    Running,
    Success,
    RetryableFailure,
    PermanentFailure,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskPhase::Success | TaskPhase::RetryableFailure | TaskPhase::PermanentFailure
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskPhase::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskPhase::RetryableFailure | TaskPhase::PermanentFailure
        )
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPhase::Undefined => "undefined",
            TaskPhase::NotReady => "not_ready",
            TaskPhase::WaitingForResources => "waiting_for_resources",
            TaskPhase::Queued => "queued",
            TaskPhase::Initializing => "initializing",
            TaskPhase::Running => "running",
            TaskPhase::Success => "success",
            TaskPhase::RetryableFailure => "retryable_failure",
            TaskPhase::PermanentFailure => "permanent_failure",
        };
        write!(f, "{name}")
    }
}

/// Failure details attached to a failed phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// The outcome a plugin reports for one pass.
///
/// `version` distinguishes successive updates within the same phase, so a
/// running task can report progress without changing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub phase: TaskPhase,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionErrorInfo>,
    pub occurred_at: DateTime<Utc>,
}

impl PhaseInfo {
    pub fn new(phase: TaskPhase) -> Self {
        Self {
            phase,
            version: 0,
            reason: None,
            error: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn queued(reason: impl Into<String>) -> Self {
        Self::new(TaskPhase::Queued).with_reason(reason)
    }

    pub fn waiting_for_resources(reason: impl Into<String>) -> Self {
        Self::new(TaskPhase::WaitingForResources).with_reason(reason)
    }

    pub fn running(version: u32) -> Self {
        Self::new(TaskPhase::Running).with_version(version)
    }

    pub fn success() -> Self {
        Self::new(TaskPhase::Success)
    }

    pub fn retryable_failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(TaskPhase::RetryableFailure, code.into(), message.into(), true)
    }

    pub fn permanent_failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(TaskPhase::PermanentFailure, code.into(), message.into(), false)
    }

    fn failure(phase: TaskPhase, code: String, message: String, retryable: bool) -> Self {
        let mut info = Self::new(phase).with_reason(message.clone());
        info.error = Some(ExecutionErrorInfo {
            code,
            message,
            retryable,
        });
        info
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
