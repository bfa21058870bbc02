//! Execution events produced during a pass
//!
//! Plugins record events freely while a pass runs. Nothing is visible to
//! downstream consumers until the caller flushes the whole batch after the
//! pass has completed and its state has been persisted.

mod recorder;
mod sink;

pub use recorder::BufferedEventRecorder;
pub use sink::{EventSink, JsonlEventSink, MemoryEventSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::plugin::TaskPhase;
use crate::storage::DataRef;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TaskEventKind {
    PhaseChanged {
        phase: TaskPhase,
        phase_version: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    OutputWritten {
        reference: DataRef,
    },
    Diagnostic {
        message: String,
    },
}

/// A single event with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    /// Generated name of the execution that produced the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_name: Option<String>,
    #[serde(flatten)]
    pub kind: TaskEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TaskEvent {
    pub fn new(kind: TaskEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            execution_name: None,
            kind,
            payload: None,
        }
    }

    pub fn phase_changed(phase: TaskPhase, phase_version: u32, reason: Option<String>) -> Self {
        Self::new(TaskEventKind::PhaseChanged {
            phase,
            phase_version,
            reason,
        })
    }

    pub fn output_written(reference: DataRef) -> Self {
        Self::new(TaskEventKind::OutputWritten { reference })
    }

    pub fn diagnostic(message: impl Into<String>) -> Self {
        Self::new(TaskEventKind::Diagnostic {
            message: message.into(),
        })
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Get a human-readable name for this event type
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            TaskEventKind::PhaseChanged { .. } => "phase_changed",
            TaskEventKind::OutputWritten { .. } => "output_written",
            TaskEventKind::Diagnostic { .. } => "diagnostic",
        }
    }
}
