//! Per-pass event buffer

use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

use super::{EventSink, TaskEvent};
use crate::error::{Error, Result};

/// Accumulates the events of one pass until the caller flushes them.
#[derive(Debug, Default)]
pub struct BufferedEventRecorder {
    execution_name: Option<String>,
    buffer: Mutex<Vec<TaskEvent>>,
}

impl BufferedEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder that stamps every event with `execution_name`
    pub fn for_execution(execution_name: impl Into<String>) -> Self {
        Self {
            execution_name: Some(execution_name.into()),
            buffer: Mutex::new(Vec::new()),
        }
    }

    // Never fails: a poisoned buffer is still a valid Vec.
    fn buffer(&self) -> MutexGuard<'_, Vec<TaskEvent>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event
    pub fn record(&self, mut event: TaskEvent) {
        if event.execution_name.is_none() {
            event.execution_name = self.execution_name.clone();
        }
        self.buffer().push(event);
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    /// Copy of the buffered events in recording order
    pub fn events(&self) -> Vec<TaskEvent> {
        self.buffer().clone()
    }

    /// Deliver all buffered events to `sink` as one batch.
    ///
    /// On success the delivered events are removed and their count returned.
    /// On failure nothing is removed and the error is retryable.
    pub async fn flush(&self, sink: &dyn EventSink) -> Result<usize> {
        let events = self.events();
        if events.is_empty() {
            return Ok(0);
        }

        debug!("Flushing {} events", events.len());
        if let Err(e) = sink.emit(&events).await {
            error!("Failed to flush {} events: {}", events.len(), e);
            return Err(Error::EventFlush(e));
        }

        // Events recorded while the sink was busy stay for the next flush.
        self.buffer().drain(..events.len());
        Ok(events.len())
    }
}
