//! The per-pass facade handed to plugins
//!
//! A [`TaskExecutionContext`] is built fresh for every reconciliation pass and
//! owned by that pass alone. It exposes exactly the capabilities a plugin may
//! use for its own node: its plugin state, an event buffer, its output
//! locations, scoped resource allocation, secrets, the task specification,
//! the advisory catalog and immutable execution metadata.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::catalog::AdvisoryCatalog;
use crate::error::Result;
use crate::events::{BufferedEventRecorder, TaskEvent};
use crate::identity::TaskExecutionIdentity;
use crate::node::OwnerId;
use crate::output::OutputWriter;
use crate::resources::ScopedResourceManager;
use crate::secrets::SecretManager;
use crate::state::{PluginStateHandle, StatePhase};
use crate::task::{TaskOverrides, TaskReader, TaskTemplate};

/// Immutable description of the execution a pass works on
#[derive(Debug, Clone)]
pub struct TaskExecutionMetadata {
    pub(crate) owner: OwnerId,
    pub(crate) identity: TaskExecutionIdentity,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) annotations: BTreeMap<String, String>,
    pub(crate) interruptible: bool,
    pub(crate) overrides: TaskOverrides,
}

impl TaskExecutionMetadata {
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn namespace(&self) -> &str {
        &self.owner.namespace
    }

    pub fn identity(&self) -> &TaskExecutionIdentity {
        &self.identity
    }

    /// Idempotency key for external side effects of this attempt
    pub fn generated_name(&self) -> &str {
        self.identity.generated_name()
    }

    pub fn retry_attempt(&self) -> u32 {
        self.identity.id().retry_attempt
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn is_interruptible(&self) -> bool {
        self.interruptible
    }

    pub fn overrides(&self) -> &TaskOverrides {
        &self.overrides
    }
}

pub struct TaskExecutionContext {
    metadata: TaskExecutionMetadata,
    state: Mutex<PluginStateHandle>,
    events: BufferedEventRecorder,
    output: OutputWriter,
    resources: ScopedResourceManager,
    secrets: Arc<dyn SecretManager>,
    task_reader: Arc<dyn TaskReader>,
    catalog: Option<AdvisoryCatalog>,
    cancellation: CancellationToken,
}

/// Collaborators a context is assembled from
pub(crate) struct ContextParts {
    pub metadata: TaskExecutionMetadata,
    pub state: PluginStateHandle,
    pub events: BufferedEventRecorder,
    pub output: OutputWriter,
    pub resources: ScopedResourceManager,
    pub secrets: Arc<dyn SecretManager>,
    pub task_reader: Arc<dyn TaskReader>,
    pub catalog: Option<AdvisoryCatalog>,
    pub cancellation: CancellationToken,
}

impl TaskExecutionContext {
    pub(crate) fn assemble(parts: ContextParts) -> Self {
        Self {
            metadata: parts.metadata,
            state: Mutex::new(parts.state),
            events: parts.events,
            output: parts.output,
            resources: parts.resources,
            secrets: parts.secrets,
            task_reader: parts.task_reader,
            catalog: parts.catalog,
            cancellation: parts.cancellation,
        }
    }

    pub fn metadata(&self) -> &TaskExecutionMetadata {
        &self.metadata
    }

    pub fn state_reader(&self) -> PluginStateReader<'_> {
        PluginStateReader { state: &self.state }
    }

    pub fn state_writer(&self) -> PluginStateWriter<'_> {
        PluginStateWriter { state: &self.state }
    }

    pub fn events(&self) -> EventsRecorder<'_> {
        EventsRecorder {
            recorder: &self.events,
        }
    }

    pub fn output_writer(&self) -> &OutputWriter {
        &self.output
    }

    pub fn resource_manager(&self) -> &ScopedResourceManager {
        &self.resources
    }

    pub fn secret_manager(&self) -> &dyn SecretManager {
        self.secrets.as_ref()
    }

    pub async fn read_task(&self) -> Result<TaskTemplate> {
        self.task_reader.read().await
    }

    /// The output cache, when one is configured
    pub fn catalog(&self) -> Option<&AdvisoryCatalog> {
        self.catalog.as_ref()
    }

    /// Whether the pass has been cancelled; long-running plugin steps should
    /// check this between external calls
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub(crate) fn state_phase(&self) -> StatePhase {
        lock(&self.state).phase()
    }

    /// Take back the state handle and event buffer once the plugin returned
    pub(crate) fn into_pass_output(self) -> (PluginStateHandle, BufferedEventRecorder) {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        (state, self.events)
    }
}

fn lock(state: &Mutex<PluginStateHandle>) -> MutexGuard<'_, PluginStateHandle> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read access to the state restored at the start of the pass
pub struct PluginStateReader<'a> {
    state: &'a Mutex<PluginStateHandle>,
}

impl PluginStateReader<'_> {
    /// Raw payload, `None` when no state was found
    pub fn read(&self) -> Option<Vec<u8>> {
        lock(self.state).read().map(<[u8]>::to_vec)
    }

    pub fn state_version(&self) -> u8 {
        lock(self.state).state_version()
    }

    pub fn get<T>(&self) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        lock(self.state).get()
    }
}

/// Write access to the state the next pass will see
pub struct PluginStateWriter<'a> {
    state: &'a Mutex<PluginStateHandle>,
}

impl PluginStateWriter<'_> {
    pub fn write(&self, payload: Vec<u8>) -> Result<()> {
        lock(self.state).write(payload)
    }

    pub fn write_versioned(&self, state_version: u8, payload: Vec<u8>) -> Result<()> {
        lock(self.state).write_versioned(state_version, payload)
    }

    pub fn put<T: Serialize>(&self, state_version: u8, value: &T) -> Result<()> {
        lock(self.state).put(state_version, value)
    }

    pub fn reset(&self) {
        lock(self.state).reset()
    }
}

/// Append-only access to the pass's event buffer
pub struct EventsRecorder<'a> {
    recorder: &'a BufferedEventRecorder,
}

impl EventsRecorder<'_> {
    pub fn record(&self, event: TaskEvent) {
        self.recorder.record(event)
    }

    pub fn diagnostic(&self, message: impl Into<String>) {
        self.recorder.record(TaskEvent::diagnostic(message))
    }

    /// Events recorded so far in this pass
    pub fn len(&self) -> usize {
        self.recorder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorder.is_empty()
    }
}
