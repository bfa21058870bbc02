//! Node fixtures for running passes in tests

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::mocks::{MemoryNodeStateWriter, StaticTaskReader};
use crate::error::{Error, Result};
use crate::events::{EventSink, MemoryEventSink};
use crate::identity::{NodeExecutionId, WorkflowExecutionId};
use crate::node::{
    NodeExecutionContext, NodeExecutionMetadata, NodeStateWriter, OwnerId, TaskNodeState,
};
use crate::storage::{DataRef, DataStore, MemoryDataStore};
use crate::task::{TaskOverrides, TaskReader, TaskTemplate};

/// A node backed entirely by memory.
///
/// Clones share the status record, data store and event sink, so successive
/// passes built with [`InMemoryNodeContext::next_pass`] observe what earlier
/// passes committed.
#[derive(Clone)]
pub struct InMemoryNodeContext {
    metadata: NodeExecutionMetadata,
    retry_attempt: u32,
    data_dir: DataRef,
    overrides: TaskOverrides,
    task_reader: Arc<StaticTaskReader>,
    store: MemoryDataStore,
    sink: Arc<MemoryEventSink>,
    state: Arc<MemoryNodeStateWriter>,
    cancellation: CancellationToken,
}

impl InMemoryNodeContext {
    /// A first-attempt node `node_id` owned by `owner_name`, running `template`.
    ///
    /// # Panics
    ///
    /// If the names are rejected by [`InMemoryNodeContext::try_new`].
    pub fn new(owner_name: &str, node_id: &str, template: TaskTemplate) -> Self {
        match Self::try_new(owner_name, node_id, template) {
            Ok(node) => node,
            Err(err) => panic!("invalid in-memory node {owner_name:?}/{node_id:?}: {err}"),
        }
    }

    /// Like [`InMemoryNodeContext::new`], failing with [`Error::Configuration`]
    /// when either name is empty or is not a single path segment
    pub fn try_new(owner_name: &str, node_id: &str, template: TaskTemplate) -> Result<Self> {
        for name in [owner_name, node_id] {
            if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                return Err(Error::Configuration(format!(
                    "{name:?} is not a valid owner or node name"
                )));
            }
        }

        let execution_id = WorkflowExecutionId {
            project: "project".to_string(),
            domain: "development".to_string(),
            name: owner_name.to_string(),
        };
        let metadata = NodeExecutionMetadata {
            owner: OwnerId {
                namespace: "project-development".to_string(),
                name: owner_name.to_string(),
            },
            node_execution_id: NodeExecutionId {
                node_id: node_id.to_string(),
                execution_id,
            },
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            interruptible: false,
        };
        let data_dir = DataRef::new(format!("mem://{owner_name}/{node_id}"))?;

        Ok(Self {
            metadata,
            retry_attempt: 0,
            data_dir,
            overrides: TaskOverrides::default(),
            task_reader: Arc::new(StaticTaskReader::new(template)),
            store: MemoryDataStore::new(),
            sink: Arc::new(MemoryEventSink::new()),
            state: Arc::new(MemoryNodeStateWriter::default()),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn with_retry_attempt(mut self, retry_attempt: u32) -> Self {
        self.retry_attempt = retry_attempt;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_overrides(mut self, overrides: TaskOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_data_store(mut self, store: MemoryDataStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_state(self, state: TaskNodeState) -> Self {
        Self {
            state: Arc::new(MemoryNodeStateWriter::new(state)),
            ..self
        }
    }

    /// The same node for a later pass, with a fresh cancellation token
    pub fn next_pass(&self) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            ..self.clone()
        }
    }

    pub fn store(&self) -> &MemoryDataStore {
        &self.store
    }

    pub fn sink(&self) -> &MemoryEventSink {
        &self.sink
    }

    pub fn state_writer(&self) -> &MemoryNodeStateWriter {
        &self.state
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }
}

impl NodeExecutionContext for InMemoryNodeContext {
    fn node_id(&self) -> &str {
        &self.metadata.node_execution_id.node_id
    }

    fn metadata(&self) -> &NodeExecutionMetadata {
        &self.metadata
    }

    fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    fn data_dir(&self) -> &DataRef {
        &self.data_dir
    }

    fn task_node_state(&self) -> TaskNodeState {
        self.state.current()
    }

    fn overrides(&self) -> &TaskOverrides {
        &self.overrides
    }

    fn task_reader(&self) -> Arc<dyn TaskReader> {
        self.task_reader.clone()
    }

    fn data_store(&self) -> Arc<dyn DataStore> {
        Arc::new(self.store.clone())
    }

    fn event_sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    fn node_state_writer(&self) -> Arc<dyn NodeStateWriter> {
        self.state.clone()
    }

    fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}
