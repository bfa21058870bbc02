//! The controller's view of a node, as handed to the task handler

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::EventSink;
use crate::identity::NodeExecutionId;
use crate::plugin::TaskPhase;
use crate::state::PersistedState;
use crate::storage::{DataRef, DataStore};
use crate::task::{TaskOverrides, TaskReader};

/// Owner of a node execution, usually the workflow execution object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct OwnerId {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecutionMetadata {
    pub owner: OwnerId,
    pub node_execution_id: NodeExecutionId,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub interruptible: bool,
}

/// Task-specific part of the node's status record
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskNodeState {
    pub phase: TaskPhase,
    pub phase_version: u32,
    pub plugin_state: Vec<u8>,
    pub plugin_state_version: u32,
}

impl TaskNodeState {
    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            version: self.plugin_state_version,
            bytes: self.plugin_state.clone(),
        }
    }

    pub fn with_plugin_state(mut self, state: PersistedState) -> Self {
        self.plugin_state_version = state.version;
        self.plugin_state = state.bytes;
        self
    }
}

/// Replaces the task node state as a whole
#[async_trait]
pub trait NodeStateWriter: Send + Sync {
    async fn put_task_node_state(&self, state: TaskNodeState) -> Result<()>;
}

/// The controller's work queue for owners.
///
/// Enqueuing asks the controller to run another pass over the owner's nodes
/// soon, without waiting for the next resync.
pub trait OwnerQueue: Send + Sync {
    fn enqueue_owner(&self, owner: &OwnerId) -> Result<()>;
}

/// Everything the runtime may read about a node during one pass.
///
/// Implemented by the surrounding controller. Plugins never see this; they
/// get a [`crate::context::TaskExecutionContext`] instead.
pub trait NodeExecutionContext: Send + Sync {
    fn node_id(&self) -> &str;
    fn metadata(&self) -> &NodeExecutionMetadata;
    fn retry_attempt(&self) -> u32;
    /// Durable prefix owned by this node
    fn data_dir(&self) -> &DataRef;
    fn task_node_state(&self) -> TaskNodeState;
    fn overrides(&self) -> &TaskOverrides;
    fn task_reader(&self) -> Arc<dyn TaskReader>;
    fn data_store(&self) -> Arc<dyn DataStore>;
    fn event_sink(&self) -> Arc<dyn EventSink>;
    fn node_state_writer(&self) -> Arc<dyn NodeStateWriter>;
    /// Cancelled when the node is aborted or the pass deadline passes
    fn cancellation(&self) -> CancellationToken;
}
