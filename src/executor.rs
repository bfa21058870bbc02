//! Bounded execution of passes across many nodes
//!
//! At most `workers` passes run at once, passes for the same node never
//! overlap, and each pass is cut off after `pass_timeout`.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::handler::{PassOutcome, TaskHandler};
use crate::node::NodeExecutionContext;

pub struct PassExecutor {
    handler: Arc<TaskHandler>,
    semaphore: Arc<Semaphore>,
    node_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    pass_timeout: Duration,
}

impl PassExecutor {
    pub fn new(config: &RuntimeConfig, handler: Arc<TaskHandler>) -> Self {
        Self {
            handler,
            semaphore: Arc::new(Semaphore::new(config.workers)),
            node_locks: Mutex::new(HashMap::new()),
            pass_timeout: config.pass_timeout,
        }
    }

    /// Run one pass for `node`, waiting for any running pass of the same node
    pub async fn run(&self, node: &dyn NodeExecutionContext) -> Result<PassOutcome> {
        let node_id = node.node_id().to_string();
        let node_lock = self.node_lock(&node_id);

        let result = self.run_locked(node, &node_id, &node_lock).await;
        self.release_node_lock(&node_id, node_lock);
        result
    }

    async fn run_locked(
        &self,
        node: &dyn NodeExecutionContext,
        node_id: &str,
        node_lock: &AsyncMutex<()>,
    ) -> Result<PassOutcome> {
        let _node_guard = node_lock.lock().await;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Cancelled(node_id.to_string()))?;
        debug!(
            "Starting pass for {} ({} workers free)",
            node_id,
            self.semaphore.available_permits()
        );

        match tokio::time::timeout(self.pass_timeout, self.handler.handle(node)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Pass for {} timed out after {:?}", node_id, self.pass_timeout);
                node.cancellation().cancel();
                Err(Error::Cancelled(node_id.to_string()))
            }
        }
    }

    /// Run one pass for each node, returning results in input order
    pub async fn run_all(&self, nodes: &[&dyn NodeExecutionContext]) -> Vec<Result<PassOutcome>> {
        join_all(nodes.iter().map(|node| self.run(*node))).await
    }

    /// Stop admitting passes; passes waiting for a worker fail with `Cancelled`
    pub fn shutdown(&self) {
        self.semaphore.close();
    }

    fn node_lock(&self, node_id: &str) -> Arc<AsyncMutex<()>> {
        self.node_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(node_id.to_string())
            .or_default()
            .clone()
    }

    // Drop the entry once no other pass for the node holds or awaits it.
    fn release_node_lock(&self, node_id: &str, node_lock: Arc<AsyncMutex<()>>) {
        let mut locks = self
            .node_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(node_lock);
        if locks
            .get(node_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(node_id);
        }
    }

    pub fn tracked_nodes(&self) -> usize {
        self.node_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
