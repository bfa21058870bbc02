//! One-time plugin setup

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::node::{OwnerId, OwnerQueue};

/// Handed to every plugin once, before its first pass.
///
/// Plugins that watch external systems keep a clone and call
/// [`SetupContext::enqueue_owner`] when something they poll changes.
#[derive(Clone)]
pub struct SetupContext {
    plugin_id: String,
    owner_queue: Arc<dyn OwnerQueue>,
}

impl SetupContext {
    pub fn new(plugin_id: impl Into<String>, owner_queue: Arc<dyn OwnerQueue>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            owner_queue,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Ask the controller to reconcile `owner` again
    pub fn enqueue_owner(&self, owner: &OwnerId) -> Result<()> {
        debug!(
            "Plugin {} enqueued owner {}/{}",
            self.plugin_id, owner.namespace, owner.name
        );
        self.owner_queue.enqueue_owner(owner)
    }
}

impl fmt::Debug for SetupContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupContext")
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}
