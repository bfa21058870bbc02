//! Reconciliation entry point for task nodes
//!
//! [`TaskHandler::handle`] runs exactly one pass for one node: it assembles a
//! [`TaskExecutionContext`], invokes the plugin selected by the task type,
//! and commits what the plugin produced. State is always committed before
//! events are flushed, so after a crash between the two the recovered state
//! is at least as advanced as anything an observer saw.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::catalog::{AdvisoryCatalog, CatalogClient};
use crate::config::{RuntimeConfig, StateConfig};
use crate::context::{ContextParts, TaskExecutionContext, TaskExecutionMetadata};
use crate::error::{Error, Result};
use crate::events::{BufferedEventRecorder, TaskEvent};
use crate::identity::{TaskExecutionId, TaskExecutionIdentity};
use crate::node::{NodeExecutionContext, OwnerQueue, TaskNodeState};
use crate::output::OutputWriter;
use crate::plugin::{PhaseInfo, Plugin, PluginError, PluginRegistry, SetupContext};
use crate::resources::{NoopResourceManager, ResourceManager, ScopedResourceManager};
use crate::secrets::{FileEnvSecretManager, SecretManager};
use crate::state::{MigrationRegistry, PersistedState, PluginStateHandle, PluginStateStore};
use crate::task::TaskTemplate;

/// What one committed pass produced
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub phase: PhaseInfo,
    pub generated_name: String,
    /// Plugin state as written to the node's status record
    pub state: PersistedState,
    pub phase_changed: bool,
    pub events_flushed: usize,
}

pub struct TaskHandler {
    registry: PluginRegistry,
    state_config: StateConfig,
    state_store: PluginStateStore,
    resources: Arc<dyn ResourceManager>,
    secrets: Arc<dyn SecretManager>,
    catalog: Option<AdvisoryCatalog>,
    id_max_length: usize,
    set_up: Mutex<HashSet<String>>,
}

impl TaskHandler {
    /// A handler with no migrations, no catalog and unlimited resources
    pub fn new(config: &RuntimeConfig, registry: PluginRegistry) -> Self {
        Self {
            registry,
            state_config: config.state.clone(),
            state_store: PluginStateStore::new(&config.state, MigrationRegistry::new()),
            resources: Arc::new(NoopResourceManager),
            secrets: Arc::new(FileEnvSecretManager::new(&config.secrets)),
            catalog: None,
            id_max_length: config.id_max_length,
            set_up: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.state_store = PluginStateStore::new(&self.state_config, migrations);
        self
    }

    pub fn with_resource_manager(mut self, resources: Arc<dyn ResourceManager>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_secret_manager(mut self, secrets: Arc<dyn SecretManager>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_catalog(mut self, client: Arc<dyn CatalogClient>) -> Self {
        self.catalog = Some(AdvisoryCatalog::new(client));
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Run [`Plugin::setup`] for every registered plugin not yet set up.
    ///
    /// The controller calls this once before the first pass. Plugins whose
    /// setup failed are retried on the next call; the others are not called
    /// again.
    pub async fn setup(&self, owner_queue: Arc<dyn OwnerQueue>) -> Result<()> {
        let mut set_up = self.set_up.lock().await;
        for plugin in self.registry.plugins() {
            if set_up.contains(plugin.id()) {
                continue;
            }
            let setup = SetupContext::new(plugin.id(), owner_queue.clone());
            if let Err(err) = plugin.setup(&setup).await {
                warn!("Setup of plugin {} failed: {}", plugin.id(), err);
                return Err(Error::Plugin(err));
            }
            info!("Plugin {} set up", plugin.id());
            set_up.insert(plugin.id().to_string());
        }
        Ok(())
    }

    /// Assemble the context `plugin` sees for one pass over `node`.
    ///
    /// Nothing is persisted here; a failure leaves the node exactly as it was.
    pub fn new_task_execution_context(
        &self,
        node: &dyn NodeExecutionContext,
        plugin: &dyn Plugin,
        task: &TaskTemplate,
    ) -> Result<TaskExecutionContext> {
        let node_id = node.node_id();
        let node_meta = node.metadata();

        let id = TaskExecutionId {
            task_id: task.id.clone(),
            node_execution_id: node_meta.node_execution_id.clone(),
            retry_attempt: node.retry_attempt(),
        };
        let identity = TaskExecutionIdentity::derive(&node_meta.owner.name, id, self.id_max_length)?;

        let output = OutputWriter::resolve(node.data_store(), node.data_dir(), node.retry_attempt())
            .map_err(|e| Error::runtime_execution(node_id, "unable to resolve output locations", e))?;

        let prior = node.task_node_state().persisted_state();
        let state = self
            .state_store
            .restore(prior.version, &prior.bytes)
            .map_err(|e| {
                Error::runtime_execution(node_id, "unable to initialize plugin state manager", e)
            })?;

        let events = BufferedEventRecorder::for_execution(identity.generated_name());

        let metadata = TaskExecutionMetadata {
            owner: node_meta.owner.clone(),
            identity,
            labels: node_meta.labels.clone(),
            annotations: node_meta.annotations.clone(),
            interruptible: node_meta.interruptible || task.interruptible,
            overrides: node.overrides().clone(),
        };

        debug!(
            "Assembled task execution context {} for node {} ({:?} state)",
            metadata.generated_name(),
            node_id,
            state.phase()
        );

        Ok(TaskExecutionContext::assemble(ContextParts {
            metadata,
            state,
            events,
            output,
            resources: ScopedResourceManager::new(self.resources.clone(), plugin.id()),
            secrets: self.secrets.clone(),
            task_reader: node.task_reader(),
            catalog: self.catalog.clone(),
            cancellation: node.cancellation(),
        }))
    }

    /// Run one reconciliation pass over `node`
    pub async fn handle(&self, node: &dyn NodeExecutionContext) -> Result<PassOutcome> {
        let task = node.task_reader().read().await?;
        let plugin = self.registry.resolve(&task.task_type)?;
        let tctx = self.new_task_execution_context(node, plugin.as_ref(), &task)?;

        let span = info_span!(
            "node_pass",
            node_id = node.node_id(),
            generated_name = tctx.metadata().generated_name()
        );
        self.run_pass(node, plugin.as_ref(), tctx).instrument(span).await
    }

    async fn run_pass(
        &self,
        node: &dyn NodeExecutionContext,
        plugin: &dyn Plugin,
        tctx: TaskExecutionContext,
    ) -> Result<PassOutcome> {
        let cancellation = node.cancellation();
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                info!("Pass cancelled before completion, discarding {} events", tctx.events().len());
                return Err(Error::Cancelled(node.node_id().to_string()));
            }
            result = plugin.handle(&tctx) => result,
        };

        let phase = match result {
            Ok(phase) => phase,
            Err(err) if err.is_retryable() => {
                warn!(
                    "Plugin {} failed with retryable error, nothing persisted: {}",
                    plugin.id(),
                    err
                );
                return Err(Error::Plugin(err));
            }
            Err(err) => {
                warn!("Plugin {} failed permanently: {}", plugin.id(), err);
                permanent_failure_phase(&err)
            }
        };

        debug!("Plugin returned {} with state {:?}", phase.phase, tctx.state_phase());
        let generated_name = tctx.metadata().generated_name().to_string();
        let (state, events) = tctx.into_pass_output();
        self.commit(node, generated_name, phase, state, events).await
    }

    async fn commit(
        &self,
        node: &dyn NodeExecutionContext,
        generated_name: String,
        phase: PhaseInfo,
        mut state: PluginStateHandle,
        events: BufferedEventRecorder,
    ) -> Result<PassOutcome> {
        let previous = node.task_node_state();
        let phase_changed =
            previous.phase != phase.phase || previous.phase_version != phase.version;
        if phase_changed {
            info!(
                "Task phase {} (version {}) -> {} (version {})",
                previous.phase, previous.phase_version, phase.phase, phase.version
            );
            events.record(TaskEvent::phase_changed(
                phase.phase,
                phase.version,
                phase.reason.clone(),
            ));
        }

        let persisted = state.persist();
        let record = TaskNodeState {
            phase: phase.phase,
            phase_version: phase.version,
            ..TaskNodeState::default()
        }
        .with_plugin_state(persisted.clone());
        node.node_state_writer().put_task_node_state(record).await?;

        let sink = node.event_sink();
        let events_flushed = events.flush(sink.as_ref()).await?;

        Ok(PassOutcome {
            generated_name,
            phase,
            state: persisted,
            phase_changed,
            events_flushed,
        })
    }

    /// Ask the plugin to stop external work for `node`.
    ///
    /// Plugin state is left untouched; events recorded by the plugin are flushed.
    pub async fn abort(&self, node: &dyn NodeExecutionContext) -> Result<()> {
        self.run_hook(node, LifecycleHook::Abort).await
    }

    /// Let the plugin release anything held for `node` after its last pass
    pub async fn finalize(&self, node: &dyn NodeExecutionContext) -> Result<()> {
        self.run_hook(node, LifecycleHook::Finalize).await
    }

    async fn run_hook(&self, node: &dyn NodeExecutionContext, hook: LifecycleHook) -> Result<()> {
        let task = node.task_reader().read().await?;
        let plugin = self.registry.resolve(&task.task_type)?;
        let tctx = self.new_task_execution_context(node, plugin.as_ref(), &task)?;
        info!("Running {} for {}", hook, tctx.metadata().generated_name());

        match hook {
            LifecycleHook::Abort => plugin.abort(&tctx).await?,
            LifecycleHook::Finalize => plugin.finalize(&tctx).await?,
        }

        let (_, events) = tctx.into_pass_output();
        let sink = node.event_sink();
        events.flush(sink.as_ref()).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum LifecycleHook {
    Abort,
    Finalize,
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleHook::Abort => write!(f, "abort"),
            LifecycleHook::Finalize => write!(f, "finalize"),
        }
    }
}

fn permanent_failure_phase(err: &PluginError) -> PhaseInfo {
    PhaseInfo::permanent_failure(err.code(), err.to_string())
}
