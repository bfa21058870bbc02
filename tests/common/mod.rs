//! Common test plugins and helpers
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskexec::config::{RuntimeConfig, StateConfig};
use taskexec::node::TaskNodeState;
use taskexec::plugin::{PhaseInfo, Plugin, PluginError, PluginRegistry};
use taskexec::state::{MigrationRegistry, PluginStateStore};
use taskexec::task::TaskTemplate;
use taskexec::{TaskExecutionContext, TaskHandler};

/// Advances `(none) -> step1 -> step2 -> success`, one step per pass
#[derive(Default)]
pub struct StepPlugin {
    observed: Mutex<Vec<Option<Vec<u8>>>>,
    names: Mutex<Vec<String>>,
    pub aborts: AtomicUsize,
    pub finalizes: AtomicUsize,
}

impl StepPlugin {
    /// State each pass saw at its start
    pub fn observed(&self) -> Vec<Option<Vec<u8>>> {
        self.observed.lock().unwrap().clone()
    }

    /// Generated names each pass ran under
    pub fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

#[async_trait]
impl Plugin for StepPlugin {
    fn id(&self) -> &str {
        "step"
    }

    fn task_types(&self) -> Vec<String> {
        vec!["step".to_string()]
    }

    async fn handle(&self, tctx: &TaskExecutionContext) -> Result<PhaseInfo, PluginError> {
        let seen = tctx.state_reader().read();
        self.observed.lock().unwrap().push(seen.clone());
        self.names
            .lock()
            .unwrap()
            .push(tctx.metadata().generated_name().to_string());

        match seen.as_deref() {
            None => {
                tctx.state_writer().write(b"step1".to_vec())?;
                tctx.events().diagnostic("submitted step1");
                Ok(PhaseInfo::running(1))
            }
            Some(b"step1") => {
                tctx.state_writer().write(b"step2".to_vec())?;
                tctx.events().diagnostic("submitted step2");
                Ok(PhaseInfo::running(2))
            }
            Some(_) => Ok(PhaseInfo::success()),
        }
    }

    async fn abort(&self, tctx: &TaskExecutionContext) -> Result<(), PluginError> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        tctx.events().diagnostic("aborted");
        Ok(())
    }

    async fn finalize(&self, _tctx: &TaskExecutionContext) -> Result<(), PluginError> {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Script {
    RetryableError,
    PermanentError,
    Hang,
    Sleep(Duration),
}

/// Writes state and records an event, then behaves as scripted
pub struct ScriptedPlugin {
    script: Script,
    pub calls: AtomicUsize,
    running: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl ScriptedPlugin {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn id(&self) -> &str {
        "scripted"
    }

    fn task_types(&self) -> Vec<String> {
        vec!["scripted".to_string()]
    }

    async fn handle(&self, tctx: &TaskExecutionContext) -> Result<PhaseInfo, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tctx.state_writer().write(b"attempted".to_vec())?;
        tctx.events().diagnostic("attempting");

        match self.script {
            Script::RetryableError => Err(PluginError::retryable(
                "Throttled",
                anyhow::anyhow!("backend throttled the request"),
            )),
            Script::PermanentError => Err(PluginError::permanent(
                "BadSpec",
                anyhow::anyhow!("image does not exist"),
            )),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(PhaseInfo::success())
            }
            Script::Sleep(duration) => {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(duration).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(PhaseInfo::success())
            }
        }
    }
}

pub fn step_template() -> TaskTemplate {
    TaskTemplate::new("task-step", "step")
}

pub fn scripted_template() -> TaskTemplate {
    TaskTemplate::new("task-scripted", "scripted")
}

pub fn registry(plugins: Vec<Arc<dyn Plugin>>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for plugin in plugins {
        registry.register(plugin).unwrap();
    }
    registry
}

pub fn handler(plugins: Vec<Arc<dyn Plugin>>) -> TaskHandler {
    TaskHandler::new(&RuntimeConfig::default(), registry(plugins))
}

pub fn handler_for(plugin: Arc<dyn Plugin>) -> TaskHandler {
    handler(vec![plugin])
}

/// Payload of the plugin state held in a node's status record
pub fn stored_payload(state: &TaskNodeState) -> Option<Vec<u8>> {
    let store = PluginStateStore::new(&StateConfig::default(), MigrationRegistry::new());
    let persisted = state.persisted_state();
    store
        .restore(persisted.version, &persisted.bytes)
        .unwrap()
        .read()
        .map(<[u8]>::to_vec)
}
