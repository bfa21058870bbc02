//! End-to-end reconciliation passes over in-memory nodes

mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{
    handler_for, scripted_template, step_template, stored_payload, Script, ScriptedPlugin,
    StepPlugin,
};
use taskexec::catalog::{CatalogEntry, CatalogKey, CatalogLookup};
use taskexec::config::RuntimeConfig;
use taskexec::events::TaskEventKind;
use taskexec::node::{NodeExecutionContext, TaskNodeState};
use taskexec::plugin::{PhaseInfo, Plugin, PluginError, PluginRegistry, TaskPhase};
use taskexec::resources::{AllocationStatus, QuotaResourceManager};
use taskexec::state::{MigrationRegistry, PersistedState, StateFrame, CURRENT_CODEC_VERSION};
use taskexec::task::TaskOverrides;
use taskexec::testing::{InMemoryNodeContext, MemoryCatalog, StaticSecretManager};
use taskexec::{Error, TaskExecutionContext, TaskHandler};

#[tokio::test]
async fn test_first_pass_persists_step1() {
    let plugin = Arc::new(StepPlugin::default());
    let handler = handler_for(plugin.clone());
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());

    let outcome = handler.handle(&node).await.unwrap();

    assert_eq!(plugin.observed(), vec![None]);
    assert_eq!(outcome.phase.phase, TaskPhase::Running);
    assert!(outcome.phase_changed);
    assert_eq!(outcome.state.version, CURRENT_CODEC_VERSION);

    let record = node.state_writer().current();
    assert_eq!(record.phase, TaskPhase::Running);
    assert_eq!(record.phase_version, 1);
    assert_eq!(stored_payload(&record), Some(b"step1".to_vec()));
}

#[tokio::test]
async fn test_second_pass_resumes_from_step1() {
    let plugin = Arc::new(StepPlugin::default());
    let handler = handler_for(plugin.clone());
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());

    handler.handle(&node).await.unwrap();
    handler.handle(&node.next_pass()).await.unwrap();

    assert_eq!(plugin.observed(), vec![None, Some(b"step1".to_vec())]);
    assert_eq!(
        stored_payload(&node.state_writer().current()),
        Some(b"step2".to_vec())
    );
}

#[tokio::test]
async fn test_passes_of_one_attempt_share_generated_name() {
    let plugin = Arc::new(StepPlugin::default());
    let handler = handler_for(plugin.clone());
    let owner = "a".repeat(60);
    let node = InMemoryNodeContext::new(&owner, "n1", step_template()).with_retry_attempt(2);

    let first = handler.handle(&node).await.unwrap();
    let second = handler.handle(&node.next_pass()).await.unwrap();

    assert!(first.generated_name.len() <= 50);
    assert_eq!(first.generated_name, second.generated_name);
    assert_eq!(plugin.names(), vec![first.generated_name.clone(); 2]);

    // Every flushed event carries the idempotency key of the attempt.
    let events = node.sink().events();
    assert!(!events.is_empty());
    assert!(events
        .iter()
        .all(|e| e.execution_name.as_deref() == Some(first.generated_name.as_str())));
}

#[tokio::test]
async fn test_events_flushed_in_order_after_state() {
    let plugin = Arc::new(StepPlugin::default());
    let handler = handler_for(plugin);
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());

    let outcome = handler.handle(&node).await.unwrap();

    let events = node.sink().events();
    assert_eq!(outcome.events_flushed, 2);
    assert_eq!(node.sink().batch_count(), 1);
    assert!(matches!(
        &events[0].kind,
        TaskEventKind::Diagnostic { message } if message == "submitted step1"
    ));
    assert!(matches!(
        events[1].kind,
        TaskEventKind::PhaseChanged {
            phase: TaskPhase::Running,
            phase_version: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unchanged_phase_records_no_phase_event() {
    struct Steady;

    #[async_trait]
    impl Plugin for Steady {
        fn id(&self) -> &str {
            "steady"
        }
        fn task_types(&self) -> Vec<String> {
            vec!["step".to_string()]
        }
        async fn handle(&self, _tctx: &TaskExecutionContext) -> Result<PhaseInfo, PluginError> {
            Ok(PhaseInfo::running(1))
        }
    }

    let handler = handler_for(Arc::new(Steady));
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());

    assert!(handler.handle(&node).await.unwrap().phase_changed);
    let second = handler.handle(&node.next_pass()).await.unwrap();
    assert!(!second.phase_changed);
    assert_eq!(second.events_flushed, 0);
    assert_eq!(node.sink().events().len(), 1);
}

#[tokio::test]
async fn test_cancelled_pass_persists_nothing() {
    let plugin = Arc::new(ScriptedPlugin::new(Script::Hang));
    let handler = handler_for(plugin.clone());
    let node = InMemoryNodeContext::new("wfA", "n1", scripted_template());

    let canceller = node.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = handler.handle(&node).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled(ref id) if id == "n1"));
    assert!(err.is_retryable());
    assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
    assert_eq!(node.state_writer().put_count(), 0);
    assert!(node.sink().events().is_empty());
    assert_eq!(node.state_writer().current(), TaskNodeState::default());
}

#[tokio::test]
async fn test_cancellation_keeps_previously_persisted_state() {
    let step = Arc::new(StepPlugin::default());
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());
    handler_for(step).handle(&node).await.unwrap();
    let before = node.state_writer().current();

    // Cancelled before the plugin gets to run.
    let next = node.next_pass();
    next.cancel();
    let step = Arc::new(StepPlugin::default());
    let err = handler_for(step.clone()).handle(&next).await.unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)));
    assert!(step.observed().is_empty());
    assert_eq!(node.state_writer().current(), before);
}

#[tokio::test]
async fn test_retryable_plugin_error_discards_pass() {
    let plugin = Arc::new(ScriptedPlugin::new(Script::RetryableError));
    let handler = handler_for(plugin);
    let node = InMemoryNodeContext::new("wfA", "n1", scripted_template());

    let err = handler.handle(&node).await.unwrap_err();

    assert!(matches!(err, Error::Plugin(_)));
    assert!(err.is_retryable());
    assert_eq!(node.state_writer().put_count(), 0);
    assert!(node.sink().events().is_empty());
}

#[tokio::test]
async fn test_permanent_plugin_error_commits_progress() {
    let plugin = Arc::new(ScriptedPlugin::new(Script::PermanentError));
    let handler = handler_for(plugin);
    let node = InMemoryNodeContext::new("wfA", "n1", scripted_template());

    let outcome = handler.handle(&node).await.unwrap();

    assert_eq!(outcome.phase.phase, TaskPhase::PermanentFailure);
    let error = outcome.phase.error.as_ref().unwrap();
    assert_eq!(error.code, "BadSpec");
    assert!(!error.retryable);

    let record = node.state_writer().current();
    assert_eq!(record.phase, TaskPhase::PermanentFailure);
    assert_eq!(stored_payload(&record), Some(b"attempted".to_vec()));
    assert_eq!(node.sink().events().len(), 2);
}

#[tokio::test]
async fn test_flush_failure_after_persist_is_retryable() {
    let handler = handler_for(Arc::new(StepPlugin::default()));
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());
    node.sink().set_failing(true);

    let err = handler.handle(&node).await.unwrap_err();

    assert!(matches!(err, Error::EventFlush(_)));
    assert!(err.is_retryable());
    // State was committed before the flush was attempted.
    assert_eq!(node.state_writer().put_count(), 1);
    assert_eq!(
        stored_payload(&node.state_writer().current()),
        Some(b"step1".to_vec())
    );
}

#[tokio::test]
async fn test_state_commit_failure_flushes_nothing() {
    let handler = handler_for(Arc::new(StepPlugin::default()));
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());
    node.state_writer().set_failing(true);

    let err = handler.handle(&node).await.unwrap_err();

    assert!(matches!(err, Error::StorageUnavailable(_)));
    assert!(node.sink().events().is_empty());
}

#[tokio::test]
async fn test_corrupted_state_fails_assembly() {
    let plugin = Arc::new(StepPlugin::default());
    let handler = handler_for(plugin.clone());
    let node = InMemoryNodeContext::new("wfA", "n1", step_template()).with_state(
        TaskNodeState::default().with_plugin_state(PersistedState {
            version: CURRENT_CODEC_VERSION,
            bytes: b"not a frame".to_vec(),
        }),
    );

    let err = handler.handle(&node).await.unwrap_err();

    match &err {
        Error::RuntimeExecution { node_id, source, .. } => {
            assert_eq!(node_id, "n1");
            assert!(matches!(**source, Error::StateCorrupted(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("unable to initialize plugin state manager"));
    assert!(plugin.observed().is_empty());
    assert_eq!(node.state_writer().put_count(), 0);
}

#[tokio::test]
async fn test_unmigrated_version_is_fatal() {
    let handler = handler_for(Arc::new(StepPlugin::default()));
    let node = InMemoryNodeContext::new("wfA", "n1", step_template()).with_state(
        TaskNodeState::default().with_plugin_state(PersistedState {
            version: 0,
            bytes: b"legacy".to_vec(),
        }),
    );

    let err = handler.handle(&node).await.unwrap_err();

    assert!(matches!(
        err,
        Error::RuntimeExecution { ref source, .. }
            if matches!(**source, Error::StateVersionMismatch { found: 0, .. })
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_registered_migration_restores_legacy_state() {
    let plugin = Arc::new(StepPlugin::default());
    let mut migrations = MigrationRegistry::new();
    migrations
        .register(0, CURRENT_CODEC_VERSION, |legacy| {
            Ok(StateFrame::new(0, legacy.to_vec()).encode())
        })
        .unwrap();
    let handler = handler_for(plugin.clone()).with_migrations(migrations);
    let node = InMemoryNodeContext::new("wfA", "n1", step_template()).with_state(
        TaskNodeState::default().with_plugin_state(PersistedState {
            version: 0,
            bytes: b"step1".to_vec(),
        }),
    );

    handler.handle(&node).await.unwrap();

    assert_eq!(plugin.observed(), vec![Some(b"step1".to_vec())]);
    let record = node.state_writer().current();
    assert_eq!(record.plugin_state_version, CURRENT_CODEC_VERSION);
    assert_eq!(stored_payload(&record), Some(b"step2".to_vec()));
}

#[tokio::test]
async fn test_unknown_task_type_uses_default_plugin() {
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());

    let handler = TaskHandler::new(&RuntimeConfig::default(), PluginRegistry::new());
    assert!(matches!(
        handler.handle(&node).await,
        Err(Error::PluginNotFound(ref t)) if t == "step"
    ));

    let fallback = Arc::new(StepPlugin::default());
    let mut registry = PluginRegistry::new();
    registry.set_default(fallback.clone());
    let handler = TaskHandler::new(&RuntimeConfig::default(), registry);
    handler.handle(&node).await.unwrap();
    assert_eq!(fallback.observed().len(), 1);
}

/// Exposes what the context offers to the plugin through its phase reason
struct Inspector;

#[async_trait]
impl Plugin for Inspector {
    fn id(&self) -> &str {
        "inspector"
    }

    fn task_types(&self) -> Vec<String> {
        vec!["inspect".to_string()]
    }

    async fn handle(&self, tctx: &TaskExecutionContext) -> Result<PhaseInfo, PluginError> {
        let metadata = tctx.metadata();
        let task = tctx.read_task().await?;
        let token = tctx.secret_manager().get("registry/token").await?;
        let missing = tctx.secret_manager().get("registry/other").await.is_err();

        let outputs = tctx
            .output_writer()
            .write_outputs(&json!({"token_len": token.len()}))
            .await?;

        let report = json!({
            "namespace": metadata.namespace(),
            "owner": metadata.owner().name,
            "attempt": metadata.retry_attempt(),
            "team": metadata.labels().get("team"),
            "cpu": metadata.overrides().resources.requests.get("cpu"),
            "interruptible": metadata.is_interruptible(),
            "task": task.id,
            "missing_secret": missing,
            "outputs": outputs.as_str(),
            "cancelled": tctx.is_cancelled(),
        });
        Ok(PhaseInfo::success().with_reason(report.to_string()))
    }
}

#[tokio::test]
async fn test_context_exposes_scoped_capabilities() {
    let handler = handler_for(Arc::new(Inspector))
        .with_secret_manager(Arc::new(
            StaticSecretManager::new().with_secret("registry/token", "s3cr3t"),
        ));
    let mut template = taskexec::task::TaskTemplate::new("task-inspect", "inspect");
    template.interruptible = true;
    let node = InMemoryNodeContext::new("wfA", "n1", template)
        .with_retry_attempt(1)
        .with_label("team", "data")
        .with_overrides(TaskOverrides::default().with_request("cpu", "500m"));

    let outcome = handler.handle(&node).await.unwrap();
    let report: serde_json::Value =
        serde_json::from_str(outcome.phase.reason.as_deref().unwrap()).unwrap();

    assert_eq!(report["namespace"], "project-development");
    assert_eq!(report["owner"], "wfA");
    assert_eq!(report["attempt"], 1);
    assert_eq!(report["team"], "data");
    assert_eq!(report["cpu"], "500m");
    assert_eq!(report["interruptible"], true);
    assert_eq!(report["task"], "task-inspect");
    assert_eq!(report["missing_secret"], true);
    assert_eq!(report["outputs"], "mem://wfA/n1/1/outputs.json");
    assert_eq!(report["cancelled"], false);
    assert_eq!(node.store().write_count(), 1);
}

/// Holds one quota slot per node, waiting when none is free
struct QuotaUser;

#[async_trait]
impl Plugin for QuotaUser {
    fn id(&self) -> &str {
        "quota-user"
    }

    fn task_types(&self) -> Vec<String> {
        vec!["quota".to_string()]
    }

    async fn handle(&self, tctx: &TaskExecutionContext) -> Result<PhaseInfo, PluginError> {
        let token = tctx.metadata().generated_name();
        match tctx.resource_manager().allocate("slots", token).await? {
            AllocationStatus::Granted => Ok(PhaseInfo::running(0)),
            AllocationStatus::ExhaustedQuota => {
                Ok(PhaseInfo::waiting_for_resources("quota exhausted"))
            }
        }
    }
}

#[tokio::test]
async fn test_resource_quota_is_scoped_per_plugin() {
    let quota = Arc::new(QuotaResourceManager::new().with_quota("quota-user:slots", 1));
    let handler = handler_for(Arc::new(QuotaUser)).with_resource_manager(quota.clone());
    let template = taskexec::task::TaskTemplate::new("task-quota", "quota");
    let first = InMemoryNodeContext::new("wfA", "n1", template.clone());
    let second = InMemoryNodeContext::new("wfA", "n2", template);

    assert_eq!(
        handler.handle(&first).await.unwrap().phase.phase,
        TaskPhase::Running
    );
    assert_eq!(
        handler.handle(&second).await.unwrap().phase.phase,
        TaskPhase::WaitingForResources
    );
    // A repeated pass for the first node re-allocates its own token.
    assert_eq!(
        handler.handle(&first.next_pass()).await.unwrap().phase.phase,
        TaskPhase::Running
    );
    assert_eq!(quota.held("quota-user:slots").await, 1);
}

/// Consults the catalog before doing any work
struct Memoized;

#[async_trait]
impl Plugin for Memoized {
    fn id(&self) -> &str {
        "memoized"
    }

    fn task_types(&self) -> Vec<String> {
        vec!["cached".to_string()]
    }

    async fn handle(&self, tctx: &TaskExecutionContext) -> Result<PhaseInfo, PluginError> {
        let task = tctx.read_task().await?;
        let (Some(catalog), Some(key)) = (tctx.catalog(), CatalogKey::for_task(&task, &json!({})))
        else {
            return Ok(PhaseInfo::permanent_failure("NoCatalog", "catalog not configured"));
        };

        match catalog.lookup(&key).await {
            CatalogLookup::Hit(_) => Ok(PhaseInfo::success().with_reason("cache hit")),
            CatalogLookup::Miss => {
                let outputs = tctx.output_writer().write_outputs(&json!({"v": 1})).await?;
                catalog.record(&key, CatalogEntry::new(outputs)).await;
                Ok(PhaseInfo::success().with_reason("computed"))
            }
            CatalogLookup::Unavailable => Ok(PhaseInfo::success().with_reason("computed uncached")),
        }
    }
}

#[tokio::test]
async fn test_catalog_memoizes_and_degrades() {
    let template = taskexec::task::TaskTemplate::new("task-cached", "cached").with_cache("1");

    let catalog = Arc::new(MemoryCatalog::new());
    let handler = handler_for(Arc::new(Memoized)).with_catalog(catalog.clone());
    let first = InMemoryNodeContext::new("wfA", "n1", template.clone());
    let second = InMemoryNodeContext::new("wfB", "n1", template.clone());

    let reason = |outcome: taskexec::PassOutcome| outcome.phase.reason.unwrap();
    assert_eq!(reason(handler.handle(&first).await.unwrap()), "computed");
    assert_eq!(reason(handler.handle(&second).await.unwrap()), "cache hit");

    let offline = Arc::new(MemoryCatalog::new());
    offline.set_unavailable(true);
    let handler = handler_for(Arc::new(Memoized)).with_catalog(offline);
    let third = InMemoryNodeContext::new("wfC", "n1", template);
    assert_eq!(
        reason(handler.handle(&third).await.unwrap()),
        "computed uncached"
    );
}

#[tokio::test]
async fn test_abort_and_finalize_reach_plugin() {
    let plugin = Arc::new(StepPlugin::default());
    let handler = handler_for(plugin.clone());
    let node = InMemoryNodeContext::new("wfA", "n1", step_template());

    handler.handle(&node).await.unwrap();
    let before = node.state_writer().current();

    handler.abort(&node.next_pass()).await.unwrap();
    handler.finalize(&node.next_pass()).await.unwrap();

    assert_eq!(plugin.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(plugin.finalizes.load(Ordering::SeqCst), 1);
    assert_eq!(node.state_writer().current(), before);
    assert!(node.sink().events().iter().any(|e| matches!(
        &e.kind,
        TaskEventKind::Diagnostic { message } if message == "aborted"
    )));
}

#[tokio::test]
async fn test_node_context_is_not_mutated_by_assembly_failure() {
    let config = RuntimeConfig {
        id_max_length: 8,
        ..RuntimeConfig::default()
    };
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(StepPlugin::default())).unwrap();
    let handler = TaskHandler::new(&config, registry);
    let node = InMemoryNodeContext::new(&"x".repeat(40), "n1", step_template());

    let err = handler.handle(&node).await.unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert!(!err.is_retryable());
    assert_eq!(node.node_id(), "n1");
    assert_eq!(node.state_writer().put_count(), 0);
}
