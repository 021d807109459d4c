//! Workflow supervisor: owns every running workflow's cancellable task.
//!
//! `submit` creates the record, opens the stream, registers the webhook, and
//! spawns the orchestration as an independent task — it never awaits
//! completion. Cancellation is cooperative with a bounded grace window, and
//! shutdown drains every in-flight workflow before snapshotting the store.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use protocol::{
    AgentType, EventType, OrchestratorResult, TaskStatus, WorkflowRecord,
};
use provider::ProviderCache;
use registry::ToolRegistry;
use store::StateStore;
use streams::{StreamBus, WebhookDispatcher};

use crate::{
    beltalowda::{self, BeltalowdaOrchestrator},
    config::{BeltalowdaConfig, EngineConfig, SwarmConfig},
    engine::{OrchestrationEngine, Orchestrator, WorkflowContext},
    error::{WorkflowError, WorkflowResult},
    render::DocumentRenderer,
    sink::EventSink,
    swarm::{self, SwarmOrchestrator},
};

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub engine: EngineConfig,
    /// How long `cancel` waits for a graceful unwind.
    pub cancel_grace: Duration,
    /// Bound on the shutdown store snapshot.
    pub shutdown_snapshot_deadline: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            cancel_grace: Duration::from_secs(5),
            shutdown_snapshot_deadline: Duration::from_secs(30),
        }
    }
}

/// Caller-supplied webhook registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Metadata describing one orchestration pattern for `list_patterns`.
#[derive(Debug, Clone, Serialize)]
pub struct PatternInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub defaults: Value,
    pub agent_types: Vec<AgentType>,
}

struct RunningWorkflow {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Creates, tracks, cancels, and drains workflows.
pub struct WorkflowSupervisor {
    store: Arc<StateStore>,
    sink: Arc<EventSink>,
    providers: Arc<ProviderCache>,
    registry: Arc<ToolRegistry>,
    engine: OrchestrationEngine,
    running: DashMap<Uuid, Arc<RunningWorkflow>>,
    accepting: AtomicBool,
    config: SupervisorConfig,
}

impl WorkflowSupervisor {
    pub fn new(
        store: Arc<StateStore>,
        bus: Arc<StreamBus>,
        webhooks: Arc<WebhookDispatcher>,
        providers: Arc<ProviderCache>,
        registry: Arc<ToolRegistry>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        Self::with_renderer(store, bus, webhooks, providers, registry, config, None)
    }

    pub fn with_renderer(
        store: Arc<StateStore>,
        bus: Arc<StreamBus>,
        webhooks: Arc<WebhookDispatcher>,
        providers: Arc<ProviderCache>,
        registry: Arc<ToolRegistry>,
        config: SupervisorConfig,
        renderer: Option<Arc<dyn DocumentRenderer>>,
    ) -> Arc<Self> {
        let mut engine = OrchestrationEngine::new(config.engine.clone());
        if let Some(renderer) = renderer {
            engine = engine.with_renderer(renderer);
        }
        Arc::new(Self {
            store,
            sink: Arc::new(EventSink::new(bus, webhooks)),
            providers,
            registry,
            engine,
            running: DashMap::new(),
            accepting: AtomicBool::new(true),
            config,
        })
    }

    /// Submit a workflow. Returns its identity immediately; execution runs
    /// in an independent cancellable task.
    pub async fn submit(
        self: &Arc<Self>,
        pattern: &str,
        task: &str,
        config_value: Value,
        webhook: Option<WebhookRequest>,
    ) -> WorkflowResult<Uuid> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(WorkflowError::Shutdown);
        }
        if task.trim().is_empty() {
            return Err(WorkflowError::invalid_arguments("task", "task must not be empty"));
        }

        let orchestrator = self.build_orchestrator(pattern, task, &config_value)?;

        let id = Uuid::new_v4();
        self.store
            .create(WorkflowRecord::new(id, pattern, task, config_value))?;
        if let Err(err) = self.sink.bus().open(id) {
            // Roll the record back so the identity is not stuck pending.
            let _ = self
                .store
                .transition(id, TaskStatus::Cancelled, Some("stream unavailable".into()));
            return Err(err.into());
        }
        if let Some(webhook) = webhook {
            self.sink.webhooks().register(id, webhook.url, webhook.secret);
        }

        let cancel = CancellationToken::new();
        let running = Arc::new(RunningWorkflow {
            cancel: cancel.clone(),
            handle: Mutex::new(None),
        });
        self.running.insert(id, Arc::clone(&running));

        let ctx = WorkflowContext {
            workflow_id: id,
            task: task.to_string(),
            cancel,
            providers: Arc::clone(&self.providers),
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
        };

        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            supervisor.run_workflow(id, orchestrator, ctx).await;
        });
        // The task may already have finished and removed its entry; in that
        // case the handle is simply dropped (detached).
        if let Some(entry) = self.running.get(&id) {
            *entry.handle.lock() = Some(handle);
        }

        info!(workflow_id = %id, pattern = %pattern, "Workflow submitted");
        Ok(id)
    }

    async fn run_workflow(
        self: Arc<Self>,
        id: Uuid,
        orchestrator: Arc<dyn Orchestrator>,
        ctx: WorkflowContext,
    ) {
        if let Err(err) = self.store.transition(id, TaskStatus::Running, None) {
            error!(workflow_id = %id, "Failed to mark workflow running: {err}");
            self.sink.bus().close(id);
            self.running.remove(&id);
            return;
        }

        let result = self.engine.run(orchestrator, &ctx).await;
        let status = result.status;
        if let Err(err) = self.store.complete(id, result) {
            // Lost the race against cancel(); the record is already terminal.
            debug!(workflow_id = %id, "Result not stored: {err}");
        }
        self.sink.bus().close(id);
        self.running.remove(&id);
        debug!(workflow_id = %id, status = %status, "Workflow finished");
    }

    /// Cancel a workflow. Idempotent: terminal workflows return success.
    pub async fn cancel(&self, id: Uuid) -> WorkflowResult<()> {
        self.cancel_with_reason(id, "cancelled").await
    }

    async fn cancel_with_reason(&self, id: Uuid, reason: &str) -> WorkflowResult<()> {
        let record = self.store.get_record(id)?;
        if record.status.is_terminal() {
            return Ok(());
        }

        let running = self.running.get(&id).map(|e| Arc::clone(e.value()));
        if let Some(running) = running {
            running.cancel.cancel();
            let handle = running.handle.lock().take();
            if let Some(handle) = handle {
                if tokio::time::timeout(self.config.cancel_grace, handle)
                    .await
                    .is_err()
                {
                    warn!(
                        workflow_id = %id,
                        grace_secs = self.config.cancel_grace.as_secs(),
                        "Workflow did not unwind within grace window, abandoning task"
                    );
                }
            }
        }

        // The engine normally drives the record terminal on its own; force
        // it (and the terminal event) if the unwind never got there.
        if let Ok(record) = self.store.get_record(id) {
            if !record.status.is_terminal() {
                let _ = self
                    .store
                    .transition(id, TaskStatus::Cancelled, Some(reason.to_string()));
                self.sink
                    .emit(
                        id,
                        EventType::WorkflowCancelled,
                        json!({
                            "cancelled_at": Utc::now().to_rfc3339(),
                            "completed_before_cancel": 0,
                        }),
                    )
                    .await;
                self.sink.bus().close(id);
            }
        }
        self.running.remove(&id);
        Ok(())
    }

    pub fn status(&self, id: Uuid) -> WorkflowResult<WorkflowRecord> {
        Ok(self.store.get_record(id)?)
    }

    pub fn result(&self, id: Uuid) -> WorkflowResult<Option<OrchestratorResult>> {
        Ok(self.store.get_result(id)?)
    }

    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Graceful shutdown: refuse new work, notify and cancel every active
    /// workflow, then snapshot the store within its deadline.
    pub async fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Supervisor shutting down");
        } else {
            return;
        }

        let ids: Vec<Uuid> = self.running.iter().map(|e| *e.key()).collect();
        for id in &ids {
            self.sink.emit(*id, EventType::ShuttingDown, json!({})).await;
        }
        for id in ids {
            if let Err(err) = self.cancel_with_reason(id, "server_shutdown").await {
                warn!(workflow_id = %id, "Shutdown cancellation failed: {err}");
            }
        }

        match self
            .store
            .snapshot(self.config.shutdown_snapshot_deadline)
            .await
        {
            Ok(written) if written > 0 => info!(records = written, "State snapshot written"),
            Ok(_) => {}
            Err(err) => warn!("State snapshot failed: {err}"),
        }
    }

    /// Metadata for the supported orchestration patterns.
    pub fn list_patterns() -> Vec<PatternInfo> {
        vec![
            PatternInfo {
                name: beltalowda::PATTERN_NAME,
                display_name: "Beltalowda",
                description: "Hierarchical research: worker agents, grouped mid-tier \
                              synthesisers, one executive synthesiser",
                defaults: serde_json::to_value(BeltalowdaConfig::default())
                    .unwrap_or(Value::Null),
                agent_types: vec![
                    AgentType::Worker,
                    AgentType::Synthesiser,
                    AgentType::Executive,
                ],
            },
            PatternInfo {
                name: swarm::PATTERN_NAME,
                display_name: "Swarm",
                description: "Typed swarm: the query is classified into specialised agents \
                              running in parallel, findings synthesised once",
                defaults: serde_json::to_value(SwarmConfig::default()).unwrap_or(Value::Null),
                agent_types: AgentType::swarm_palette().to_vec(),
            },
        ]
    }

    fn build_orchestrator(
        &self,
        pattern: &str,
        task: &str,
        config_value: &Value,
    ) -> WorkflowResult<Arc<dyn Orchestrator>> {
        match pattern {
            beltalowda::PATTERN_NAME => {
                let config: BeltalowdaConfig = parse_config(config_value)?;
                Ok(Arc::new(BeltalowdaOrchestrator::new(config)))
            }
            swarm::PATTERN_NAME => {
                let config: SwarmConfig = parse_config(config_value)?;
                Ok(Arc::new(SwarmOrchestrator::new(task, config)?))
            }
            other => Err(WorkflowError::invalid_arguments(
                "pattern",
                format!("unknown orchestration pattern '{other}'"),
            )),
        }
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(value: &Value) -> WorkflowResult<T> {
    let value = if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|err| WorkflowError::InvalidArguments {
        field: None,
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::{ChatProvider, ScriptedProvider};
    use store::StateStoreConfig;
    use streams::{StreamBusConfig, WebhookConfig};

    fn test_supervisor_with(provider_delay: Duration) -> (Arc<WorkflowSupervisor>, Arc<StreamBus>) {
        let store = Arc::new(StateStore::new(StateStoreConfig {
            max_active: 2,
            ..StateStoreConfig::default()
        }));
        let bus = Arc::new(StreamBus::new(StreamBusConfig::default()));
        let webhooks = WebhookDispatcher::new(WebhookConfig::default());
        let providers = Arc::new(ProviderCache::new(move |_, _| {
            Ok(Arc::new(
                ScriptedProvider::new("scripted").with_delay(provider_delay),
            ) as Arc<dyn ChatProvider>)
        }));
        let supervisor = WorkflowSupervisor::new(
            store,
            Arc::clone(&bus),
            webhooks,
            providers,
            Arc::new(ToolRegistry::new()),
            SupervisorConfig {
                cancel_grace: Duration::from_secs(1),
                ..SupervisorConfig::default()
            },
        );
        (supervisor, bus)
    }

    async fn wait_for_terminal(supervisor: &WorkflowSupervisor, id: Uuid) -> WorkflowRecord {
        for _ in 0..200 {
            let record = supervisor.status(id).unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("workflow {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_submit_returns_immediately_and_completes() {
        let (supervisor, _bus) = test_supervisor_with(Duration::ZERO);
        let id = supervisor
            .submit("swarm", "reviews of gadget Y", json!({"num_agents": 2}), None)
            .await
            .unwrap();

        let record = wait_for_terminal(&supervisor, id).await;
        assert_eq!(record.status, TaskStatus::Completed);
        let result = supervisor.result(id).unwrap().unwrap();
        assert_eq!(result.successful_agents(), 2);
    }

    #[tokio::test]
    async fn test_unknown_pattern_rejected() {
        let (supervisor, _bus) = test_supervisor_with(Duration::ZERO);
        let err = supervisor
            .submit("oracle", "task", Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_active_cap_surfaces_too_many_active() {
        let (supervisor, _bus) = test_supervisor_with(Duration::from_secs(5));
        for _ in 0..2 {
            supervisor
                .submit("swarm", "slow query", json!({"num_agents": 1}), None)
                .await
                .unwrap();
        }
        let err = supervisor
            .submit("swarm", "one too many", json!({"num_agents": 1}), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Store(store::StoreError::TooManyActive { .. })
        ));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_total() {
        let (supervisor, bus) = test_supervisor_with(Duration::from_secs(5));
        let id = supervisor
            .submit("swarm", "slow query", json!({"num_agents": 2}), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        supervisor.cancel(id).await.unwrap();
        let record = supervisor.status(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);

        // Terminal event was emitted on the stream.
        let mut subscription = bus.subscribe(id, Some(0)).unwrap();
        let mut saw_cancelled = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(300), subscription.next()).await
        {
            if event.event_type == EventType::WorkflowCancelled {
                saw_cancelled = true;
                break;
            }
        }
        assert!(saw_cancelled);

        // Second cancel is a successful no-op.
        supervisor.cancel(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_unknown_workflow() {
        let (supervisor, _bus) = test_supervisor_with(Duration::ZERO);
        let err = supervisor.cancel(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), protocol::ErrorKind::UnknownWorkflow);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_submissions() {
        let (supervisor, _bus) = test_supervisor_with(Duration::ZERO);
        supervisor.shutdown().await;
        let err = supervisor
            .submit("swarm", "task", Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Shutdown));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_workflows() {
        let (supervisor, _bus) = test_supervisor_with(Duration::from_secs(5));
        let id = supervisor
            .submit("swarm", "slow query", json!({"num_agents": 1}), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        supervisor.shutdown().await;
        let record = supervisor.status(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_list_patterns_metadata() {
        let patterns = WorkflowSupervisor::list_patterns();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].name, "beltalowda");
        assert_eq!(patterns[1].name, "swarm");
        assert_eq!(patterns[0].defaults["num_workers"], 8);
        assert!(patterns[1]
            .agent_types
            .contains(&AgentType::Product));
    }
}
