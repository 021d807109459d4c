//! Dreamwalker — MCP orchestration server.
//!
//! Clients submit hierarchical ("Beltalowda") or typed-swarm research
//! workflows over MCP; the server fans the work out to LLM-backed agents,
//! streams lifecycle events over SSE and webhooks, and stores consolidated
//! results.
//!
//! The binary wires a deterministic scripted provider; embedders supply real
//! provider factories through [`bootstrap_with_providers`].

pub mod config;
pub mod server;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use provider::{ChatProvider, ProviderCache, ScriptedProvider};
use registry::ToolRegistry;
use store::{MemoryBackend, StateStore};
use streams::{StreamBus, WebhookDispatcher};
use tokio::task::JoinHandle;
use tracing::debug;
use workflow::WorkflowSupervisor;

pub use config::DreamwalkerConfig;

/// Shared handles behind the HTTP and MCP surfaces.
///
/// The stream bus is deliberately owned here and passed by handle: the
/// supervisor publishes into it and the SSE endpoint subscribes from it, and
/// neither owns the other.
pub struct AppState {
    pub config: DreamwalkerConfig,
    pub store: Arc<StateStore>,
    pub bus: Arc<StreamBus>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub providers: Arc<ProviderCache>,
    pub registry: Arc<ToolRegistry>,
    pub supervisor: Arc<WorkflowSupervisor>,
}

/// Build the full component graph with the default scripted provider.
pub async fn bootstrap(config: DreamwalkerConfig) -> anyhow::Result<Arc<AppState>> {
    let providers = Arc::new(ProviderCache::new(|provider, _model| {
        Ok(Arc::new(ScriptedProvider::new(provider)) as Arc<dyn ChatProvider>)
    }));
    bootstrap_with_providers(config, providers).await
}

/// Build the full component graph with a caller-supplied provider cache.
pub async fn bootstrap_with_providers(
    config: DreamwalkerConfig,
    providers: Arc<ProviderCache>,
) -> anyhow::Result<Arc<AppState>> {
    let store = match config.durable_backend {
        config::DurableBackendKind::None => Arc::new(StateStore::new(config.store_config())),
        config::DurableBackendKind::Memory => {
            let store = Arc::new(StateStore::with_backend(
                config.store_config(),
                Arc::new(MemoryBackend::new()),
            ));
            store.rehydrate().await?;
            store
        }
    };

    let bus = Arc::new(StreamBus::new(config.stream_bus_config()));
    let webhooks = WebhookDispatcher::new(config.webhook_config());
    let registry = Arc::new(ToolRegistry::new());

    let supervisor = WorkflowSupervisor::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&webhooks),
        Arc::clone(&providers),
        Arc::clone(&registry),
        config.supervisor_config(),
    );

    Ok(Arc::new(AppState {
        config,
        store,
        bus,
        webhooks,
        providers,
        registry,
        supervisor,
    }))
}

/// Background maintenance: reap idle streams and evict expired records.
pub fn spawn_maintenance(state: &Arc<AppState>) -> JoinHandle<()> {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let reaped = state.bus.reap();
            let evicted = state.store.evict_expired(Utc::now());
            for id in &evicted {
                state.webhooks.unregister(*id);
            }
            if reaped > 0 || !evicted.is_empty() {
                debug!(reaped, evicted = evicted.len(), "Maintenance pass");
            }
        }
    })
}
