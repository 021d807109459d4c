//! Server configuration.
//!
//! Loaded from a YAML file with serde defaults for every option; the CLI
//! can override the bind address.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use store::StateStoreConfig;
use streams::{StreamBusConfig, WebhookConfig};
use workflow::{EngineConfig, SupervisorConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DreamwalkerConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Upper bound on concurrent workflow records.
    #[serde(default = "default_max_active_workflows")]
    pub max_active_workflows: usize,

    /// Per-workflow event buffer capacity.
    #[serde(default = "default_stream_event_queue_capacity")]
    pub stream_event_queue_capacity: usize,

    /// Idle stream reaping window.
    #[serde(default = "default_stream_ttl_seconds")]
    pub stream_ttl_seconds: u64,

    #[serde(default = "default_webhook_max_retries")]
    pub webhook_max_retries: u32,

    #[serde(default = "default_webhook_backoff_base_seconds")]
    pub webhook_backoff_base_seconds: f64,

    /// Completed results retained in the hot tier.
    #[serde(default = "default_completed_retention_count")]
    pub completed_retention_count: usize,

    /// Default subtask deadline.
    #[serde(default = "default_per_subtask_timeout_seconds")]
    pub per_subtask_timeout_seconds: u64,

    /// Overall workflow deadline override.
    #[serde(default)]
    pub workflow_timeout_seconds: Option<u64>,

    /// Per-workflow subtask concurrency.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Durable backend selection; enables rehydrate-on-start and async
    /// replication.
    #[serde(default)]
    pub durable_backend: DurableBackendKind,
}

impl Default for DreamwalkerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            max_active_workflows: default_max_active_workflows(),
            stream_event_queue_capacity: default_stream_event_queue_capacity(),
            stream_ttl_seconds: default_stream_ttl_seconds(),
            webhook_max_retries: default_webhook_max_retries(),
            webhook_backoff_base_seconds: default_webhook_backoff_base_seconds(),
            completed_retention_count: default_completed_retention_count(),
            per_subtask_timeout_seconds: default_per_subtask_timeout_seconds(),
            workflow_timeout_seconds: None,
            default_concurrency: default_concurrency(),
            durable_backend: DurableBackendKind::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Optional static bearer token required on the HTTP surface.
    /// Authentication beyond this hook is out of scope.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableBackendKind {
    /// Hot tier only.
    #[default]
    None,
    /// In-process backend; exercises replication and rehydration without an
    /// external store.
    Memory,
}

impl DreamwalkerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn stream_bus_config(&self) -> StreamBusConfig {
        StreamBusConfig {
            queue_capacity: self.stream_event_queue_capacity,
            max_streams: self.max_active_workflows * 2,
            idle_ttl: Duration::from_secs(self.stream_ttl_seconds),
            ..StreamBusConfig::default()
        }
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            max_retries: self.webhook_max_retries,
            backoff_base: Duration::from_secs_f64(self.webhook_backoff_base_seconds.max(0.0)),
            ..WebhookConfig::default()
        }
    }

    pub fn store_config(&self) -> StateStoreConfig {
        StateStoreConfig {
            max_active: self.max_active_workflows,
            completed_retention: self.completed_retention_count,
            ..StateStoreConfig::default()
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            engine: EngineConfig {
                max_concurrent_agents: self.default_concurrency,
                workflow_timeout: self.workflow_timeout_seconds.map(Duration::from_secs),
            },
            ..SupervisorConfig::default()
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8484".to_string()
}

fn default_max_active_workflows() -> usize {
    50
}

fn default_stream_event_queue_capacity() -> usize {
    1000
}

fn default_stream_ttl_seconds() -> u64 {
    3600
}

fn default_webhook_max_retries() -> u32 {
    3
}

fn default_webhook_backoff_base_seconds() -> f64 {
    1.0
}

fn default_completed_retention_count() -> usize {
    100
}

fn default_per_subtask_timeout_seconds() -> u64 {
    180
}

fn default_concurrency() -> usize {
    10
}
