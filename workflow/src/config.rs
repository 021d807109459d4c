//! Per-pattern and engine configuration.

use std::time::Duration;

use protocol::AgentType;
use serde::{Deserialize, Serialize};

/// Knobs shared by every orchestration pattern.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-workflow subtask concurrency.
    pub max_concurrent_agents: usize,
    /// Overall deadline override; the engine still enforces
    /// `1.5 × subtask_timeout × num_subtasks` as a floor.
    pub workflow_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 10,
            workflow_timeout: None,
        }
    }
}

/// Configuration for the hierarchical ("Beltalowda") pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeltalowdaConfig {
    /// Worker agent count. Clamped to 1–20 at execution time.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Workers per mid-tier synthesiser.
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    #[serde(default = "default_true")]
    pub enable_mid: bool,

    #[serde(default = "default_true")]
    pub enable_executive: bool,

    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_seconds: u64,

    #[serde(default = "default_mid_timeout")]
    pub mid_timeout_seconds: u64,

    #[serde(default = "default_executive_timeout")]
    pub executive_timeout_seconds: u64,

    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model used for worker agents (typically cheaper).
    #[serde(default = "default_model")]
    pub worker_model: String,

    /// Model used for both synthesiser tiers.
    #[serde(default = "default_model")]
    pub synthesis_model: String,

    /// Formats handed to the document renderer after synthesis.
    #[serde(default)]
    pub document_formats: Vec<String>,
}

impl Default for BeltalowdaConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            group_size: default_group_size(),
            enable_mid: true,
            enable_executive: true,
            worker_timeout_seconds: default_worker_timeout(),
            mid_timeout_seconds: default_mid_timeout(),
            executive_timeout_seconds: default_executive_timeout(),
            provider: default_provider(),
            worker_model: default_model(),
            synthesis_model: default_model(),
            document_formats: Vec::new(),
        }
    }
}

/// Configuration for the typed-swarm pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_num_agents")]
    pub num_agents: usize,

    /// Explicit specialisation allow-list. When absent the query is
    /// classified by keyword rules.
    #[serde(default)]
    pub agent_types: Option<Vec<AgentType>>,

    #[serde(default = "default_true")]
    pub enable_synthesis: bool,

    #[serde(default = "default_worker_timeout")]
    pub agent_timeout_seconds: u64,

    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub document_formats: Vec<String>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            num_agents: default_num_agents(),
            agent_types: None,
            enable_synthesis: true,
            agent_timeout_seconds: default_worker_timeout(),
            provider: default_provider(),
            model: default_model(),
            document_formats: Vec::new(),
        }
    }
}

fn default_num_workers() -> usize {
    8
}

fn default_group_size() -> usize {
    5
}

fn default_num_agents() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_worker_timeout() -> u64 {
    180
}

fn default_mid_timeout() -> u64 {
    240
}

fn default_executive_timeout() -> u64 {
    300
}

fn default_provider() -> String {
    "scripted".to_string()
}

fn default_model() -> String {
    "default".to_string()
}
