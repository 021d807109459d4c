//! Subtasks, agent results, synthesis results, and workflow records.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::status::TaskStatus;

/// Role an agent plays when executing a subtask.
///
/// `Worker`, `Synthesiser`, and `Executive` serve the hierarchical pattern;
/// the remaining specialisations serve the typed swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Worker,
    Synthesiser,
    Executive,
    Text,
    Image,
    Video,
    News,
    Academic,
    Social,
    Product,
    Technical,
    General,
}

impl AgentType {
    /// Specialisations selectable by the swarm classifier.
    pub fn swarm_palette() -> &'static [AgentType] {
        &[
            Self::Text,
            Self::Image,
            Self::Video,
            Self::News,
            Self::Academic,
            Self::Social,
            Self::Product,
            Self::Technical,
            Self::General,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Synthesiser => "synthesiser",
            Self::Executive => "executive",
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::News => "news",
            Self::Academic => "academic",
            Self::Social => "social",
            Self::Product => "product",
            Self::Technical => "technical",
            Self::General => "general",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work dispatched to a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: Uuid,
    pub description: String,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialisation: Option<String>,
    #[serde(default)]
    pub priority: u8,
    /// Identities of subtasks that must complete first. Must be acyclic.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<Uuid>,
}

impl SubTask {
    pub fn new(description: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            agent_type,
            specialisation: None,
            priority: 0,
            prerequisites: Vec::new(),
        }
    }

    pub fn with_specialisation(mut self, specialisation: impl Into<String>) -> Self {
        self.specialisation = Some(specialisation.into());
        self
    }

    /// Description truncated for event payloads.
    pub fn short_description(&self) -> String {
        const MAX: usize = 80;
        if self.description.chars().count() <= MAX {
            self.description.clone()
        } else {
            let prefix: String = self.description.chars().take(MAX).collect();
            format!("{prefix}…")
        }
    }
}

/// Verify the prerequisite graph over `tasks` contains no cycle.
///
/// Unknown prerequisite ids are ignored; they cannot form a cycle.
pub fn prerequisites_acyclic(tasks: &[SubTask]) -> bool {
    let index: HashMap<Uuid, &SubTask> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut done: HashSet<Uuid> = HashSet::new();

    for task in tasks {
        if done.contains(&task.id) {
            continue;
        }
        // Iterative DFS with an explicit in-progress set.
        let mut in_progress: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<(Uuid, usize)> = vec![(task.id, 0)];
        in_progress.insert(task.id);

        while let Some((id, next_child)) = stack.pop() {
            let prereqs = index.get(&id).map(|t| t.prerequisites.as_slice());
            let Some(prereqs) = prereqs else {
                in_progress.remove(&id);
                done.insert(id);
                continue;
            };
            if next_child < prereqs.len() {
                stack.push((id, next_child + 1));
                let child = prereqs[next_child];
                if in_progress.contains(&child) {
                    return false;
                }
                if !done.contains(&child) && index.contains_key(&child) {
                    in_progress.insert(child);
                    stack.push((child, 0));
                }
            } else {
                in_progress.remove(&id);
                done.insert(id);
            }
        }
    }
    true
}

/// Output of one agent execution. Status is always terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub id: Uuid,
    pub agent_type: AgentType,
    pub subtask_id: Uuid,
    pub content: String,
    pub status: TaskStatus,
    pub duration_secs: f64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
}

impl AgentResult {
    pub fn completed(
        subtask: &SubTask,
        content: impl Into<String>,
        duration: Duration,
        cost: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: subtask.agent_type,
            subtask_id: subtask.id,
            content: content.into(),
            status: TaskStatus::Completed,
            duration_secs: duration.as_secs_f64(),
            cost,
            error: None,
            citations: None,
        }
    }

    pub fn failed(subtask: &SubTask, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type: subtask.agent_type,
            subtask_id: subtask.id,
            content: String::new(),
            status: TaskStatus::Failed,
            duration_secs: duration.as_secs_f64(),
            cost: 0.0,
            error: Some(error.into()),
            citations: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Tier at which a synthesis was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisLevel {
    Mid,
    Executive,
}

impl fmt::Display for SynthesisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mid => "mid",
            Self::Executive => "executive",
        })
    }
}

/// Output of a synthesiser over other agents' results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub id: Uuid,
    pub level: SynthesisLevel,
    pub content: String,
    /// Contributing `AgentResult` identities, in input order.
    pub source_ids: Vec<Uuid>,
    pub duration_secs: f64,
    pub cost: f64,
}

/// Descriptor for a rendered document artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentArtifact {
    pub format: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Consolidated outcome of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub workflow_id: Uuid,
    pub title: String,
    pub status: TaskStatus,
    pub agent_results: Vec<AgentResult>,
    pub syntheses: Vec<SynthesisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_synthesis: Option<String>,
    pub duration_secs: f64,
    pub total_cost: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<DocumentArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrchestratorResult {
    /// Number of agent results that completed successfully.
    pub fn successful_agents(&self) -> usize {
        self.agent_results.iter().filter(|r| r.succeeded()).count()
    }
}

/// Per-workflow bookkeeping record, created at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub pattern: String,
    pub task: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Snapshot of the configuration the workflow was submitted with.
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRecord {
    pub fn new(id: Uuid, pattern: impl Into<String>, task: impl Into<String>, config: Value) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            task: task.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            config,
            error: None,
        }
    }
}
