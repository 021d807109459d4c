//! Typed-swarm orchestration: a single fan-out of specialised agents.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use protocol::{AgentResult, AgentType, EventType, SubTask, SynthesisLevel, SynthesisResult};
use provider::ChatRequest;

use crate::{
    config::SwarmConfig,
    engine::{Orchestrator, WorkflowContext},
    error::{WorkflowError, WorkflowResult},
};

pub const PATTERN_NAME: &str = "swarm";

/// Substring rules mapping query text to agent specialisations, checked in
/// order. First match per type wins; no match falls back to `general`.
const KEYWORD_RULES: &[(&str, AgentType)] = &[
    ("paper", AgentType::Academic),
    ("study", AgentType::Academic),
    ("preprint", AgentType::Academic),
    ("journal", AgentType::Academic),
    ("citation", AgentType::Academic),
    ("price", AgentType::Product),
    ("review", AgentType::Product),
    ("buy", AgentType::Product),
    ("deal", AgentType::Product),
    ("compare", AgentType::Product),
    ("news", AgentType::News),
    ("headline", AgentType::News),
    ("breaking", AgentType::News),
    ("announcement", AgentType::News),
    ("tweet", AgentType::Social),
    ("reddit", AgentType::Social),
    ("viral", AgentType::Social),
    ("trending", AgentType::Social),
    ("opinion", AgentType::Social),
    ("code", AgentType::Technical),
    ("library", AgentType::Technical),
    ("api", AgentType::Technical),
    ("benchmark", AgentType::Technical),
    ("spec", AgentType::Technical),
    ("photo", AgentType::Image),
    ("image", AgentType::Image),
    ("picture", AgentType::Image),
    ("diagram", AgentType::Image),
    ("video", AgentType::Video),
    ("footage", AgentType::Video),
    ("documentary", AgentType::Video),
    ("summary", AgentType::Text),
    ("explain", AgentType::Text),
    ("overview", AgentType::Text),
];

/// Classify a query into a multiset of `num_agents` specialisations.
///
/// Matched types are assigned round-robin so the distribution stays stable
/// for a given query.
pub fn classify_query(query: &str, num_agents: usize) -> Vec<AgentType> {
    let lowered = query.to_lowercase();
    let mut matched: Vec<AgentType> = Vec::new();
    for (keyword, agent_type) in KEYWORD_RULES {
        if lowered.contains(keyword) && !matched.contains(agent_type) {
            matched.push(*agent_type);
        }
    }
    if matched.is_empty() {
        matched.push(AgentType::General);
    }
    (0..num_agents).map(|i| matched[i % matched.len()]).collect()
}

fn specialisation_system(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Text => "You are a text research specialist. Find and summarise the most relevant written material.",
        AgentType::Image => "You are an image research specialist. Describe the most relevant visual material and where it can be found.",
        AgentType::Video => "You are a video research specialist. Surface the most relevant video sources with context.",
        AgentType::News => "You are a news specialist. Report the most recent, credible coverage with dates.",
        AgentType::Academic => "You are an academic research specialist. Cite papers, studies, and preprints with venues.",
        AgentType::Social => "You are a social-signal specialist. Summarise public sentiment and notable discussions.",
        AgentType::Product => "You are a product research specialist. Compare offerings, pricing, and reviews.",
        AgentType::Technical => "You are a technical specialist. Evaluate implementations, APIs, and benchmarks.",
        // Hierarchy roles and the fallback share the generalist prompt.
        _ => "You are a general research specialist. Investigate the query broadly and report findings.",
    }
}

/// Single-tier specialised fan-out.
pub struct SwarmOrchestrator {
    config: SwarmConfig,
    agent_types: Vec<AgentType>,
}

impl SwarmOrchestrator {
    /// Build the orchestrator, resolving the agent-type multiset from the
    /// explicit allow-list or the keyword classifier.
    pub fn new(query: &str, config: SwarmConfig) -> WorkflowResult<Self> {
        let num_agents = config.num_agents.clamp(1, 20);
        let agent_types = match &config.agent_types {
            Some(types) if types.is_empty() => {
                return Err(WorkflowError::invalid_arguments(
                    "agent_types",
                    "explicit agent_types must not be empty",
                ));
            }
            Some(types) => (0..num_agents).map(|i| types[i % types.len()]).collect(),
            None => classify_query(query, num_agents),
        };
        debug!(agents = ?agent_types, "Resolved swarm agent distribution");
        Ok(Self {
            config,
            agent_types,
        })
    }

    pub fn agent_types(&self) -> &[AgentType] {
        &self.agent_types
    }
}

#[async_trait]
impl Orchestrator for SwarmOrchestrator {
    fn pattern(&self) -> &'static str {
        PATTERN_NAME
    }

    fn num_agents(&self) -> usize {
        self.agent_types.len()
    }

    fn subtask_timeout(&self, _subtask: &SubTask) -> Duration {
        Duration::from_secs(self.config.agent_timeout_seconds)
    }

    fn synthesis_enabled(&self) -> bool {
        self.config.enable_synthesis
    }

    fn document_formats(&self) -> &[String] {
        &self.config.document_formats
    }

    async fn decompose(&self, ctx: &WorkflowContext) -> WorkflowResult<Vec<SubTask>> {
        Ok(self
            .agent_types
            .iter()
            .map(|agent_type| {
                SubTask::new(ctx.task.clone(), *agent_type)
                    .with_specialisation(agent_type.as_str())
            })
            .collect())
    }

    async fn execute_subtask(&self, ctx: &WorkflowContext, subtask: &SubTask) -> AgentResult {
        let started = Instant::now();
        let request = ChatRequest::new(
            &self.config.model,
            format!("Query: {}\n\nReport your findings.", subtask.description),
        )
        .with_system(specialisation_system(subtask.agent_type));

        match ctx.providers.complete(&self.config.provider, request).await {
            Ok(response) => {
                AgentResult::completed(subtask, response.content, started.elapsed(), response.cost)
            }
            Err(err) => AgentResult::failed(subtask, err.to_string(), started.elapsed()),
        }
    }

    /// Collapse all findings into one final text.
    async fn synthesise(
        &self,
        ctx: &WorkflowContext,
        results: &[AgentResult],
    ) -> (Vec<SynthesisResult>, Option<String>) {
        let successes: Vec<&AgentResult> = results.iter().filter(|r| r.succeeded()).collect();
        if successes.is_empty() {
            return (Vec::new(), None);
        }

        ctx.emit(
            EventType::SynthesisStarted,
            json!({ "level": SynthesisLevel::Executive, "input_count": successes.len() }),
        )
        .await;

        let findings = successes
            .iter()
            .map(|r| format!("[{}]\n{}", r.agent_type, r.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let request = ChatRequest::new(
            &self.config.model,
            format!("Query: {}\n\n{findings}", ctx.task),
        )
        .with_system(
            "You are a synthesis editor. Merge the specialist findings below into one \
             consolidated answer to the query.",
        );

        let started = Instant::now();
        match tokio::time::timeout(
            Duration::from_secs(self.config.agent_timeout_seconds),
            ctx.providers.complete(&self.config.provider, request),
        )
        .await
        {
            Ok(Ok(response)) => {
                let synthesis = SynthesisResult {
                    id: Uuid::new_v4(),
                    level: SynthesisLevel::Executive,
                    content: response.content.clone(),
                    source_ids: successes.iter().map(|r| r.id).collect(),
                    duration_secs: started.elapsed().as_secs_f64(),
                    cost: response.cost,
                };
                ctx.emit(
                    EventType::SynthesisCompleted,
                    json!({
                        "level": SynthesisLevel::Executive,
                        "output_length": synthesis.content.len(),
                        "cost": synthesis.cost,
                    }),
                )
                .await;
                (vec![synthesis], Some(response.content))
            }
            Ok(Err(err)) => {
                warn!(workflow_id = %ctx.workflow_id, "Swarm synthesis failed: {err}");
                (Vec::new(), None)
            }
            Err(_) => {
                warn!(workflow_id = %ctx.workflow_id, "Swarm synthesis timed out");
                (Vec::new(), None)
            }
        }
    }
}
