//! Hierarchical three-tier orchestration: workers → mid synthesisers →
//! executive synthesiser.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use protocol::{
    AgentResult, AgentType, EventType, SubTask, SynthesisLevel, SynthesisResult,
};
use provider::ChatRequest;

use crate::{
    config::BeltalowdaConfig,
    engine::{Orchestrator, WorkflowContext},
    error::WorkflowResult,
};

pub const PATTERN_NAME: &str = "beltalowda";

const WORKER_RANGE: (usize, usize) = (1, 20);

const DECOMPOSE_SYSTEM: &str = "You are a research planner. Split the task into independent \
     research subtasks. Reply with one subtask description per line and nothing else.";

const WORKER_SYSTEM: &str = "You are a focused research worker. Investigate exactly the subtask \
     you are given and report concrete findings.";

const MID_SYNTHESIS_SYSTEM: &str = "You are a synthesis analyst. Merge the findings below into \
     one coherent summary, preserving every load-bearing fact.";

const EXECUTIVE_SYSTEM: &str = "You are the executive editor. Produce the final consolidated \
     answer from the syntheses below, resolving conflicts and citing the strongest findings.";

/// Three-tier hierarchical orchestrator.
pub struct BeltalowdaOrchestrator {
    config: BeltalowdaConfig,
    /// Cost of decomposition calls, folded into the workflow total.
    overhead: Mutex<f64>,
}

impl BeltalowdaOrchestrator {
    pub fn new(config: BeltalowdaConfig) -> Self {
        Self {
            config,
            overhead: Mutex::new(0.0),
        }
    }

    fn num_workers(&self) -> usize {
        self.config.num_workers.clamp(WORKER_RANGE.0, WORKER_RANGE.1)
    }

    /// Run one synthesis call with its level timeout. `None` degrades the
    /// tier rather than failing the workflow.
    async fn synthesis_call(
        &self,
        ctx: &WorkflowContext,
        level: SynthesisLevel,
        prompt: String,
        timeout: Duration,
        source_ids: Vec<Uuid>,
        input_count: usize,
    ) -> Option<SynthesisResult> {
        ctx.emit(
            EventType::SynthesisStarted,
            json!({ "level": level, "input_count": input_count }),
        )
        .await;

        let system = match level {
            SynthesisLevel::Mid => MID_SYNTHESIS_SYSTEM,
            SynthesisLevel::Executive => EXECUTIVE_SYSTEM,
        };
        let request =
            ChatRequest::new(&self.config.synthesis_model, prompt).with_system(system);
        let started = Instant::now();

        match tokio::time::timeout(
            timeout,
            ctx.providers.complete(&self.config.provider, request),
        )
        .await
        {
            Ok(Ok(response)) => {
                let result = SynthesisResult {
                    id: Uuid::new_v4(),
                    level,
                    content: response.content,
                    source_ids,
                    duration_secs: started.elapsed().as_secs_f64(),
                    cost: response.cost,
                };
                ctx.emit(
                    EventType::SynthesisCompleted,
                    json!({
                        "level": level,
                        "output_length": result.content.len(),
                        "cost": result.cost,
                    }),
                )
                .await;
                Some(result)
            }
            Ok(Err(err)) => {
                warn!(
                    workflow_id = %ctx.workflow_id,
                    level = %level,
                    "Synthesis call failed, degrading: {err}"
                );
                None
            }
            Err(_) => {
                warn!(
                    workflow_id = %ctx.workflow_id,
                    level = %level,
                    timeout_secs = timeout.as_secs(),
                    "Synthesis call timed out, degrading"
                );
                None
            }
        }
    }
}

#[async_trait]
impl Orchestrator for BeltalowdaOrchestrator {
    fn pattern(&self) -> &'static str {
        PATTERN_NAME
    }

    fn num_agents(&self) -> usize {
        self.num_workers()
    }

    fn subtask_timeout(&self, _subtask: &SubTask) -> Duration {
        Duration::from_secs(self.config.worker_timeout_seconds)
    }

    fn synthesis_enabled(&self) -> bool {
        self.config.enable_mid || self.config.enable_executive
    }

    fn document_formats(&self) -> &[String] {
        &self.config.document_formats
    }

    fn overhead_cost(&self) -> f64 {
        *self.overhead.lock()
    }

    /// Ask the provider for exactly `num_workers` subtasks: one per line,
    /// padded with the residual task when short, truncated when long.
    /// Ordering is stable by generation index.
    async fn decompose(&self, ctx: &WorkflowContext) -> WorkflowResult<Vec<SubTask>> {
        let n = self.num_workers();
        let prompt = format!(
            "Break the task below into exactly {n} independent research subtasks.\n\nTask: {}",
            ctx.task
        );
        let request =
            ChatRequest::new(&self.config.worker_model, prompt).with_system(DECOMPOSE_SYSTEM);
        let response = ctx.providers.complete(&self.config.provider, request).await?;
        *self.overhead.lock() += response.cost;

        let mut descriptions: Vec<String> = response
            .content
            .lines()
            .map(strip_list_marker)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        descriptions.truncate(n);
        while descriptions.len() < n {
            descriptions.push(ctx.task.clone());
        }

        debug!(
            workflow_id = %ctx.workflow_id,
            workers = n,
            "Decomposed task into worker subtasks"
        );
        Ok(descriptions
            .into_iter()
            .map(|description| SubTask::new(description, AgentType::Worker))
            .collect())
    }

    async fn execute_subtask(&self, ctx: &WorkflowContext, subtask: &SubTask) -> AgentResult {
        let started = Instant::now();
        let prompt = format!(
            "Overall task: {}\n\nYour subtask: {}\n\nReport your findings.",
            ctx.task, subtask.description
        );
        let request =
            ChatRequest::new(&self.config.worker_model, prompt).with_system(WORKER_SYSTEM);

        match ctx.providers.complete(&self.config.provider, request).await {
            Ok(response) => {
                AgentResult::completed(subtask, response.content, started.elapsed(), response.cost)
            }
            Err(err) => AgentResult::failed(subtask, err.to_string(), started.elapsed()),
        }
    }

    /// Grouped mid-tier synthesis over worker results, then one executive
    /// pass. Either tier degrades independently on failure.
    async fn synthesise(
        &self,
        ctx: &WorkflowContext,
        results: &[AgentResult],
    ) -> (Vec<SynthesisResult>, Option<String>) {
        let successes: Vec<&AgentResult> = results.iter().filter(|r| r.succeeded()).collect();
        let mut syntheses: Vec<SynthesisResult> = Vec::new();

        if self.config.enable_mid {
            let group_size = self.config.group_size.max(1);
            for group in successes.chunks(group_size) {
                if ctx.is_cancelled() {
                    return (syntheses, None);
                }
                let findings = group
                    .iter()
                    .enumerate()
                    .map(|(i, r)| format!("Finding {}:\n{}", i + 1, r.content))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let prompt = format!("Task: {}\n\n{findings}", ctx.task);
                if let Some(synthesis) = self
                    .synthesis_call(
                        ctx,
                        SynthesisLevel::Mid,
                        prompt,
                        Duration::from_secs(self.config.mid_timeout_seconds),
                        group.iter().map(|r| r.id).collect(),
                        group.len(),
                    )
                    .await
                {
                    syntheses.push(synthesis);
                }
            }
        }

        let mut final_synthesis = None;
        if self.config.enable_executive && !ctx.is_cancelled() {
            // Prefer mid syntheses; fall back to raw worker findings when
            // the mid tier is disabled or fully degraded.
            let (inputs, input_count): (Vec<String>, usize) = if syntheses.is_empty() {
                (
                    successes.iter().map(|r| r.content.clone()).collect(),
                    successes.len(),
                )
            } else {
                (
                    syntheses.iter().map(|s| s.content.clone()).collect(),
                    syntheses.len(),
                )
            };
            let sections = inputs
                .iter()
                .enumerate()
                .map(|(i, content)| format!("Section {}:\n{}", i + 1, content))
                .collect::<Vec<_>>()
                .join("\n\n");
            let prompt = format!("Task: {}\n\n{sections}", ctx.task);

            if let Some(executive) = self
                .synthesis_call(
                    ctx,
                    SynthesisLevel::Executive,
                    prompt,
                    Duration::from_secs(self.config.executive_timeout_seconds),
                    successes.iter().map(|r| r.id).collect(),
                    input_count,
                )
                .await
            {
                final_synthesis = Some(executive.content.clone());
                syntheses.push(executive);
            }
        }

        (syntheses, final_synthesis)
    }
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    // Numbered markers: "3." or "3)".
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return stripped.trim_start();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use provider::{ChatProvider, ProviderCache, ScriptedProvider};
    use registry::ToolRegistry;
    use streams::{StreamBus, StreamBusConfig, WebhookConfig, WebhookDispatcher};
    use tokio_util::sync::CancellationToken;

    use crate::sink::EventSink;

    fn context_with_provider(provider: Arc<ScriptedProvider>) -> WorkflowContext {
        let bus = Arc::new(StreamBus::new(StreamBusConfig::default()));
        let webhooks = WebhookDispatcher::new(WebhookConfig::default());
        let shared = Arc::clone(&provider);
        WorkflowContext {
            workflow_id: Uuid::new_v4(),
            task: "summarise X".to_string(),
            cancel: CancellationToken::new(),
            providers: Arc::new(ProviderCache::new(move |_, _| {
                Ok(Arc::clone(&shared) as Arc<dyn ChatProvider>)
            })),
            registry: Arc::new(ToolRegistry::new()),
            sink: Arc::new(EventSink::new(bus, webhooks)),
        }
    }

    #[test]
    fn test_strip_list_marker() {
        assert_eq!(strip_list_marker("- find sources"), "find sources");
        assert_eq!(strip_list_marker("3. compare results"), "compare results");
        assert_eq!(strip_list_marker("2) check dates"), "check dates");
        assert_eq!(strip_list_marker("  * weigh evidence"), "weigh evidence");
        assert_eq!(strip_list_marker("plain"), "plain");
    }

    #[tokio::test]
    async fn test_decompose_exact_count_from_provider() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted").with_response("- alpha\n- beta\n- gamma"),
        );
        let ctx = context_with_provider(provider);
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            num_workers: 3,
            ..BeltalowdaConfig::default()
        });

        let subtasks = orchestrator.decompose(&ctx).await.unwrap();
        assert_eq!(subtasks.len(), 3);
        assert_eq!(subtasks[0].description, "alpha");
        assert_eq!(subtasks[2].description, "gamma");
        assert!(subtasks.iter().all(|s| s.agent_type == AgentType::Worker));
    }

    #[tokio::test]
    async fn test_decompose_pads_with_residual_task() {
        let provider = Arc::new(ScriptedProvider::new("scripted").with_response("only one line"));
        let ctx = context_with_provider(provider);
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            num_workers: 3,
            ..BeltalowdaConfig::default()
        });

        let subtasks = orchestrator.decompose(&ctx).await.unwrap();
        assert_eq!(subtasks.len(), 3);
        assert_eq!(subtasks[0].description, "only one line");
        assert_eq!(subtasks[1].description, "summarise X");
        assert_eq!(subtasks[2].description, "summarise X");
    }

    #[tokio::test]
    async fn test_decompose_truncates_excess_lines() {
        let provider =
            Arc::new(ScriptedProvider::new("scripted").with_response("a\nb\nc\nd\ne"));
        let ctx = context_with_provider(provider);
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            num_workers: 2,
            ..BeltalowdaConfig::default()
        });

        let subtasks = orchestrator.decompose(&ctx).await.unwrap();
        assert_eq!(subtasks.len(), 2);
        assert_eq!(subtasks[0].description, "a");
        assert_eq!(subtasks[1].description, "b");
    }

    #[tokio::test]
    async fn test_worker_failure_materialised() {
        let provider = Arc::new(ScriptedProvider::new("scripted").with_failure("rate limited"));
        let ctx = context_with_provider(provider);
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig::default());
        let subtask = SubTask::new("inspect", AgentType::Worker);

        let result = orchestrator.execute_subtask(&ctx, &subtask).await;
        assert!(!result.succeeded());
        assert!(result.error.as_deref().unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_synthesis_two_tiers() {
        // Script: 2 mid syntheses, then the executive pass.
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .with_response("mid one")
                .with_response("mid two")
                .with_response("executive summary"),
        );
        let ctx = context_with_provider(provider);
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            group_size: 2,
            ..BeltalowdaConfig::default()
        });

        let results: Vec<AgentResult> = (0..4)
            .map(|i| {
                let subtask = SubTask::new(format!("part {i}"), AgentType::Worker);
                AgentResult::completed(&subtask, format!("finding {i}"), Duration::ZERO, 0.0)
            })
            .collect();

        let (syntheses, final_text) = orchestrator.synthesise(&ctx, &results).await;
        assert_eq!(syntheses.len(), 3);
        assert_eq!(
            syntheses
                .iter()
                .filter(|s| s.level == SynthesisLevel::Mid)
                .count(),
            2
        );
        assert_eq!(final_text.as_deref(), Some("executive summary"));

        // Mid syntheses carry their group's agent ids.
        assert_eq!(syntheses[0].source_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_executive_failure_leaves_mid_syntheses() {
        let provider = Arc::new(
            ScriptedProvider::new("scripted")
                .with_response("mid one")
                .with_failure("overloaded"),
        );
        let ctx = context_with_provider(provider);
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            group_size: 5,
            ..BeltalowdaConfig::default()
        });

        let subtask = SubTask::new("part", AgentType::Worker);
        let results = vec![AgentResult::completed(&subtask, "finding", Duration::ZERO, 0.0)];

        let (syntheses, final_text) = orchestrator.synthesise(&ctx, &results).await;
        assert_eq!(syntheses.len(), 1);
        assert_eq!(syntheses[0].level, SynthesisLevel::Mid);
        assert!(final_text.is_none());
    }

    #[tokio::test]
    async fn test_mid_disabled_executive_reads_raw_findings() {
        let provider = Arc::new(ScriptedProvider::new("scripted").with_response("executive"));
        let ctx = context_with_provider(provider);
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            enable_mid: false,
            ..BeltalowdaConfig::default()
        });

        let subtask = SubTask::new("part", AgentType::Worker);
        let results = vec![AgentResult::completed(&subtask, "finding", Duration::ZERO, 0.0)];

        let (syntheses, final_text) = orchestrator.synthesise(&ctx, &results).await;
        assert_eq!(syntheses.len(), 1);
        assert_eq!(syntheses[0].level, SynthesisLevel::Executive);
        assert_eq!(final_text.as_deref(), Some("executive"));
    }

    #[test]
    fn test_worker_count_clamped() {
        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            num_workers: 500,
            ..BeltalowdaConfig::default()
        });
        assert_eq!(orchestrator.num_agents(), 20);

        let orchestrator = BeltalowdaOrchestrator::new(BeltalowdaConfig {
            num_workers: 0,
            ..BeltalowdaConfig::default()
        });
        assert_eq!(orchestrator.num_agents(), 1);
    }
}
