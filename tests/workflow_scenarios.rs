//! End-to-end orchestration scenarios against a scripted provider.

use std::{sync::Arc, time::Duration};

use serde_json::json;
use uuid::Uuid;

use dreamwalker::{bootstrap_with_providers, AppState, DreamwalkerConfig};
use protocol::{EventType, TaskStatus};
use provider::{ChatProvider, ProviderCache, ScriptedProvider};

async fn state_with_provider(provider: Arc<ScriptedProvider>) -> Arc<AppState> {
    let shared = Arc::clone(&provider);
    let providers = Arc::new(ProviderCache::new(move |_, _| {
        Ok(Arc::clone(&shared) as Arc<dyn ChatProvider>)
    }));
    bootstrap_with_providers(DreamwalkerConfig::default(), providers)
        .await
        .unwrap()
}

async fn wait_for_terminal(state: &AppState, id: Uuid) -> TaskStatus {
    for _ in 0..300 {
        let record = state.supervisor.status(id).unwrap();
        if record.status.is_terminal() {
            return record.status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("workflow {id} never reached a terminal state");
}

async fn collect_event_types(state: &AppState, id: Uuid) -> Vec<EventType> {
    let mut subscription = state.bus.subscribe(id, Some(0)).unwrap();
    let mut types = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), subscription.next()).await
    {
        let terminal = event.event_type.is_terminal();
        types.push(event.event_type);
        if terminal {
            break;
        }
    }
    types
}

/// Scenario 1: Beltalowda, all agents succeed, both synthesis tiers enabled.
#[tokio::test]
async fn test_beltalowda_full_pipeline() {
    let provider = Arc::new(
        ScriptedProvider::new("scripted")
            .with_response("survey sources\ncompare claims\nsummarise evidence")
            .with_response("finding one")
            .with_response("finding two")
            .with_response("finding three")
            .with_response("mid synthesis")
            .with_response("executive synthesis")
            .with_cost(0.01),
    );
    let state = state_with_provider(provider).await;

    let id = state
        .supervisor
        .submit(
            "beltalowda",
            "summarise X",
            json!({
                "num_workers": 3,
                "group_size": 3,
                "enable_mid": true,
                "enable_executive": true,
            }),
            None,
        )
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&state, id).await, TaskStatus::Completed);

    let result = state.supervisor.result(id).unwrap().unwrap();
    assert_eq!(result.agent_results.len(), 3);
    assert_eq!(result.successful_agents(), 3);
    assert_eq!(result.final_synthesis.as_deref(), Some("executive synthesis"));
    assert!(result.total_cost > 0.0);

    let types = collect_event_types(&state, id).await;
    assert_eq!(types.first(), Some(&EventType::WorkflowStarted));
    assert_eq!(types.get(1), Some(&EventType::TaskDecomposed));
    assert_eq!(types.last(), Some(&EventType::WorkflowCompleted));
    assert_eq!(
        types.iter().filter(|t| **t == EventType::AgentStarted).count(),
        3
    );
    assert_eq!(
        types.iter().filter(|t| **t == EventType::AgentCompleted).count(),
        3
    );
    // Mid synthesis, then executive: two started/completed pairs in order.
    assert_eq!(
        types
            .iter()
            .filter(|t| **t == EventType::SynthesisStarted)
            .count(),
        2
    );
    assert_eq!(
        types
            .iter()
            .filter(|t| **t == EventType::SynthesisCompleted)
            .count(),
        2
    );

    // Sequence numbers observed through a replaying subscriber are dense.
    let mut subscription = state.bus.subscribe(id, Some(0)).unwrap();
    let mut expected_seq = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), subscription.next()).await
    {
        assert_eq!(event.seq, expected_seq);
        expected_seq += 1;
        if event.event_type.is_terminal() {
            break;
        }
    }
}

/// Scenario 2: one failing subtask degrades, the workflow still completes.
#[tokio::test]
async fn test_beltalowda_partial_failure_still_completes() {
    let provider = Arc::new(
        ScriptedProvider::new("scripted")
            .with_response("a\nb\nc")
            .with_response("finding one")
            .with_failure("provider exploded")
            .with_response("finding three")
            .with_response("mid synthesis")
            .with_response("executive synthesis"),
    );
    let state = state_with_provider(provider).await;

    let id = state
        .supervisor
        .submit(
            "beltalowda",
            "summarise X",
            json!({ "num_workers": 3, "group_size": 3 }),
            None,
        )
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&state, id).await, TaskStatus::Completed);

    let result = state.supervisor.result(id).unwrap().unwrap();
    let failed: Vec<_> = result
        .agent_results
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap().contains("provider exploded"));
    assert_eq!(result.successful_agents(), 2);
    assert!(result.final_synthesis.is_some());

    let types = collect_event_types(&state, id).await;
    assert_eq!(types.last(), Some(&EventType::WorkflowCompleted));
}

/// Scenario 3: swarm with an explicit agent-type allow-list runs exactly one
/// agent per requested specialisation.
#[tokio::test]
async fn test_swarm_explicit_agent_types() {
    let provider = Arc::new(ScriptedProvider::new("scripted"));
    let state = state_with_provider(provider).await;

    let id = state
        .supervisor
        .submit(
            "swarm",
            "reviews of gadget Y",
            json!({
                "num_agents": 4,
                "agent_types": ["product", "social", "news", "technical"],
            }),
            None,
        )
        .await
        .unwrap();

    assert_eq!(wait_for_terminal(&state, id).await, TaskStatus::Completed);

    let mut subscription = state.bus.subscribe(id, Some(0)).unwrap();
    let mut started_types = Vec::new();
    let mut completed = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), subscription.next()).await
    {
        match event.event_type {
            EventType::AgentStarted => {
                started_types.push(event.payload["agent_type"].as_str().unwrap().to_string());
            }
            EventType::AgentCompleted => completed += 1,
            t if t.is_terminal() => break,
            _ => {}
        }
    }

    assert_eq!(started_types.len(), 4);
    assert_eq!(completed, 4);
    started_types.sort();
    assert_eq!(started_types, vec!["news", "product", "social", "technical"]);
}

/// Scenario 4: cancellation mid-flight reaches `cancelled` within the grace
/// bound, and a second cancel is a successful no-op.
#[tokio::test]
async fn test_cancellation_mid_flight() {
    let provider = Arc::new(
        ScriptedProvider::new("scripted").with_delay(Duration::from_secs(2)),
    );
    let state = state_with_provider(provider).await;

    let id = state
        .supervisor
        .submit(
            "beltalowda",
            "slow research",
            json!({ "num_workers": 5 }),
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let cancel_started = std::time::Instant::now();
    state.supervisor.cancel(id).await.unwrap();
    assert!(cancel_started.elapsed() < Duration::from_millis(5500));

    let record = state.supervisor.status(id).unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);

    let types = collect_event_types(&state, id).await;
    assert_eq!(types.last(), Some(&EventType::WorkflowCancelled));

    // completed_before_cancel is observable and below the agent count.
    let mut subscription = state.bus.subscribe(id, Some(0)).unwrap();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), subscription.next()).await
    {
        if event.event_type == EventType::WorkflowCancelled {
            let before = event.payload["completed_before_cancel"].as_u64().unwrap();
            assert!(before < 5);
            break;
        }
    }

    // Idempotent: cancelling a terminal workflow succeeds.
    state.supervisor.cancel(id).await.unwrap();
}

/// Unknown workflows surface `unknown_workflow` at the verb boundary.
#[tokio::test]
async fn test_status_unknown_workflow() {
    let provider = Arc::new(ScriptedProvider::new("scripted"));
    let state = state_with_provider(provider).await;

    let err = state.supervisor.status(Uuid::new_v4()).unwrap_err();
    assert_eq!(err.kind(), protocol::ErrorKind::UnknownWorkflow);
}
