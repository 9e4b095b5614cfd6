//! Orchestrator registry tests: listings, dispatch eligibility and eviction.

use std::time::Duration;

use warden::agent::{AgentId, AgentStatus};
use warden::config::OrchestratorConfig;
use warden::workflow::{ExecutionStatus, Workflow, WorkflowStep};

use crate::fixtures::{new_log, wait_until, Harness, RecordingAgent, WAIT};

/// Test: Register then deregister
/// Given two agents of one type
/// When one of them stops
/// Then only the other is listed for the type
#[tokio::test]
async fn test_register_then_deregister() {
    let mut harness = Harness::start().await;
    let log = new_log();
    let first = harness
        .spawn_agent("n-1", RecordingAgent::new("n-1", "notifier", &log))
        .await;
    harness
        .spawn_agent("n-2", RecordingAgent::new("n-2", "notifier", &log))
        .await;
    assert_eq!(harness.orchestrator.get_agents_by_type("notifier").len(), 2);

    harness.agents[first].stop().await.unwrap();

    let orchestrator = &harness.orchestrator;
    assert!(wait_until(WAIT, || orchestrator.get_agents_by_type("notifier").len() == 1).await);
    let remaining = harness.orchestrator.get_agents_by_type("notifier");
    assert_eq!(remaining[0].agent_id, AgentId::from("n-2"));
    assert!(!harness
        .orchestrator
        .get_registered_agents()
        .contains_key(&AgentId::from("n-1")));
    harness.shutdown().await;
}

/// Test: Listings are copies
/// Given a registered agent
/// When the caller mutates the returned map
/// Then the orchestrator's registry is unchanged
#[tokio::test]
async fn test_registered_agents_returns_copy() {
    let mut harness = Harness::start().await;
    let log = new_log();
    harness
        .spawn_agent("n-1", RecordingAgent::new("n-1", "notifier", &log))
        .await;

    let mut agents = harness.orchestrator.get_registered_agents();
    agents.clear();
    if let Some(meta) = harness
        .orchestrator
        .get_agents_by_type("notifier")
        .first_mut()
    {
        meta.status = AgentStatus::Error;
    }

    let stored = harness.orchestrator.get_registered_agents();
    assert_eq!(stored.len(), 1);
    assert_ne!(stored[&AgentId::from("n-1")].status, AgentStatus::Error);
    harness.shutdown().await;
}

/// Test: Paused agents are not selected
/// Given a paused and a running agent of one type
/// When steps of that type are dispatched
/// Then every step goes to the running agent
#[tokio::test]
async fn test_paused_agent_excluded_from_dispatch() {
    let mut harness = Harness::start().await;
    let log = new_log();
    let paused = harness
        .spawn_agent("w-1", RecordingAgent::new("w-1", "worker", &log))
        .await;
    harness
        .spawn_agent("w-2", RecordingAgent::new("w-2", "worker", &log))
        .await;

    harness.agents[paused].pause().unwrap();
    let orchestrator = &harness.orchestrator;
    let w1 = AgentId::from("w-1");
    assert!(
        wait_until(WAIT, || orchestrator
            .get_registered_agents()
            .get(&w1)
            .map(|m| m.status == AgentStatus::Paused)
            .unwrap_or(false))
        .await
    );

    let mut workflow = Workflow::new("spread", "Spread");
    for step in ["s1", "s2", "s3"] {
        workflow = workflow.with_step(WorkflowStep::new(step, "worker", "work"));
    }
    harness.orchestrator.register_workflow(workflow).unwrap();
    let id = harness.orchestrator.execute_workflow("spread").unwrap();
    let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert!(log.lock().iter().all(|seen| seen.agent == "w-2"));
    assert_eq!(harness.orchestrator.get_agents_by_type("worker").len(), 2);
    harness.shutdown().await;
}

/// Test: No eviction by default
/// Given the default orchestrator config
/// When an agent goes silent
/// Then it stays registered
#[tokio::test]
async fn test_silent_agent_kept_without_eviction_policy() {
    let mut harness = Harness::start().await;
    let log = new_log();
    let index = harness
        .spawn_agent("w-1", RecordingAgent::new("w-1", "worker", &log))
        .await;

    // Dropping the runtime cancels its tasks without deregistering.
    drop(harness.agents.remove(index));
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(harness
        .orchestrator
        .get_registered_agents()
        .contains_key(&AgentId::from("w-1")));
    harness.shutdown().await;
}

/// Test: Opt-in stale eviction
/// Given `stale_after_ms` configured
/// When an agent stops heartbeating without deregistering
/// Then the health monitor evicts it, while a live agent stays
#[tokio::test]
async fn test_stale_agent_evicted_when_configured() {
    let config = OrchestratorConfig {
        stale_after_ms: Some(120),
        health_check_interval_ms: 20,
        ..OrchestratorConfig::default()
    };
    let mut harness = Harness::start_with(config).await;
    let log = new_log();
    let silent = harness
        .spawn_agent("w-1", RecordingAgent::new("w-1", "worker", &log))
        .await;
    harness
        .spawn_agent("w-2", RecordingAgent::new("w-2", "worker", &log))
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.orchestrator.get_agents_by_type("worker").len(), 2);

    drop(harness.agents.remove(silent));

    let orchestrator = &harness.orchestrator;
    let gone = AgentId::from("w-1");
    assert!(
        wait_until(WAIT, || !orchestrator
            .get_registered_agents()
            .contains_key(&gone))
        .await
    );
    assert!(harness
        .orchestrator
        .get_registered_agents()
        .contains_key(&AgentId::from("w-2")));
    harness.shutdown().await;
}
