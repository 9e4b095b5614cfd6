//! End-to-end workflow execution tests.
//!
//! Workflows are registered with a running orchestrator and executed against
//! real agent runtimes over the in-memory broker.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use warden::orchestration::WORKFLOW_CONTEXT_KEY;
use warden::workflow::{ExecutionStatus, Workflow, WorkflowStep};
use warden::Error;

use crate::fixtures::{new_log, EchoAgent, FlakyAgent, Harness, RecordingAgent, WAIT};

fn fan_out() -> Workflow {
    Workflow::new("incident", "Incident response")
        .with_description("detect, then evaluate and notify in parallel")
        .with_step(WorkflowStep::new("a", "detector", "scan"))
        .with_step(WorkflowStep::new("b", "rules", "evaluate").depends_on(["a"]))
        .with_step(WorkflowStep::new("c", "notifier", "alert").depends_on(["a"]))
}

/// Test: Fan-out ordering
/// Given workflow {A, B <- A, C <- A} and one agent per type
/// When the workflow executes
/// Then A runs first, B and C only after A, and the execution completes
#[tokio::test]
async fn test_fan_out_workflow_completes_in_dependency_order() {
    let mut harness = Harness::start().await;
    let log = new_log();
    harness
        .spawn_agent("det-1", RecordingAgent::new("det-1", "detector", &log))
        .await;
    harness
        .spawn_agent("rul-1", RecordingAgent::new("rul-1", "rules", &log))
        .await;
    harness
        .spawn_agent("not-1", RecordingAgent::new("not-1", "notifier", &log))
        .await;

    harness.orchestrator.register_workflow(fan_out()).unwrap();
    let id = harness.orchestrator.execute_workflow("incident").unwrap();
    let exec = harness
        .orchestrator
        .await_execution(&id, WAIT)
        .await
        .unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    for step in ["a", "b", "c"] {
        assert!(exec.completed_steps.contains(step), "{} not completed", step);
    }
    assert!(exec.failed_steps.is_empty());
    assert_eq!(exec.step_results["a"]["by"], "det-1");
    assert!(exec.started_at.is_some());
    assert!(exec.completed_at.is_some());

    let order: Vec<String> = log
        .lock()
        .iter()
        .filter_map(|seen| seen.step_id.clone())
        .collect();
    assert_eq!(order.len(), 3);
    assert_eq!(order[0], "a");
    let mut rest = order[1..].to_vec();
    rest.sort();
    assert_eq!(rest, vec!["b", "c"]);
    harness.shutdown().await;
}

/// Test: Step messages carry execution context
/// Given a two-step chain
/// When the second step is dispatched
/// Then its payload holds the template fields and the first step's result
#[tokio::test]
async fn test_step_payload_carries_dependency_results() {
    let mut harness = Harness::start().await;
    let log = new_log();
    harness
        .spawn_agent("det-1", RecordingAgent::new("det-1", "detector", &log))
        .await;
    harness
        .spawn_agent("not-1", RecordingAgent::new("not-1", "notifier", &log))
        .await;

    let mut template = warden::Payload::new();
    template.insert("channel".to_string(), json!("#ops"));
    let workflow = Workflow::new("chain", "Chain")
        .with_step(WorkflowStep::new("detect", "detector", "scan"))
        .with_step(
            WorkflowStep::new("notify", "notifier", "alert")
                .with_payload(template)
                .depends_on(["detect"]),
        );
    harness.orchestrator.register_workflow(workflow).unwrap();
    let id = harness.orchestrator.execute_workflow("chain").unwrap();
    let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let seen = log.lock();
    let notify = seen
        .iter()
        .find(|s| s.step_id.as_deref() == Some("notify"))
        .unwrap();
    assert_eq!(notify.message_type, "alert");
    assert_eq!(notify.payload["channel"], "#ops");
    let context = &notify.payload[WORKFLOW_CONTEXT_KEY];
    assert_eq!(context["workflow_id"], "chain");
    assert_eq!(context["execution_id"], json!(id.to_string()));
    assert_eq!(context["attempt"], 1);
    assert_eq!(context["dependency_results"]["detect"]["by"], "det-1");
    drop(seen);
    harness.shutdown().await;
}

/// Test: Retries recover transient failures
/// Given a step with two retries and an agent that fails twice
/// When the workflow executes
/// Then the third attempt succeeds and the execution completes
#[tokio::test]
async fn test_step_retries_until_success() {
    let mut harness = Harness::start().await;
    let calls = Arc::new(AtomicU32::new(0));
    harness
        .spawn_agent("flaky-1", FlakyAgent::new("flaky", 2, &calls))
        .await;

    let workflow = Workflow::new("retry", "Retry")
        .with_step(WorkflowStep::new("only", "flaky", "work").with_retries(2));
    harness.orchestrator.register_workflow(workflow).unwrap();
    let id = harness.orchestrator.execute_workflow("retry").unwrap();
    let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(exec.step_results["only"]["call"], 3);
    harness.shutdown().await;
}

/// Test: Exhausted retries fail the execution
/// Given a step with one retry and an agent that always fails
/// When the workflow executes
/// Then the step runs twice, the execution fails and dependents never run
#[tokio::test]
async fn test_exhausted_retries_fail_fast() {
    let mut harness = Harness::start().await;
    let calls = Arc::new(AtomicU32::new(0));
    let log = new_log();
    harness
        .spawn_agent("flaky-1", FlakyAgent::new("flaky", u32::MAX, &calls))
        .await;
    harness
        .spawn_agent("not-1", RecordingAgent::new("not-1", "notifier", &log))
        .await;

    let workflow = Workflow::new("doomed", "Doomed")
        .with_step(WorkflowStep::new("work", "flaky", "work").with_retries(1))
        .with_step(WorkflowStep::new("notify", "notifier", "alert").depends_on(["work"]));
    harness.orchestrator.register_workflow(workflow).unwrap();
    let id = harness.orchestrator.execute_workflow("doomed").unwrap();
    let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.failed_steps.contains("work"));
    assert!(exec.completed_steps.is_empty());
    assert!(exec.error.as_deref().unwrap().contains("transient failure 2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(log.lock().is_empty());
    harness.shutdown().await;
}

/// Test: Step timeout counts as a failed attempt
/// Given a step whose agent is slower than the step timeout
/// When the workflow executes
/// Then the execution fails with a timeout message
#[tokio::test]
async fn test_step_timeout_fails_execution() {
    let mut harness = Harness::start().await;
    harness.spawn_agent("echo-1", EchoAgent).await;

    let mut payload = warden::Payload::new();
    payload.insert("ms".to_string(), json!(300));
    let workflow = Workflow::new("slow", "Slow").with_step(
        WorkflowStep::new("wait", "echo", "slow")
            .with_payload(payload)
            .with_timeout(Duration::from_millis(40)),
    );
    harness.orchestrator.register_workflow(workflow).unwrap();
    let id = harness.orchestrator.execute_workflow("slow").unwrap();
    let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.unwrap().contains("no response from echo-1"));
    harness.shutdown().await;
}

/// Test: No agent for a step type
/// Given no registered agent of the step's type
/// When the workflow executes
/// Then the execution fails instead of hanging
#[tokio::test]
async fn test_missing_agent_type_fails_execution() {
    let harness = Harness::start().await;
    harness.orchestrator.register_workflow(fan_out()).unwrap();

    let id = harness.orchestrator.execute_workflow("incident").unwrap();
    let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();

    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.failed_steps.contains("a"));
    assert!(exec.error.unwrap().contains("no running agent of type detector"));
    harness.shutdown().await;
}

/// Test: Round-robin instance selection
/// Given two running instances of one type
/// When four independent steps of that type run
/// Then each instance handles two of them
#[tokio::test]
async fn test_round_robin_across_instances() {
    let mut harness = Harness::start().await;
    let log = new_log();
    harness
        .spawn_agent("w-1", RecordingAgent::new("w-1", "worker", &log))
        .await;
    harness
        .spawn_agent("w-2", RecordingAgent::new("w-2", "worker", &log))
        .await;

    let mut workflow = Workflow::new("spread", "Spread");
    for step in ["s1", "s2", "s3", "s4"] {
        workflow = workflow.with_step(WorkflowStep::new(step, "worker", "work"));
    }
    harness.orchestrator.register_workflow(workflow).unwrap();
    let id = harness.orchestrator.execute_workflow("spread").unwrap();
    let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);

    let seen = log.lock();
    let by_w1 = seen.iter().filter(|s| s.agent == "w-1").count();
    let by_w2 = seen.iter().filter(|s| s.agent == "w-2").count();
    assert_eq!((by_w1, by_w2), (2, 2));
    drop(seen);
    harness.shutdown().await;
}

/// Test: Empty workflow
/// Given a workflow without steps
/// When it executes
/// Then it completes immediately
#[tokio::test]
async fn test_empty_workflow_completes() {
    let harness = Harness::start().await;
    harness
        .orchestrator
        .register_workflow(Workflow::new("noop", "No-op"))
        .unwrap();

    let id = harness.orchestrator.execute_workflow("noop").unwrap();
    let exec = harness.orchestrator.get_execution_status(&id).unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    harness.shutdown().await;
}

/// Test: Invalid workflow definitions are rejected at registration
/// Given workflows with a dangling dependency, a cycle and a duplicate id
/// When they are registered
/// Then each is rejected and none is listed
#[tokio::test]
async fn test_invalid_workflows_rejected() {
    let harness = Harness::start().await;

    let dangling = Workflow::new("dangling", "Dangling")
        .with_step(WorkflowStep::new("a", "x", "run").depends_on(["nope"]));
    assert!(matches!(
        harness.orchestrator.register_workflow(dangling),
        Err(Error::Validation(_))
    ));

    let cyclic = Workflow::new("cyclic", "Cyclic")
        .with_step(WorkflowStep::new("a", "x", "run").depends_on(["b"]))
        .with_step(WorkflowStep::new("b", "x", "run").depends_on(["a"]));
    assert!(harness.orchestrator.register_workflow(cyclic).is_err());

    harness.orchestrator.register_workflow(fan_out()).unwrap();
    assert!(harness.orchestrator.register_workflow(fan_out()).is_err());

    let listed: Vec<String> = harness
        .orchestrator
        .list_workflows()
        .into_iter()
        .map(|w| w.workflow_id)
        .collect();
    assert_eq!(listed, vec!["incident"]);

    assert!(matches!(
        harness.orchestrator.execute_workflow("dangling"),
        Err(Error::WorkflowNotFound(_))
    ));
    harness.shutdown().await;
}

/// Test: Concurrent executions are independent
/// Given one registered workflow
/// When it is executed twice
/// Then both executions complete with distinct ids
#[tokio::test]
async fn test_concurrent_executions() {
    let mut harness = Harness::start().await;
    let log = new_log();
    for (id, agent_type) in [("det-1", "detector"), ("rul-1", "rules"), ("not-1", "notifier")] {
        harness
            .spawn_agent(id, RecordingAgent::new(id, agent_type, &log))
            .await;
    }
    harness.orchestrator.register_workflow(fan_out()).unwrap();

    let first = harness.orchestrator.execute_workflow("incident").unwrap();
    let second = harness.orchestrator.execute_workflow("incident").unwrap();
    assert_ne!(first, second);

    for id in [first, second] {
        let exec = harness.orchestrator.await_execution(&id, WAIT).await.unwrap();
        assert_eq!(exec.status, ExecutionStatus::Completed);
    }
    assert_eq!(log.lock().len(), 6);
    harness.shutdown().await;
}
