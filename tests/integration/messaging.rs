//! Request/response and broadcast tests against live agent runtimes.

use std::time::Duration;

use serde_json::json;

use warden::agent::AgentId;
use warden::protocol::Payload;
use warden::transport::{Connection, Transport};

use crate::fixtures::{new_log, wait_until, EchoAgent, Harness, RecordingAgent, WAIT};

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Test: Request/response round trip
/// Given a running echo agent
/// When a client sends an `echo` request
/// Then the response carries the payload and the pending table drains
#[tokio::test]
async fn test_request_response_round_trip() {
    let mut harness = Harness::start().await;
    harness.spawn_agent("echo-1", EchoAgent).await;
    let (client, _listener) = harness.client("client").await;

    let response = client
        .send_request(
            &AgentId::from("echo-1"),
            "echo",
            payload(json!({"text": "hello"})),
            WAIT,
        )
        .await
        .expect("echo should answer");

    assert!(response.is_success());
    assert_eq!(response.result().unwrap()["echo"]["text"], "hello");
    assert!(response.correlation_id().is_some());
    assert_eq!(client.pending_requests(), 0);

    let metadata = harness.agents[0].metadata();
    assert_eq!(metadata.processed_messages, 1);
    assert_eq!(metadata.error_count, 0);
    harness.shutdown().await;
}

/// Test: Undeclared message types still reach the agent
/// Given an echo agent that does not declare `translate`
/// When a `translate` request is sent
/// Then the agent answers with a failure instead of being skipped
#[tokio::test]
async fn test_undeclared_message_type_is_dispatched() {
    let mut harness = Harness::start().await;
    harness.spawn_agent("echo-1", EchoAgent).await;
    let (client, _listener) = harness.client("client").await;

    let response = client
        .send_request(&AgentId::from("echo-1"), "translate", Payload::new(), WAIT)
        .await
        .expect("agent should answer");

    assert!(!response.is_success());
    assert_eq!(response.error(), Some("unsupported message type: translate"));
    assert!(response.result().is_none());
    harness.shutdown().await;
}

/// Test: Handler failures are isolated
/// Given an echo agent
/// When one request errors and another panics
/// Then both produce failed responses and the next request still succeeds
#[tokio::test]
async fn test_handler_failures_do_not_kill_listener() {
    let mut harness = Harness::start().await;
    harness.spawn_agent("echo-1", EchoAgent).await;
    let (client, _listener) = harness.client("client").await;
    let echo = AgentId::from("echo-1");

    let failed = client
        .send_request(&echo, "fail", Payload::new(), WAIT)
        .await
        .unwrap();
    assert_eq!(failed.error(), Some("requested failure"));

    let panicked = client
        .send_request(&echo, "panic", Payload::new(), WAIT)
        .await
        .unwrap();
    assert!(panicked.error().unwrap().contains("requested panic"));

    let ok = client
        .send_request(&echo, "echo", Payload::new(), WAIT)
        .await
        .unwrap();
    assert!(ok.is_success());

    let metadata = harness.agents[0].metadata();
    assert_eq!(metadata.processed_messages, 3);
    assert_eq!(metadata.error_count, 2);
    harness.shutdown().await;
}

/// Test: Timeouts are soft
/// Given an echo agent that sleeps longer than the request timeout
/// When the client waits
/// Then `None` is returned and the pending table is back to its size
#[tokio::test]
async fn test_request_timeout_is_soft() {
    let mut harness = Harness::start().await;
    harness.spawn_agent("echo-1", EchoAgent).await;
    let (client, _listener) = harness.client("client").await;

    for _ in 0..3 {
        let started = tokio::time::Instant::now();
        let response = client
            .send_request(
                &AgentId::from("echo-1"),
                "slow",
                payload(json!({"ms": 200})),
                Duration::from_millis(30),
            )
            .await;
        let elapsed = started.elapsed();
        assert!(response.is_none());
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(200));
    }
    assert_eq!(client.pending_requests(), 0);
    harness.shutdown().await;
}

/// Test: Request to nobody
/// Given no agent with the target id
/// When a request is sent
/// Then it times out with `None`
#[tokio::test]
async fn test_request_to_unknown_agent_times_out() {
    let harness = Harness::start().await;
    let (client, _listener) = harness.client("client").await;

    let started = tokio::time::Instant::now();
    let response = client
        .send_request(
            &AgentId::from("ghost"),
            "echo",
            Payload::new(),
            Duration::from_millis(50),
        )
        .await;

    let elapsed = started.elapsed();
    assert!(response.is_none());
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(500));
    harness.shutdown().await;
}

/// Test: Typed broadcast
/// Given two `notifier` agents and one `detector` agent
/// When a client broadcasts to `notifier`
/// Then only the notifiers receive it
#[tokio::test]
async fn test_broadcast_by_agent_type() {
    let mut harness = Harness::start().await;
    let log = new_log();
    harness
        .spawn_agent("n-1", RecordingAgent::new("n-1", "notifier", &log))
        .await;
    harness
        .spawn_agent("n-2", RecordingAgent::new("n-2", "notifier", &log))
        .await;
    harness
        .spawn_agent("d-1", RecordingAgent::new("d-1", "detector", &log))
        .await;
    let (client, _listener) = harness.client("client").await;

    client
        .broadcast("digest", Payload::new(), Some("notifier"))
        .await
        .unwrap();

    assert!(wait_until(WAIT, || log.lock().len() >= 2).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut receivers: Vec<String> = log.lock().iter().map(|s| s.agent.clone()).collect();
    receivers.sort();
    assert_eq!(receivers, vec!["n-1", "n-2"]);
    harness.shutdown().await;
}

/// Test: Broadcast to all
/// Given agents of two types
/// When a client broadcasts without a type
/// Then every agent receives it
#[tokio::test]
async fn test_broadcast_to_all() {
    let mut harness = Harness::start().await;
    let log = new_log();
    harness
        .spawn_agent("n-1", RecordingAgent::new("n-1", "notifier", &log))
        .await;
    harness
        .spawn_agent("d-1", RecordingAgent::new("d-1", "detector", &log))
        .await;
    let (client, _listener) = harness.client("client").await;

    client.broadcast("shutdown_notice", Payload::new(), None).await.unwrap();

    assert!(wait_until(WAIT, || log.lock().len() == 2).await);
    assert!(log.lock().iter().all(|s| s.message_type == "shutdown_notice"));
    harness.shutdown().await;
}

/// Test: Fire-and-forget point-to-point
/// Given a recording agent
/// When a client sends without a correlation id
/// Then the agent processes it and nothing is published back
#[tokio::test]
async fn test_send_without_correlation_gets_no_reply() {
    let mut harness = Harness::start().await;
    let log = new_log();
    harness
        .spawn_agent("r-1", RecordingAgent::new("r-1", "recorder", &log))
        .await;
    let (client, _listener) = harness.client("client").await;
    let observer = harness.broker.connect().await.unwrap();
    let mut replies = observer
        .subscribe(&["response.client".to_string()])
        .await
        .unwrap();

    client
        .send_to(&AgentId::from("r-1"), "note", Payload::new())
        .await
        .unwrap();

    assert!(wait_until(WAIT, || log.lock().len() == 1).await);
    let reply = tokio::time::timeout(Duration::from_millis(50), replies.next()).await;
    assert!(reply.is_err(), "no reply expected");
    harness.shutdown().await;
}
