//! Readiness probe: retry, backoff budget, error attribution.

use std::time::Duration;

use crate::session::{RemoteSession, SessionError, SessionOptions};
use crate::test_support::ScriptedRunner;

use super::*;

fn probe_policy(max_attempts: u32) -> ReadyPolicy {
    ReadyPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        backoff_multiplier: 2,
    }
}

fn scripted_session(runner: &ScriptedRunner) -> RemoteSession<ScriptedRunner> {
    RemoteSession::new(
        "198.51.100.10",
        "centos",
        FIXTURE_PRIVATE_KEY,
        SessionOptions::default(),
        runner.clone(),
    )
    .expect("session should build")
}

#[tokio::test]
async fn a_node_that_answers_immediately_is_ready() {
    let gateway = FakeGateway::new();
    let node = lifecycle(&gateway);
    let runner = ScriptedRunner::new();
    runner.push_success();
    let session = scripted_session(&runner);

    node.wait_until_ready(&session, &probe_policy(3))
        .await
        .expect("node should be ready");

    assert_eq!(runner.invocations().len(), 1);
}

#[tokio::test]
async fn refused_probes_are_retried_until_one_succeeds() {
    let gateway = FakeGateway::new();
    let node = lifecycle(&gateway);
    let runner = ScriptedRunner::new();
    runner.push_exit_code(255);
    runner.push_exit_code(255);
    runner.push_success();
    let session = scripted_session(&runner);

    node.wait_until_ready(&session, &probe_policy(5))
        .await
        .expect("node should become ready");

    assert_eq!(runner.invocations().len(), 3);
}

#[tokio::test]
async fn an_exhausted_budget_reports_never_ready() {
    let gateway = FakeGateway::new();
    let node = lifecycle(&gateway);
    let runner = ScriptedRunner::new();
    runner.push_exit_code(255);
    runner.push_exit_code(255);
    runner.push_exit_code(255);
    let session = scripted_session(&runner);

    let err = node
        .wait_until_ready(&session, &probe_policy(3))
        .await
        .expect_err("node should never be ready");

    match err {
        NodeError::NeverReady { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(source.is_none());
        }
        other => panic!("expected never-ready, got {other:?}"),
    }
}

#[tokio::test]
async fn the_last_spawn_failure_becomes_the_cause() {
    let gateway = FakeGateway::new();
    let node = lifecycle(&gateway);
    // No scripted responses, so every probe fails to spawn.
    let runner = ScriptedRunner::new();
    let session = scripted_session(&runner);

    let err = node
        .wait_until_ready(&session, &probe_policy(2))
        .await
        .expect_err("node should never be ready");

    match err {
        NodeError::NeverReady { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(source, Some(SessionError::Spawn { .. })));
        }
        other => panic!("expected never-ready, got {other:?}"),
    }
}
