// tests/advisers.rs

mod common;
use crate::common::builders::{NodeBuilder, PlanBuilder};
use crate::common::steps::ScriptedStep;
use crate::common::{TestHarness, init_tracing};

use std::sync::Arc;

use serde_json::json;

use nodeflow::errors::EngineError;
use nodeflow::execution::{FailureInfo, Status, StepResponse};
use nodeflow::interrupts::{InterruptState, InterruptType};
use nodeflow::steps::{StepCapability, StepRegistry};

fn harness_with(step_type: &str, step: Arc<ScriptedStep>) -> TestHarness {
    let mut registry = StepRegistry::with_builtins();
    registry.register(step_type, StepCapability::Sync(step));
    TestHarness::with_registry(registry)
}

#[tokio::test]
async fn retry_adviser_creates_linked_attempts_until_success() {
    init_tracing();
    let step = Arc::new(ScriptedStep::failing_then_succeeding(2, "flaky"));
    let harness = harness_with("flaky", Arc::clone(&step));
    let plan = PlanBuilder::new()
        .node(NodeBuilder::new("before", "log").next("work").build())
        .node(
            NodeBuilder::new("work", "flaky")
                .adviser("retry", json!({ "max_attempts": 3 }))
                .next("after")
                .build(),
        )
        .node(NodeBuilder::new("after", "log").build())
        .build();

    let id = harness.trigger(plan).await;

    assert_eq!(harness.status(&id), Status::Succeeded);
    assert_eq!(step.calls(), 3);

    let attempts = harness.attempts(&id, "work");
    assert_eq!(attempts.len(), 3);
    for old in &attempts[..2] {
        assert!(old.old_retry);
        assert_eq!(old.status, Status::Failed);
        assert!(old.next_id.is_none());
    }
    let current = &attempts[2];
    assert!(!current.old_retry);
    assert_eq!(current.status, Status::Succeeded);
    assert_eq!(
        current.retry_ids,
        vec![attempts[0].id.clone(), attempts[1].id.clone()]
    );

    let before = harness.node(&id, "before");
    assert_eq!(before.next_id.as_deref(), Some(current.id.as_str()));
    assert_eq!(current.previous_id.as_deref(), Some(before.id.as_str()));
    assert_eq!(
        harness.node(&id, "after").previous_id.as_deref(),
        Some(current.id.as_str())
    );
}

#[tokio::test]
async fn retry_adviser_gives_up_after_max_attempts() {
    init_tracing();
    let step = Arc::new(ScriptedStep::failing_then_succeeding(10, "always"));
    let harness = harness_with("broken", Arc::clone(&step));
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("work", "broken")
                .adviser("retry", json!({ "max_attempts": 2 }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;

    assert_eq!(step.calls(), 3);
    let current = harness.node(&id, "work");
    assert_eq!(current.status, Status::Failed);
    assert_eq!(current.retry_ids.len(), 2);
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn retryable_only_skips_permanent_failures_and_falls_through() {
    init_tracing();
    let step = Arc::new(ScriptedStep::new(vec![StepResponse::failed(
        FailureInfo::new("permanent"),
    )]));
    let harness = harness_with("permanent", Arc::clone(&step));
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("work", "permanent")
                .adviser("retry", json!({ "max_attempts": 5, "retryable_only": true }))
                .adviser("ignore", json!(null))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;

    assert_eq!(step.calls(), 1);
    assert_eq!(harness.node(&id, "work").status, Status::IgnoreFailed);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn retryable_failures_are_retried() {
    init_tracing();
    let step = Arc::new(ScriptedStep::new(vec![
        StepResponse::failed(FailureInfo::retryable("blip")),
        StepResponse::succeeded(),
    ]));
    let harness = harness_with("net", Arc::clone(&step));
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("work", "net")
                .adviser("retry", json!({ "retryable_only": true }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;

    assert_eq!(step.calls(), 2);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn ignore_adviser_lets_the_graph_continue() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("lint", "fail")
                .adviser("ignore", json!(null))
                .next("deploy")
                .build(),
        )
        .node(NodeBuilder::new("deploy", "log").build())
        .build();

    let id = harness.trigger(plan).await;

    assert_eq!(harness.node(&id, "lint").status, Status::IgnoreFailed);
    assert_eq!(harness.node(&id, "deploy").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn ignored_failure_on_the_last_node_still_succeeds_the_plan() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("lint", "fail")
                .adviser("ignore", json!(null))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;

    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn mark_failed_adviser_stops_later_advisers() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("work", "fail")
                .adviser("mark_failed", json!(null))
                .adviser("ignore", json!(null))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;

    assert_eq!(harness.node(&id, "work").status, Status::Failed);
    assert_eq!(harness.status(&id), Status::Failed);
}

fn intervention_plan(step_type: &str) -> nodeflow::plan::Plan {
    PlanBuilder::new()
        .node(
            NodeBuilder::new("work", step_type)
                .adviser("manual_intervention", json!(null))
                .next("after")
                .build(),
        )
        .node(NodeBuilder::new("after", "log").build())
        .build()
}

#[tokio::test]
async fn manual_intervention_parks_node_and_plan() {
    init_tracing();
    let harness = TestHarness::new();

    let id = harness.trigger(intervention_plan("fail")).await;

    let work = harness.node(&id, "work");
    assert_eq!(work.status, Status::InterventionWaiting);
    assert!(work.failure_info.is_some());
    assert!(work.end_ts.is_none());
    assert_eq!(harness.status(&id), Status::InterventionWaiting);
    assert!(harness.try_node(&id, "after").is_none());
}

#[tokio::test]
async fn mark_success_resolves_intervention_and_continues() {
    init_tracing();
    let harness = TestHarness::new();
    let id = harness.trigger(intervention_plan("fail")).await;
    let work = harness.node(&id, "work");

    let interrupt_id = harness
        .orchestrator
        .register_interrupt(&id, InterruptType::MarkSuccess, Some(&work.id))
        .await
        .unwrap();

    let work = harness.node(&id, "work");
    assert_eq!(work.status, Status::Succeeded);
    assert_eq!(work.interrupt_history.len(), 1);
    assert_eq!(work.interrupt_history[0].interrupt_id, interrupt_id);
    assert_eq!(
        work.interrupt_history[0].from_status,
        Status::InterventionWaiting
    );
    assert_eq!(harness.node(&id, "after").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);

    let history = harness.orchestrator.interrupt_history(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, InterruptState::ProcessedSuccessfully);
}

#[tokio::test]
async fn mark_failed_resolves_intervention_as_failure() {
    init_tracing();
    let harness = TestHarness::new();
    let id = harness.trigger(intervention_plan("fail")).await;
    let work = harness.node(&id, "work");

    harness
        .orchestrator
        .register_interrupt(&id, InterruptType::MarkFailed, Some(&work.id))
        .await
        .unwrap();

    assert_eq!(harness.node(&id, "work").status, Status::Failed);
    assert!(harness.try_node(&id, "after").is_none());
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn ignore_interrupt_resolves_intervention_as_ignored() {
    init_tracing();
    let harness = TestHarness::new();
    let id = harness.trigger(intervention_plan("fail")).await;
    let work = harness.node(&id, "work");

    harness
        .orchestrator
        .register_interrupt(&id, InterruptType::Ignore, Some(&work.id))
        .await
        .unwrap();

    assert_eq!(harness.node(&id, "work").status, Status::IgnoreFailed);
    assert_eq!(harness.node(&id, "after").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn retry_interrupt_starts_a_fresh_attempt() {
    init_tracing();
    let step = Arc::new(ScriptedStep::failing_then_succeeding(1, "first try"));
    let harness = harness_with("flaky", Arc::clone(&step));
    let id = harness.trigger(intervention_plan("flaky")).await;
    let parked = harness.node(&id, "work");
    assert_eq!(parked.status, Status::InterventionWaiting);

    harness
        .orchestrator
        .register_interrupt(&id, InterruptType::Retry, Some(&parked.id))
        .await
        .unwrap();

    assert_eq!(step.calls(), 2);
    let attempts = harness.attempts(&id, "work");
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].old_retry);
    assert_eq!(attempts[0].status, Status::Failed);
    assert_eq!(attempts[0].interrupt_history.len(), 1);
    assert_eq!(attempts[1].status, Status::Succeeded);
    assert_eq!(attempts[1].retry_ids, vec![parked.id.clone()]);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn node_level_interrupt_on_a_node_not_waiting_is_rejected_and_discarded() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("gate", "wait_for_signal")
                .params(json!({ "callback_ids": ["go"] }))
                .build(),
        )
        .build();
    let id = harness.trigger(plan).await;
    let gate = harness.node(&id, "gate");

    let err = harness
        .orchestrator
        .register_interrupt(&id, InterruptType::MarkSuccess, Some(&gate.id))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidInterrupt(_)));
    assert_eq!(harness.node(&id, "gate").status, Status::AsyncWaiting);
    let history = harness.orchestrator.interrupt_history(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, InterruptState::Discarded);
}

#[tokio::test]
async fn node_level_interrupt_without_a_node_is_rejected() {
    init_tracing();
    let harness = TestHarness::new();
    let id = harness.trigger(intervention_plan("fail")).await;

    let err = harness
        .orchestrator
        .register_interrupt(&id, InterruptType::Retry, None)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidInterrupt(_)));
    assert_eq!(harness.status(&id), Status::InterventionWaiting);
}
