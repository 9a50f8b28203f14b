// tests/children.rs

mod common;
use crate::common::builders::{NodeBuilder, PlanBuilder};
use crate::common::{TestHarness, init_tracing};

use serde_json::json;

use nodeflow::execution::{ExecutableResponse, Status};
use nodeflow::plan::NodeGroup;

fn shell(id: &str) -> NodeBuilder {
    NodeBuilder::new(id, "shell").params(json!({ "script": format!("run {id}") }))
}

#[tokio::test]
async fn parallel_children_run_concurrently_and_parent_waits_for_all() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("fanout", "parallel")
                .group(NodeGroup::Stage)
                .children(&["a", "b"])
                .build(),
        )
        .node(shell("a").build())
        .node(shell("b").build())
        .build();

    let id = harness.trigger(plan).await;

    let parent = harness.node(&id, "fanout");
    assert_eq!(parent.status, Status::Running);
    assert!(matches!(
        parent.latest_executable_response(),
        Some(ExecutableResponse::Children { child_node_ids }) if child_node_ids.len() == 2
    ));
    assert_eq!(harness.executor.submitted().len(), 2);

    let a = harness.node(&id, "a");
    assert_eq!(a.status, Status::TaskWaiting);
    assert_eq!(a.parent_id.as_deref(), Some(parent.id.as_str()));
    assert_eq!(a.notify_id.as_deref(), Some(a.id.as_str()));
    assert_eq!(a.ambiance.levels.len(), 2);
    assert_eq!(a.ambiance.levels[0].runtime_id, parent.id);

    let task_of = |identifier: &str| {
        harness
            .node(&id, identifier)
            .latest_executable_response()
            .and_then(|r| r.task_id().map(str::to_string))
            .expect("child should be waiting on a task")
    };
    let task_a = task_of("a");
    let task_b = task_of("b");

    harness.executor.succeed(&task_b, json!({})).unwrap();
    harness.pump().await;
    assert_eq!(harness.node(&id, "b").status, Status::Succeeded);
    assert_eq!(harness.node(&id, "fanout").status, Status::Running);

    harness.executor.succeed(&task_a, json!({})).unwrap();
    harness.pump().await;

    assert_eq!(harness.node(&id, "fanout").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn one_failed_child_fails_the_parent_and_names_it() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("fanout", "parallel")
                .children(&["good", "bad"])
                .next("after")
                .build(),
        )
        .node(NodeBuilder::new("good", "log").build())
        .node(
            NodeBuilder::new("bad", "fail")
                .params(json!({ "message": "broken" }))
                .build(),
        )
        .node(NodeBuilder::new("after", "log").build())
        .build();

    let id = harness.trigger(plan).await;
    harness.pump().await;

    let parent = harness.node(&id, "fanout");
    assert_eq!(parent.status, Status::Failed);
    let message = parent.failure_info.expect("failure info").message;
    assert!(message.contains("broken"));
    assert!(message.contains("bad"));
    assert!(!message.contains("good"));
    assert!(harness.try_node(&id, "after").is_none());
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn ignored_child_failure_does_not_fail_the_parent() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("fanout", "parallel")
                .children(&["flaky"])
                .build(),
        )
        .node(
            NodeBuilder::new("flaky", "fail")
                .adviser("ignore", json!(null))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;
    harness.pump().await;

    assert_eq!(harness.node(&id, "flaky").status, Status::IgnoreFailed);
    assert_eq!(harness.node(&id, "fanout").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn section_runs_its_child_branch_to_the_end_before_resuming() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("stage", "section")
                .group(NodeGroup::Stage)
                .child("first")
                .next("done")
                .build(),
        )
        .node(NodeBuilder::new("first", "log").next("second").build())
        .node(NodeBuilder::new("second", "log").build())
        .node(NodeBuilder::new("done", "log").build())
        .build();

    let id = harness.trigger(plan).await;

    // The branch ran synchronously; the parent only hears about it on delivery.
    let first = harness.node(&id, "first");
    let second = harness.node(&id, "second");
    assert_eq!(second.status, Status::Succeeded);
    assert_eq!(second.notify_id, first.notify_id);
    assert_eq!(second.parent_id, first.parent_id);
    assert_eq!(harness.node(&id, "stage").status, Status::Running);

    harness.pump().await;

    assert_eq!(harness.node(&id, "stage").status, Status::Succeeded);
    assert_eq!(harness.node(&id, "done").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn section_chain_runs_children_one_after_another() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("stages", "section_chain")
                .group(NodeGroup::Stages)
                .children(&["one", "two", "three"])
                .build(),
        )
        .node(shell("one").build())
        .node(shell("two").build())
        .node(shell("three").build())
        .build();

    let id = harness.trigger(plan).await;
    assert!(harness.try_node(&id, "two").is_none());

    for (n, identifier) in ["one", "two", "three"].iter().enumerate() {
        let task_id = format!("task-{}", n + 1);
        assert_eq!(harness.node(&id, identifier).status, Status::TaskWaiting);
        harness.executor.succeed(&task_id, json!({})).unwrap();
        harness.pump().await;
    }

    assert_eq!(harness.node(&id, "stages").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn section_chain_stops_after_a_failed_child() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("stages", "section_chain")
                .children(&["ok", "broken", "skipped"])
                .build(),
        )
        .node(NodeBuilder::new("ok", "log").build())
        .node(NodeBuilder::new("broken", "fail").build())
        .node(NodeBuilder::new("skipped", "log").build())
        .build();

    let id = harness.trigger(plan).await;
    harness.pump().await;

    assert_eq!(harness.node(&id, "ok").status, Status::Succeeded);
    assert_eq!(harness.node(&id, "broken").status, Status::Failed);
    assert!(harness.try_node(&id, "skipped").is_none());
    assert_eq!(harness.node(&id, "stages").status, Status::Failed);
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn parallel_without_children_succeeds_and_moves_on() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(NodeBuilder::new("empty", "parallel").next("after").build())
        .node(NodeBuilder::new("after", "log").build())
        .build();

    let id = harness.trigger(plan).await;

    let empty = harness.node(&id, "empty");
    assert_eq!(empty.status, Status::Succeeded);
    assert!(empty.failure_info.is_none());
    assert!(
        harness
            .orchestrator
            .node_executions(&id)
            .unwrap()
            .iter()
            .all(|n| n.parent_id.is_none())
    );
    assert_eq!(harness.node(&id, "after").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}
