// tests/update_conflicts.rs

mod common;
use crate::common::builders::{NodeBuilder, PlanBuilder};
use crate::common::conflicts::ConflictingTable;
use crate::common::{TestHarness, init_tracing, test_config};

use std::sync::Arc;

use serde_json::json;

use nodeflow::config::EngineConfig;
use nodeflow::execution::{NodeExecution, ResponseData, Status};
use nodeflow::steps::StepRegistry;
use nodeflow::store::{StateStore, Table};

fn conflicting_harness() -> (TestHarness, Arc<ConflictingTable<NodeExecution>>) {
    let mut store = StateStore::in_memory();
    let nodes = Arc::new(ConflictingTable::new(Arc::clone(&store.nodes)));
    store.nodes = Arc::clone(&nodes) as Arc<dyn Table<NodeExecution>>;

    let config = EngineConfig {
        max_update_attempts: 3,
        ..test_config()
    };
    let harness = TestHarness::with_store(store, StepRegistry::with_builtins(), config);
    (harness, nodes)
}

#[tokio::test]
async fn exhausted_start_fails_the_node_and_the_plan() {
    init_tracing();
    let (harness, nodes) = conflicting_harness();
    nodes.conflict_next(3);

    let id = harness
        .trigger(
            PlanBuilder::new()
                .node(NodeBuilder::new("only", "log").build())
                .build(),
        )
        .await;

    assert_eq!(nodes.conflicts(), 3);
    let node = harness.node(&id, "only");
    assert_eq!(node.status, Status::Failed);
    let info = node.failure_info.expect("failure info");
    assert!(info.retryable);
    assert!(info.message.contains("after 3 attempts"));
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn exhausted_start_goes_through_the_advisers() {
    init_tracing();
    let (harness, nodes) = conflicting_harness();
    nodes.conflict_next(3);

    let id = harness
        .trigger(
            PlanBuilder::new()
                .node(
                    NodeBuilder::new("work", "log")
                        .adviser("retry", json!({ "max_attempts": 2, "retryable_only": true }))
                        .build(),
                )
                .build(),
        )
        .await;

    let attempts = harness.attempts(&id, "work");
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].old_retry);
    assert_eq!(attempts[0].status, Status::Failed);
    assert!(attempts[0].failure_info.as_ref().unwrap().retryable);
    assert_eq!(attempts[1].status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn exhausted_resume_and_conclusion_still_end_failed() {
    init_tracing();
    let (harness, nodes) = conflicting_harness();
    let id = harness
        .trigger(
            PlanBuilder::new()
                .node(
                    NodeBuilder::new("gate", "wait_for_signal")
                        .params(json!({ "callback_ids": ["go"] }))
                        .next("after")
                        .build(),
                )
                .node(NodeBuilder::new("after", "log").build())
                .build(),
        )
        .await;
    assert_eq!(harness.node(&id, "gate").status, Status::AsyncWaiting);

    // Enough to exhaust both the resume write and the first conclusion write.
    nodes.conflict_next(6);
    harness
        .waiter
        .done_with("go", ResponseData::Value(json!({ "ok": true })))
        .unwrap();
    harness.pump().await;

    assert_eq!(nodes.conflicts(), 6);
    let gate = harness.node(&id, "gate");
    assert_eq!(gate.status, Status::Failed);
    assert!(gate.failure_info.unwrap().message.contains("attempts"));
    assert!(harness.try_node(&id, "after").is_none());
    assert_eq!(harness.status(&id), Status::Failed);
}
