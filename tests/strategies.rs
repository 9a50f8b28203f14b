// tests/strategies.rs

mod common;
use crate::common::builders::{NodeBuilder, PlanBuilder};
use crate::common::{TestHarness, init_tracing};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use nodeflow::errors::Result;
use nodeflow::execution::{
    ExecutableResponse, PassThroughData, ResponseData, Status, StepResponse, TaskOutcome,
    TaskResult,
};
use nodeflow::steps::{
    AsyncExecutable, Responses, StepCapability, StepInput, StepRegistry, TaskChainExecutable,
    TaskChainResponse,
};
use nodeflow::tasks::TaskDescriptor;
use nodeflow::tasks::shell::SHELL_TASK_TYPE;

#[tokio::test]
async fn task_step_waits_for_its_task_and_exposes_the_output() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("build", "shell")
                .params(json!({ "script": "make", "env": { "CI": "1" } }))
                .next("after")
                .build(),
        )
        .node(NodeBuilder::new("after", "log").build())
        .build();
    let setup = BTreeMap::from([("project".to_string(), "p1".to_string())]);

    let id = harness.trigger_with_setup(plan, setup.clone()).await;

    let waiting = harness.node(&id, "build");
    assert_eq!(waiting.status, Status::TaskWaiting);
    assert_eq!(
        waiting.latest_executable_response(),
        Some(&ExecutableResponse::Task {
            task_id: "task-1".to_string(),
            task_type: SHELL_TASK_TYPE.to_string(),
        })
    );

    let submitted = harness.executor.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].task.task_type, SHELL_TASK_TYPE);
    assert_eq!(submitted[0].task.parameters["script"], json!("make"));
    assert_eq!(submitted[0].task.parameters["env"]["CI"], json!("1"));
    assert_eq!(submitted[0].setup_abstractions, setup);

    harness
        .executor
        .succeed("task-1", json!({ "stdout": "built" }))
        .unwrap();
    harness.pump().await;

    let done = harness.node(&id, "build");
    assert_eq!(done.status, Status::Succeeded);
    assert_eq!(done.outcomes.get("stdout"), Some(&json!("built")));
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn failed_task_fails_the_node() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("build", "shell")
                .params(json!({ "script": "false" }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;
    harness.executor.fail("task-1", "exit status 1").unwrap();
    harness.pump().await;

    let node = harness.node(&id, "build");
    assert_eq!(node.status, Status::Failed);
    assert_eq!(
        node.failure_info.map(|f| f.message),
        Some("exit status 1".to_string())
    );
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn timed_out_task_is_a_retryable_failure() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("slow", "shell")
                .params(json!({ "script": "sleep 100", "timeout_secs": 1 }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;
    assert_eq!(
        harness.executor.submitted()[0].task.timeout,
        Some(std::time::Duration::from_secs(1))
    );
    harness
        .executor
        .complete(
            "task-1",
            TaskResult::failure(TaskOutcome::Timeout, "timed out after 1s"),
        )
        .unwrap();
    harness.pump().await;

    let info = harness.node(&id, "slow").failure_info.expect("failure info");
    assert!(info.retryable);
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn task_submission_failure_fails_the_node_as_retryable() {
    init_tracing();
    let harness = TestHarness::new();
    harness.executor.set_fail_submission(true);
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("build", "shell")
                .params(json!({ "script": "make" }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;

    let node = harness.node(&id, "build");
    assert_eq!(node.status, Status::Failed);
    let info = node.failure_info.expect("failure info");
    assert!(info.retryable);
    assert!(info.message.contains("Task submission failed"));
    assert_eq!(harness.status(&id), Status::Failed);
}

#[tokio::test]
async fn async_step_resumes_only_after_every_callback_id() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("approval", "wait_for_signal")
                .params(json!({ "callback_ids": ["alice", "bob"] }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;
    assert_eq!(harness.node(&id, "approval").status, Status::AsyncWaiting);

    harness
        .waiter
        .done_with("bob", ResponseData::Value(json!({ "approved": true })))
        .unwrap();
    harness.pump().await;
    assert_eq!(harness.node(&id, "approval").status, Status::AsyncWaiting);

    harness
        .waiter
        .done_with("alice", ResponseData::Value(json!({ "approved": true })))
        .unwrap();
    harness.pump().await;

    let node = harness.node(&id, "approval");
    assert_eq!(node.status, Status::Succeeded);
    assert_eq!(node.outcomes.get("alice"), Some(&json!({ "approved": true })));
    assert_eq!(node.outcomes.get("bob"), Some(&json!({ "approved": true })));
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn async_step_defaults_to_a_signal_named_after_the_node() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(NodeBuilder::new("gate", "wait_for_signal").build())
        .build();

    let id = harness.trigger(plan).await;
    harness
        .waiter
        .done_with(&format!("{id}:gate"), ResponseData::Value(json!("go")))
        .unwrap();
    harness.pump().await;

    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn async_error_payload_goes_through_the_advisers() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("gate", "wait_for_signal")
                .params(json!({ "callback_ids": ["c1"] }))
                .adviser("ignore", json!(null))
                .next("after")
                .build(),
        )
        .node(NodeBuilder::new("after", "log").build())
        .build();

    let id = harness.trigger(plan).await;
    harness
        .waiter
        .done_with("c1", ResponseData::Value(json!({ "error": "denied" })))
        .unwrap();
    harness.pump().await;

    let gate = harness.node(&id, "gate");
    assert_eq!(gate.status, Status::IgnoreFailed);
    assert!(gate.failure_info.expect("failure info").message.contains("denied"));
    assert_eq!(harness.node(&id, "after").status, Status::Succeeded);
    assert_eq!(harness.status(&id), Status::Succeeded);
}

struct SilentAsync;

impl AsyncExecutable for SilentAsync {
    fn execute_async(&self, _input: &StepInput) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn handle_async_response(&self, _: &StepInput, _: &Responses) -> Result<StepResponse> {
        Ok(StepResponse::succeeded())
    }
}

#[tokio::test]
async fn async_step_without_callback_ids_fails() {
    init_tracing();
    let mut registry = StepRegistry::with_builtins();
    registry.register("silent", StepCapability::Async(Arc::new(SilentAsync)));
    let harness = TestHarness::with_registry(registry);
    let plan = PlanBuilder::new()
        .node(NodeBuilder::new("quiet", "silent").build())
        .build();

    let id = harness.trigger(plan).await;

    let node = harness.node(&id, "quiet");
    assert_eq!(node.status, Status::Failed);
    assert!(
        node.failure_info
            .expect("failure info")
            .message
            .contains("no callback ids")
    );
    assert_eq!(harness.waiter.pending_events().unwrap(), 0);
}

/// Task chain whose first link already ends the chain.
#[derive(Default)]
struct SingleLinkChain {
    next_link_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
}

impl TaskChainExecutable for SingleLinkChain {
    fn start_chain_link(&self, _input: &StepInput) -> Result<TaskChainResponse> {
        Ok(TaskChainResponse {
            task: Some(TaskDescriptor::new(SHELL_TASK_TYPE, json!({ "script": "true" }))),
            chain_end: true,
            pass_through: PassThroughData::new(json!({ "link": 0 })),
        })
    }

    fn execute_next_link(
        &self,
        _input: &StepInput,
        _pass_through: &PassThroughData,
        _responses: &Responses,
    ) -> Result<TaskChainResponse> {
        self.next_link_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskChainResponse {
            task: None,
            chain_end: true,
            pass_through: PassThroughData::default(),
        })
    }

    fn finalize_execution(
        &self,
        _input: &StepInput,
        pass_through: &PassThroughData,
        _responses: &Responses,
    ) -> Result<StepResponse> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepResponse::succeeded().with_outcome("link", pass_through.data["link"].clone()))
    }
}

#[tokio::test]
async fn chain_end_link_finalizes_without_asking_for_another_link() {
    init_tracing();
    let chain = Arc::new(SingleLinkChain::default());
    let mut registry = StepRegistry::with_builtins();
    registry.register("one_link", StepCapability::TaskChain(chain.clone()));
    let harness = TestHarness::with_registry(registry);
    let plan = PlanBuilder::new()
        .node(NodeBuilder::new("chain", "one_link").build())
        .build();

    let id = harness.trigger(plan).await;
    harness.executor.succeed("task-1", json!({})).unwrap();
    harness.pump().await;

    assert_eq!(chain.next_link_calls.load(Ordering::SeqCst), 0);
    assert_eq!(chain.finalize_calls.load(Ordering::SeqCst), 1);
    let node = harness.node(&id, "chain");
    assert_eq!(node.status, Status::Succeeded);
    assert_eq!(node.outcomes.get("link"), Some(&json!(0)));
}

#[tokio::test]
async fn shell_chain_runs_scripts_in_order() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("steps", "shell_chain")
                .params(json!({ "scripts": ["echo one", "echo two"] }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;
    assert_eq!(harness.executor.submitted().len(), 1);

    harness.executor.succeed("task-1", json!({ "stdout": "one" })).unwrap();
    harness.pump().await;

    let submitted = harness.executor.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].task.parameters["script"], json!("echo two"));
    assert_eq!(harness.node(&id, "steps").status, Status::TaskWaiting);

    harness.executor.succeed("task-2", json!({ "stdout": "two" })).unwrap();
    harness.pump().await;

    let node = harness.node(&id, "steps");
    assert_eq!(node.status, Status::Succeeded);
    assert_eq!(
        node.outcomes.get("outputs"),
        Some(&json!([{ "stdout": "one" }, { "stdout": "two" }]))
    );
    assert_eq!(node.executable_responses.len(), 2);
}

#[tokio::test]
async fn shell_chain_stops_at_the_first_failing_script() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("steps", "shell_chain")
                .params(json!({ "scripts": ["false", "echo never", "echo never again"] }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;
    harness.executor.fail("task-1", "exit status 1").unwrap();
    harness.pump().await;

    assert_eq!(harness.executor.submitted().len(), 1);
    let node = harness.node(&id, "steps");
    assert_eq!(node.status, Status::Failed);
    assert_eq!(
        node.failure_info.map(|f| f.message),
        Some("exit status 1".to_string())
    );
}

#[tokio::test]
async fn empty_shell_chain_succeeds_immediately() {
    init_tracing();
    let harness = TestHarness::new();
    let plan = PlanBuilder::new()
        .node(NodeBuilder::new("nothing", "shell_chain").build())
        .build();

    let id = harness.trigger(plan).await;

    assert!(harness.executor.submitted().is_empty());
    assert_eq!(harness.status(&id), Status::Succeeded);
}

#[tokio::test]
async fn results_are_delivered_by_background_consumers() {
    init_tracing();
    let mut harness = TestHarness::new();
    harness.start_consumers();
    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("build", "shell")
                .params(json!({ "script": "make" }))
                .build(),
        )
        .build();

    let id = harness.trigger(plan).await;
    harness.executor.succeed("task-1", json!("ok")).unwrap();

    assert_eq!(harness.wait_for_plan(&id).await, Status::Succeeded);
    harness.shutdown().await;
}
