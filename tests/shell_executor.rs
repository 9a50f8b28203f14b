// tests/shell_executor.rs

mod common;
use crate::common::builders::{NodeBuilder, PlanBuilder};
use crate::common::recording::RecordingCallback;
use crate::common::{init_tracing, test_config, with_timeout};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use nodeflow::advisers::AdviserRegistry;
use nodeflow::engine::Orchestrator;
use nodeflow::errors::EngineError;
use nodeflow::execution::{Status, TaskOutcome, TaskResult};
use nodeflow::steps::StepRegistry;
use nodeflow::store::StateStore;
use nodeflow::tasks::shell::SHELL_TASK_TYPE;
use nodeflow::tasks::{ShellTaskExecutor, TaskDescriptor, TaskExecutor};
use nodeflow::waiter::{WaitNotifyEngine, spawn_consumers};

const PUBLISHER: &str = "tasks";

struct Rig {
    waiter: Arc<WaitNotifyEngine>,
    recorder: Arc<RecordingCallback>,
    executor: ShellTaskExecutor,
}

fn rig(default_timeout: Duration) -> Rig {
    let store = StateStore::in_memory();
    let waiter = Arc::new(WaitNotifyEngine::new(store, test_config()));
    let recorder = Arc::new(RecordingCallback::new());
    waiter.register_publisher(PUBLISHER, recorder.clone());
    let executor = ShellTaskExecutor::new(Arc::clone(&waiter), default_timeout);
    Rig {
        waiter,
        recorder,
        executor,
    }
}

fn script(script: &str) -> TaskDescriptor {
    TaskDescriptor::new(SHELL_TASK_TYPE, json!({ "script": script }))
}

/// Wait on `task_id` and deliver until the result shows up.
async fn result_of(rig: &Rig, task_id: &str) -> TaskResult {
    rig.waiter
        .wait_for_all_on(PUBLISHER, &json!({ "task": task_id }), &[task_id.to_string()])
        .unwrap();

    with_timeout(async {
        loop {
            rig.waiter.process_pending().await.unwrap();
            if let Some(delivery) = rig.recorder.deliveries().first() {
                return delivery.responses[task_id]
                    .as_task()
                    .expect("shell executor reports task results")
                    .clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
}

#[tokio::test]
async fn successful_script_reports_stdout_and_exit_code() {
    init_tracing();
    let rig = rig(Duration::from_secs(10));

    let task_id = rig
        .executor
        .queue_task(BTreeMap::new(), script("echo hello"))
        .await
        .unwrap();

    let result = result_of(&rig, &task_id).await;
    assert_eq!(result.outcome, TaskOutcome::Success);
    assert_eq!(result.output["stdout"], json!("hello"));
    assert_eq!(result.output["exit_code"], json!(0));
    assert!(result.error_message.is_none());
    assert_eq!(rig.executor.running_tasks(), 0);
}

#[tokio::test]
async fn failing_script_reports_failure_with_exit_code() {
    init_tracing();
    let rig = rig(Duration::from_secs(10));

    let task_id = rig
        .executor
        .queue_task(BTreeMap::new(), script("echo partial; exit 3"))
        .await
        .unwrap();

    let result = result_of(&rig, &task_id).await;
    assert_eq!(result.outcome, TaskOutcome::Failure);
    assert_eq!(result.output["exit_code"], json!(3));
    assert_eq!(result.output["stdout"], json!("partial"));
    assert!(result.error_message.unwrap().contains("code 3"));
}

#[tokio::test]
async fn setup_abstractions_and_env_reach_the_process() {
    init_tracing();
    let rig = rig(Duration::from_secs(10));
    let setup = BTreeMap::from([("region".to_string(), "eu-west".to_string())]);
    let task = TaskDescriptor::new(
        SHELL_TASK_TYPE,
        json!({
            "script": "echo \"$NODEFLOW_SETUP_REGION/$TARGET\"",
            "env": { "TARGET": "api" }
        }),
    );

    let task_id = rig.executor.queue_task(setup, task).await.unwrap();

    let result = result_of(&rig, &task_id).await;
    assert_eq!(result.output["stdout"], json!("eu-west/api"));
}

#[tokio::test]
async fn slow_script_times_out() {
    init_tracing();
    let rig = rig(Duration::from_secs(30));
    let task = script("sleep 10").with_timeout(Duration::from_secs(1));

    let task_id = rig.executor.queue_task(BTreeMap::new(), task).await.unwrap();

    let result = result_of(&rig, &task_id).await;
    assert_eq!(result.outcome, TaskOutcome::Timeout);
    assert!(result.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn abort_kills_a_running_script() {
    init_tracing();
    let rig = rig(Duration::from_secs(30));

    let task_id = rig
        .executor
        .queue_task(BTreeMap::new(), script("sleep 10"))
        .await
        .unwrap();
    assert_eq!(rig.executor.running_tasks(), 1);

    let accepted = rig
        .executor
        .abort_task(BTreeMap::new(), task_id.clone())
        .await
        .unwrap();
    assert!(accepted);

    let result = result_of(&rig, &task_id).await;
    assert_eq!(result.outcome, TaskOutcome::Aborted);

    // A second abort finds nothing to signal.
    let again = rig
        .executor
        .abort_task(BTreeMap::new(), task_id)
        .await
        .unwrap();
    assert!(!again);
}

#[tokio::test]
async fn abort_of_unknown_task_is_refused() {
    init_tracing();
    let rig = rig(Duration::from_secs(10));

    let accepted = rig
        .executor
        .abort_task(BTreeMap::new(), "nope".to_string())
        .await
        .unwrap();
    assert!(!accepted);
}

#[tokio::test]
async fn unsupported_or_malformed_tasks_are_rejected_at_submission() {
    init_tracing();
    let rig = rig(Duration::from_secs(10));

    let wrong_type = rig
        .executor
        .queue_task(
            BTreeMap::new(),
            TaskDescriptor::new("docker", json!({ "image": "alpine" })),
        )
        .await;
    match wrong_type {
        Err(EngineError::TaskSubmission(msg)) => assert!(msg.contains("docker")),
        other => panic!("expected TaskSubmission, got {other:?}"),
    }

    let missing_script = rig
        .executor
        .queue_task(
            BTreeMap::new(),
            TaskDescriptor::new(SHELL_TASK_TYPE, json!({ "env": {} })),
        )
        .await;
    assert!(matches!(missing_script, Err(EngineError::TaskSubmission(_))));
    assert_eq!(rig.executor.running_tasks(), 0);
}

#[tokio::test]
async fn plan_runs_end_to_end_on_the_shell_executor() {
    init_tracing();
    let store = StateStore::in_memory();
    let config = test_config();
    let waiter = Arc::new(WaitNotifyEngine::new(store.clone(), config.clone()));
    let executor = Arc::new(ShellTaskExecutor::new(
        Arc::clone(&waiter),
        Duration::from_secs(10),
    ));
    let orchestrator = Orchestrator::new(
        &store,
        Arc::clone(&waiter),
        executor,
        Arc::new(StepRegistry::with_builtins()),
        AdviserRegistry::with_builtins(),
        config,
    )
    .unwrap();
    let consumers = spawn_consumers(Arc::clone(&waiter));

    let plan = PlanBuilder::new()
        .node(
            NodeBuilder::new("build", "shell")
                .params(json!({ "script": "echo built-<+setup.version>" }))
                .next("report")
                .build(),
        )
        .node(
            NodeBuilder::new("report", "shell")
                .params(json!({ "script": "echo got <+steps.build.outcome.stdout>" }))
                .build(),
        )
        .build();
    let setup = BTreeMap::from([("version".to_string(), "1.2".to_string())]);

    let id = orchestrator.trigger_execution(plan, setup).await.unwrap();
    let status = with_timeout(orchestrator.wait_for_plan(&id)).await.unwrap();

    assert_eq!(status, Status::Succeeded);
    let nodes = orchestrator.node_executions(&id).unwrap();
    let report = nodes
        .iter()
        .find(|n| n.node.identifier == "report")
        .expect("report node ran");
    assert_eq!(report.outcomes["stdout"], json!("got built-1.2"));

    consumers.shutdown().await;
}
