use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use nodeflow::errors::{EngineError, Result};
use nodeflow::execution::{ResponseData, TaskOutcome, TaskResult};
use nodeflow::tasks::{TaskDescriptor, TaskExecutor};
use nodeflow::types::BoxFuture;
use nodeflow::waiter::WaitNotifyEngine;

/// A task as the fake executor received it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedTask {
    pub task_id: String,
    pub task: TaskDescriptor,
    pub setup_abstractions: BTreeMap<String, String>,
}

/// A fake task executor that:
/// - records every submitted task and hands out `task-N` ids
/// - never completes anything by itself; tests call [`FakeTaskExecutor::complete`]
///   (which goes through the wait/notify engine like a real executor would)
/// - accepts or refuses abort signals depending on `set_accept_abort`. An
///   accepted abort reports an ABORTED result for the task.
pub struct FakeTaskExecutor {
    waiter: Arc<WaitNotifyEngine>,
    submitted: Mutex<Vec<SubmittedTask>>,
    aborted: Mutex<Vec<String>>,
    accept_abort: AtomicBool,
    fail_submission: AtomicBool,
    counter: AtomicU64,
}

impl FakeTaskExecutor {
    pub fn new(waiter: Arc<WaitNotifyEngine>) -> Self {
        Self {
            waiter,
            submitted: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            accept_abort: AtomicBool::new(false),
            fail_submission: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    pub fn set_accept_abort(&self, val: bool) {
        self.accept_abort.store(val, Ordering::SeqCst);
    }

    /// Make every following `queue_task` fail with a submission error.
    pub fn set_fail_submission(&self, val: bool) {
        self.fail_submission.store(val, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<SubmittedTask> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    /// Report `result` for `task_id`.
    pub fn complete(&self, task_id: &str, result: TaskResult) -> Result<String> {
        self.waiter.done_with(task_id, ResponseData::Task(result))
    }

    pub fn succeed(&self, task_id: &str, output: Value) -> Result<String> {
        self.complete(task_id, TaskResult::success(output))
    }

    pub fn fail(&self, task_id: &str, message: &str) -> Result<String> {
        self.complete(task_id, TaskResult::failure(TaskOutcome::Failure, message))
    }

    /// Poll until at least `count` tasks were submitted. Pair with
    /// `with_timeout`.
    pub async fn wait_for_submissions(&self, count: usize) -> Vec<SubmittedTask> {
        loop {
            let submitted = self.submitted();
            if submitted.len() >= count {
                return submitted;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl TaskExecutor for FakeTaskExecutor {
    fn queue_task(
        &self,
        setup_abstractions: BTreeMap<String, String>,
        task: TaskDescriptor,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if self.fail_submission.load(Ordering::SeqCst) {
                return Err(EngineError::TaskSubmission(
                    "fake executor refused the task".to_string(),
                ));
            }

            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let task_id = format!("task-{n}");
            self.submitted.lock().unwrap().push(SubmittedTask {
                task_id: task_id.clone(),
                task,
                setup_abstractions,
            });
            Ok(task_id)
        })
    }

    fn abort_task(
        &self,
        _setup_abstractions: BTreeMap<String, String>,
        task_id: String,
    ) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            self.aborted.lock().unwrap().push(task_id.clone());
            if !self.accept_abort.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.complete(
                &task_id,
                TaskResult::failure(TaskOutcome::Aborted, "aborted by interrupt"),
            )?;
            Ok(true)
        })
    }
}
