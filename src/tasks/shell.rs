// src/tasks/shell.rs

//! Local shell task executor.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{TaskDescriptor, TaskExecutor};
use crate::errors::{EngineError, Result};
use crate::execution::{ResponseData, TaskOutcome, TaskResult};
use crate::types::BoxFuture;
use crate::waiter::WaitNotifyEngine;

pub const SHELL_TASK_TYPE: &str = "shell";

/// Parameters of a `shell` task.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellTaskParams {
    pub script: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Runs `shell` tasks as `sh -c <script>` child processes and reports their
/// result through the wait/notify engine.
///
/// Setup abstractions are exported to the process as
/// `NODEFLOW_SETUP_<KEY>` (key upper-cased).
pub struct ShellTaskExecutor {
    waiter: Arc<WaitNotifyEngine>,
    default_timeout: Duration,
    running: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl std::fmt::Debug for ShellTaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellTaskExecutor")
            .field("default_timeout", &self.default_timeout)
            .field("running", &self.running.lock().len())
            .finish()
    }
}

impl ShellTaskExecutor {
    pub fn new(waiter: Arc<WaitNotifyEngine>, default_timeout: Duration) -> Self {
        Self {
            waiter,
            default_timeout,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn running_tasks(&self) -> usize {
        self.running.lock().len()
    }
}

impl TaskExecutor for ShellTaskExecutor {
    fn queue_task(
        &self,
        setup_abstractions: BTreeMap<String, String>,
        task: TaskDescriptor,
    ) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if task.task_type != SHELL_TASK_TYPE {
                return Err(EngineError::TaskSubmission(format!(
                    "shell executor cannot run task type '{}'",
                    task.task_type
                )));
            }
            let params: ShellTaskParams = serde_json::from_value(task.parameters.clone())
                .map_err(|e| EngineError::TaskSubmission(format!("invalid shell task: {e}")))?;

            let task_id = Uuid::new_v4().to_string();
            let timeout = task.timeout.unwrap_or(self.default_timeout);
            let (cancel_tx, cancel_rx) = oneshot::channel();
            self.running.lock().insert(task_id.clone(), cancel_tx);

            let run = ShellRun {
                task_id: task_id.clone(),
                params,
                setup_abstractions,
                timeout,
            };
            let waiter = Arc::clone(&self.waiter);
            let running = Arc::clone(&self.running);

            tokio::spawn(async move {
                let task_id = run.task_id.clone();
                let result = run_task(&run, cancel_rx).await;
                running.lock().remove(&task_id);

                if let Err(e) = waiter.done_with(&task_id, ResponseData::Task(result)) {
                    error!(task_id = %task_id, error = %e, "failed to report shell task result");
                }
            });

            info!(task_id = %task_id, timeout_secs = timeout.as_secs(), "shell task queued");
            Ok(task_id)
        })
    }

    fn abort_task(
        &self,
        _setup_abstractions: BTreeMap<String, String>,
        task_id: String,
    ) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let Some(cancel_tx) = self.running.lock().remove(&task_id) else {
                debug!(task_id = %task_id, "abort requested for unknown or finished task");
                return Ok(false);
            };
            Ok(cancel_tx.send(()).is_ok())
        })
    }
}

struct ShellRun {
    task_id: String,
    params: ShellTaskParams,
    setup_abstractions: BTreeMap<String, String>,
    timeout: Duration,
}

/// Run one shell task to completion, timeout or abort. Never fails: spawn
/// errors become a FAILURE result.
async fn run_task(run: &ShellRun, cancel_rx: oneshot::Receiver<()>) -> TaskResult {
    match run_task_inner(run, cancel_rx).await {
        Ok(result) => result,
        Err(err) => {
            error!(task_id = %run.task_id, error = %err, "shell task execution error");
            TaskResult::failure(TaskOutcome::Failure, format!("{err:#}"))
        }
    }
}

async fn run_task_inner(
    run: &ShellRun,
    mut cancel_rx: oneshot::Receiver<()>,
) -> anyhow::Result<TaskResult> {
    info!(task_id = %run.task_id, script = %run.params.script, "starting shell task");

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&run.params.script);
    for (key, value) in &run.setup_abstractions {
        cmd.env(format!("NODEFLOW_SETUP_{}", key.to_uppercase()), value);
    }
    cmd.envs(&run.params.env);
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", run.task_id))?;

    let stdout_reader = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout.read_to_string(&mut buf).await;
            buf
        })
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = child.stderr.take() {
        let task_id = run.task_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task_id = %task_id, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of task '{}'", run.task_id))?;
            let stdout = match stdout_reader {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };
            let code = status.code().unwrap_or(-1);

            info!(task_id = %run.task_id, exit_code = code, success = status.success(), "shell task exited");

            let output = json!({ "stdout": stdout.trim_end(), "exit_code": code });
            if status.success() {
                Ok(TaskResult::success(output))
            } else {
                Ok(TaskResult {
                    outcome: TaskOutcome::Failure,
                    output,
                    error_message: Some(format!("script exited with code {code}")),
                })
            }
        }

        _ = tokio::time::sleep(run.timeout) => {
            warn!(task_id = %run.task_id, timeout_secs = run.timeout.as_secs(), "shell task timed out; killing process");
            if let Err(e) = child.kill().await {
                warn!(task_id = %run.task_id, error = %e, "failed to kill timed out process");
            }
            Ok(TaskResult::failure(
                TaskOutcome::Timeout,
                format!("task timed out after {}s", run.timeout.as_secs()),
            ))
        }

        cancel = &mut cancel_rx => {
            if cancel.is_ok() {
                info!(task_id = %run.task_id, "abort requested; killing process");
            }
            if let Err(e) = child.kill().await {
                warn!(task_id = %run.task_id, error = %e, "failed to kill aborted process");
            }
            Ok(TaskResult::failure(TaskOutcome::Aborted, "task aborted"))
        }
    }
}
