// src/steps/builtin.rs

//! Steps available to plan files out of the box.
//!
//! - `log` (sync): logs `message`, exposes it as an outcome.
//! - `fail` (sync): fails with `message`; `retryable` sets the failure flag.
//! - `shell` (task): runs `script` through the task executor.
//! - `shell_chain` (task chain): runs `scripts` one after another, stopping at
//!   the first failure.
//! - `wait_for_signal` (async): waits until every id in `callback_ids` is
//!   notified from outside.
//! - `section` (child): runs the node's first child.
//! - `parallel` (children): runs all of the node's children concurrently.
//! - `section_chain` (child chain): runs the node's children one after
//!   another, stopping at the first one that does not succeed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{
    AsyncExecutable, ChildChainExecutable, ChildChainResponse, ChildExecutable,
    ChildrenExecutable, Responses, StepCapability, StepInput, StepRegistry, SyncExecutable,
    TaskChainExecutable, TaskChainResponse, TaskExecutable, task_results_to_step_response,
};
use crate::errors::{EngineError, Result};
use crate::execution::{
    FailureInfo, PassThroughData, ResponseData, Status, StepResponse, TaskOutcome,
};
use crate::tasks::TaskDescriptor;
use crate::tasks::shell::SHELL_TASK_TYPE;

pub fn register_all(registry: &mut StepRegistry) {
    registry
        .register("log", StepCapability::Sync(Arc::new(LogStep)))
        .register("fail", StepCapability::Sync(Arc::new(FailStep)))
        .register("shell", StepCapability::Task(Arc::new(ShellStep)))
        .register("shell_chain", StepCapability::TaskChain(Arc::new(ShellChainStep)))
        .register("wait_for_signal", StepCapability::Async(Arc::new(WaitForSignalStep)))
        .register("section", StepCapability::Child(Arc::new(SectionStep)))
        .register("parallel", StepCapability::Children(Arc::new(ParallelStep)))
        .register("section_chain", StepCapability::ChildChain(Arc::new(SectionChainStep)));
}

#[derive(Debug, Deserialize)]
struct LogParams {
    #[serde(default)]
    message: String,
}

pub struct LogStep;

impl SyncExecutable for LogStep {
    fn execute_sync(&self, input: &StepInput) -> Result<StepResponse> {
        let params: LogParams = input.params()?;
        info!(identifier = %input.node.identifier, "{}", params.message);
        Ok(StepResponse::succeeded().with_outcome("message", Value::String(params.message)))
    }
}

#[derive(Debug, Deserialize)]
struct FailParams {
    #[serde(default = "default_fail_message")]
    message: String,
    #[serde(default)]
    retryable: bool,
}

fn default_fail_message() -> String {
    "step failed".to_string()
}

pub struct FailStep;

impl SyncExecutable for FailStep {
    fn execute_sync(&self, input: &StepInput) -> Result<StepResponse> {
        let params: FailParams = input.params()?;
        Ok(StepResponse::failed(FailureInfo {
            message: params.message,
            retryable: params.retryable,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ShellParams {
    script: String,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

fn shell_task(script: &str, env: &BTreeMap<String, String>, timeout_secs: Option<u64>) -> TaskDescriptor {
    let task = TaskDescriptor::new(SHELL_TASK_TYPE, json!({ "script": script, "env": env }));
    match timeout_secs {
        Some(secs) => task.with_timeout(Duration::from_secs(secs)),
        None => task,
    }
}

pub struct ShellStep;

impl TaskExecutable for ShellStep {
    fn obtain_task(&self, input: &StepInput) -> Result<TaskDescriptor> {
        let params: ShellParams = input.params()?;
        Ok(shell_task(&params.script, &params.env, params.timeout_secs))
    }
}

#[derive(Debug, Deserialize)]
struct ShellChainParams {
    #[serde(default)]
    scripts: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Chain state carried between links.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ShellChainState {
    /// Index of the script the current link runs.
    index: usize,
    outputs: Vec<Value>,
    failure: Option<String>,
}

impl ShellChainState {
    fn from_pass_through(pass_through: &PassThroughData) -> Result<Self> {
        Ok(serde_json::from_value(pass_through.data.clone())?)
    }

    fn into_pass_through(self) -> Result<PassThroughData> {
        Ok(PassThroughData::new(serde_json::to_value(self)?))
    }

    /// Fold the current link's responses into the state.
    fn record(&mut self, responses: &Responses) {
        let step = task_results_to_step_response(responses);
        if step.status.is_positive() {
            self.outputs.push(Value::Object(step.outcomes.into_iter().collect()));
        } else {
            self.failure = Some(
                step.failure_info
                    .map(|f| f.message)
                    .unwrap_or_else(|| format!("script {} ended {}", self.index, step.status)),
            );
        }
    }
}

pub struct ShellChainStep;

impl TaskChainExecutable for ShellChainStep {
    fn start_chain_link(&self, input: &StepInput) -> Result<TaskChainResponse> {
        let params: ShellChainParams = input.params()?;
        let state = ShellChainState::default();

        let Some(first) = params.scripts.first() else {
            return Ok(TaskChainResponse {
                task: None,
                chain_end: true,
                pass_through: state.into_pass_through()?,
            });
        };

        Ok(TaskChainResponse {
            task: Some(shell_task(first, &params.env, params.timeout_secs)),
            chain_end: params.scripts.len() == 1,
            pass_through: state.into_pass_through()?,
        })
    }

    fn execute_next_link(
        &self,
        input: &StepInput,
        pass_through: &PassThroughData,
        responses: &Responses,
    ) -> Result<TaskChainResponse> {
        let params: ShellChainParams = input.params()?;
        let mut state = ShellChainState::from_pass_through(pass_through)?;
        state.record(responses);

        if state.failure.is_some() {
            return Ok(TaskChainResponse {
                task: None,
                chain_end: true,
                pass_through: state.into_pass_through()?,
            });
        }

        state.index += 1;
        let script = params.scripts.get(state.index).ok_or_else(|| {
            EngineError::ContractViolation(format!(
                "shell_chain link {} requested but only {} scripts exist",
                state.index,
                params.scripts.len()
            ))
        })?;
        let chain_end = state.index + 1 >= params.scripts.len();

        Ok(TaskChainResponse {
            task: Some(shell_task(script, &params.env, params.timeout_secs)),
            chain_end,
            pass_through: state.into_pass_through()?,
        })
    }

    fn finalize_execution(
        &self,
        _input: &StepInput,
        pass_through: &PassThroughData,
        responses: &Responses,
    ) -> Result<StepResponse> {
        let mut state = ShellChainState::from_pass_through(pass_through)?;
        if state.failure.is_none() && !responses.is_empty() {
            state.record(responses);
        }

        if let Some(message) = state.failure {
            return Ok(StepResponse::failed(FailureInfo::new(message)));
        }
        Ok(StepResponse::succeeded().with_outcome("outputs", Value::Array(state.outputs)))
    }
}

#[derive(Debug, Deserialize)]
struct WaitForSignalParams {
    #[serde(default)]
    callback_ids: Vec<String>,
}

pub struct WaitForSignalStep;

impl AsyncExecutable for WaitForSignalStep {
    fn execute_async(&self, input: &StepInput) -> Result<Vec<String>> {
        let params: WaitForSignalParams = input.params()?;
        if params.callback_ids.is_empty() {
            // Default signal name external callers can derive from the plan.
            return Ok(vec![format!(
                "{}:{}",
                input.ambiance.plan_execution_id, input.node.identifier
            )]);
        }
        Ok(params.callback_ids)
    }

    fn handle_async_response(
        &self,
        _input: &StepInput,
        responses: &Responses,
    ) -> Result<StepResponse> {
        let mut response = StepResponse::succeeded();

        for (id, data) in responses {
            match data {
                ResponseData::Value(value) => {
                    if let Some(error) = value.get("error").and_then(Value::as_str) {
                        return Ok(StepResponse::failed(FailureInfo::new(format!(
                            "signal '{id}' reported an error: {error}"
                        ))));
                    }
                    response.outcomes.insert(id.clone(), value.clone());
                }
                ResponseData::Task(result) if result.outcome == TaskOutcome::Success => {
                    response.outcomes.insert(id.clone(), result.output.clone());
                }
                ResponseData::Task(result) => {
                    return Ok(StepResponse::failed(FailureInfo::new(
                        result
                            .error_message
                            .clone()
                            .unwrap_or_else(|| format!("signal '{id}' failed")),
                    )));
                }
                ResponseData::StepNotify(notify) => {
                    return Err(EngineError::ContractViolation(format!(
                        "wait_for_signal received a step notification from '{}'",
                        notify.node_execution_id
                    )));
                }
            }
        }

        Ok(response)
    }
}

pub struct SectionStep;

impl ChildExecutable for SectionStep {
    fn obtain_child(&self, input: &StepInput) -> Result<String> {
        input.node.children.first().cloned().ok_or_else(|| {
            EngineError::ContractViolation(format!(
                "section '{}' has no child node",
                input.node.identifier
            ))
        })
    }
}

/// Fans out to every child. With no children there is nothing to wait for
/// and the node succeeds straight away.
pub struct ParallelStep;

impl ChildrenExecutable for ParallelStep {
    fn obtain_children(&self, input: &StepInput) -> Result<Vec<String>> {
        Ok(input.node.children.clone())
    }
}

/// Child chain state: index of the running child and the statuses seen so far.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SectionChainState {
    index: usize,
    statuses: Vec<Status>,
}

impl SectionChainState {
    fn from_pass_through(pass_through: &PassThroughData) -> Result<Self> {
        Ok(serde_json::from_value(pass_through.data.clone())?)
    }

    fn into_pass_through(self) -> Result<PassThroughData> {
        Ok(PassThroughData::new(serde_json::to_value(self)?))
    }
}

pub struct SectionChainStep;

impl ChildChainExecutable for SectionChainStep {
    fn start_chain_link(&self, input: &StepInput) -> Result<ChildChainResponse> {
        let children = &input.node.children;
        Ok(ChildChainResponse {
            child_node_id: children.first().cloned(),
            chain_end: children.len() <= 1,
            pass_through: SectionChainState::default().into_pass_through()?,
        })
    }

    fn execute_next_child(
        &self,
        input: &StepInput,
        pass_through: &PassThroughData,
        responses: &Responses,
    ) -> Result<ChildChainResponse> {
        let mut state = SectionChainState::from_pass_through(pass_through)?;
        state.statuses.extend(
            responses
                .values()
                .filter_map(ResponseData::as_step_notify)
                .map(|n| n.status),
        );

        if !Status::aggregate(state.statuses.iter().copied()).is_positive() {
            return Ok(ChildChainResponse {
                child_node_id: None,
                chain_end: true,
                pass_through: state.into_pass_through()?,
            });
        }

        state.index += 1;
        let children = &input.node.children;
        Ok(ChildChainResponse {
            child_node_id: children.get(state.index).cloned(),
            chain_end: state.index + 1 >= children.len(),
            pass_through: state.into_pass_through()?,
        })
    }
}
