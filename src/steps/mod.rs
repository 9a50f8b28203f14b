// src/steps/mod.rs

//! Step implementations and the registry that maps step types to them.
//!
//! A step declares exactly one capability, which fixes the
//! [`ExecutionMode`] the orchestrator drives it with:
//!
//! | capability              | mode         |
//! |-------------------------|--------------|
//! | [`SyncExecutable`]      | `SYNC`       |
//! | [`AsyncExecutable`]     | `ASYNC`      |
//! | [`TaskExecutable`]      | `TASK`       |
//! | [`TaskChainExecutable`] | `TASK_CHAIN` |
//! | [`ChildExecutable`]     | `CHILD`      |
//! | [`ChildrenExecutable`]  | `CHILDREN`   |
//! | [`ChildChainExecutable`]| `CHILD_CHAIN`|
//!
//! The registry is built once at startup and injected into the strategies;
//! there is no global lookup.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ambiance::Ambiance;
use crate::errors::{EngineError, Result};
use crate::execution::{
    ExecutionMode, FailureInfo, PassThroughData, ResponseData, Status, StepResponse, TaskOutcome,
};
use crate::plan::PlanNode;
use crate::tasks::TaskDescriptor;

pub mod builtin;

pub type Responses = BTreeMap<String, ResponseData>;

/// Everything a step sees when invoked.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub ambiance: Ambiance,
    pub node: PlanNode,
    pub node_execution_id: String,
    /// Step parameters after expression resolution.
    pub parameters: Value,
}

impl StepInput {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Deserialize the parameters into a step-specific struct.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        let params = match &self.parameters {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(params).map_err(|e| {
            EngineError::ContractViolation(format!(
                "invalid parameters for step '{}' ({}): {e}",
                self.node.identifier, self.node.step_type
            ))
        })
    }
}

pub trait SyncExecutable: Send + Sync {
    fn execute_sync(&self, input: &StepInput) -> Result<StepResponse>;
}

pub trait AsyncExecutable: Send + Sync {
    /// Kick off external work and return the callback ids to wait on.
    fn execute_async(&self, input: &StepInput) -> Result<Vec<String>>;

    fn handle_async_response(
        &self,
        input: &StepInput,
        responses: &Responses,
    ) -> Result<StepResponse>;
}

pub trait TaskExecutable: Send + Sync {
    fn obtain_task(&self, input: &StepInput) -> Result<TaskDescriptor>;

    fn handle_task_result(&self, _input: &StepInput, responses: &Responses) -> Result<StepResponse> {
        Ok(task_results_to_step_response(responses))
    }
}

/// One link of a task chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskChainResponse {
    /// Task to run for this link. `None` is only valid with `chain_end`.
    pub task: Option<TaskDescriptor>,
    /// No further links after this one.
    pub chain_end: bool,
    pub pass_through: PassThroughData,
}

pub trait TaskChainExecutable: Send + Sync {
    fn start_chain_link(&self, input: &StepInput) -> Result<TaskChainResponse>;

    fn execute_next_link(
        &self,
        input: &StepInput,
        pass_through: &PassThroughData,
        responses: &Responses,
    ) -> Result<TaskChainResponse>;

    fn finalize_execution(
        &self,
        input: &StepInput,
        pass_through: &PassThroughData,
        responses: &Responses,
    ) -> Result<StepResponse>;
}

pub trait ChildExecutable: Send + Sync {
    /// Plan node id of the single child to spawn.
    fn obtain_child(&self, input: &StepInput) -> Result<String>;

    fn handle_child_response(&self, _input: &StepInput, responses: &Responses) -> Result<StepResponse> {
        Ok(aggregate_child_responses(responses))
    }
}

pub trait ChildrenExecutable: Send + Sync {
    fn obtain_children(&self, input: &StepInput) -> Result<Vec<String>>;

    fn handle_children_response(
        &self,
        _input: &StepInput,
        responses: &Responses,
    ) -> Result<StepResponse> {
        Ok(aggregate_child_responses(responses))
    }
}

/// One link of a child chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildChainResponse {
    pub child_node_id: Option<String>,
    pub chain_end: bool,
    pub pass_through: PassThroughData,
}

pub trait ChildChainExecutable: Send + Sync {
    fn start_chain_link(&self, input: &StepInput) -> Result<ChildChainResponse>;

    fn execute_next_child(
        &self,
        input: &StepInput,
        pass_through: &PassThroughData,
        responses: &Responses,
    ) -> Result<ChildChainResponse>;

    fn finalize_execution(
        &self,
        _input: &StepInput,
        _pass_through: &PassThroughData,
        responses: &Responses,
    ) -> Result<StepResponse> {
        Ok(aggregate_child_responses(responses))
    }
}

/// A registered step, tagged by capability.
#[derive(Clone)]
pub enum StepCapability {
    Sync(Arc<dyn SyncExecutable>),
    Async(Arc<dyn AsyncExecutable>),
    Task(Arc<dyn TaskExecutable>),
    TaskChain(Arc<dyn TaskChainExecutable>),
    Child(Arc<dyn ChildExecutable>),
    Children(Arc<dyn ChildrenExecutable>),
    ChildChain(Arc<dyn ChildChainExecutable>),
}

impl StepCapability {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            StepCapability::Sync(_) => ExecutionMode::Sync,
            StepCapability::Async(_) => ExecutionMode::Async,
            StepCapability::Task(_) => ExecutionMode::Task,
            StepCapability::TaskChain(_) => ExecutionMode::TaskChain,
            StepCapability::Child(_) => ExecutionMode::Child,
            StepCapability::Children(_) => ExecutionMode::Children,
            StepCapability::ChildChain(_) => ExecutionMode::ChildChain,
        }
    }
}

impl fmt::Debug for StepCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepCapability({})", self.mode())
    }
}

/// Step type -> implementation.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepCapability>,
}

macro_rules! typed_accessor {
    ($name:ident, $variant:ident, $trait:ident) => {
        pub fn $name(&self, step_type: &str) -> Result<Arc<dyn $trait>> {
            match self.get(step_type)? {
                StepCapability::$variant(step) => Ok(Arc::clone(step)),
                other => Err(EngineError::ContractViolation(format!(
                    "step type '{step_type}' is {} but was driven as {}",
                    other.mode(),
                    ExecutionMode::$variant
                ))),
            }
        }
    };
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every step from [`builtin`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register (or replace) the implementation for `step_type`.
    pub fn register(&mut self, step_type: impl Into<String>, step: StepCapability) -> &mut Self {
        self.steps.insert(step_type.into(), step);
        self
    }

    pub fn get(&self, step_type: &str) -> Result<&StepCapability> {
        self.steps
            .get(step_type)
            .ok_or_else(|| EngineError::UnknownStepType(step_type.to_string()))
    }

    pub fn mode_of(&self, step_type: &str) -> Result<ExecutionMode> {
        self.get(step_type).map(StepCapability::mode)
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.steps.contains_key(step_type)
    }

    pub fn step_types(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    typed_accessor!(sync_step, Sync, SyncExecutable);
    typed_accessor!(async_step, Async, AsyncExecutable);
    typed_accessor!(task_step, Task, TaskExecutable);
    typed_accessor!(task_chain_step, TaskChain, TaskChainExecutable);
    typed_accessor!(child_step, Child, ChildExecutable);
    typed_accessor!(children_step, Children, ChildrenExecutable);
    typed_accessor!(child_chain_step, ChildChain, ChildChainExecutable);
}

/// Default parent aggregation over the children's step-notify payloads.
///
/// See [`Status::aggregate`]: ABORTED > EXPIRED > FAILED > SUCCEEDED,
/// independent of completion order.
pub fn aggregate_child_responses(responses: &Responses) -> StepResponse {
    let children: Vec<_> = responses
        .values()
        .filter_map(ResponseData::as_step_notify)
        .collect();

    let status = Status::aggregate(children.iter().map(|c| c.status));
    if status.is_positive() {
        return StepResponse::succeeded();
    }

    let culprits: Vec<&str> = children
        .iter()
        .filter(|c| Status::aggregate([c.status]) == status)
        .map(|c| c.identifier.as_str())
        .collect();

    let mut response = StepResponse::with_status(status);
    if status == Status::Failed {
        let message = children
            .iter()
            .find_map(|c| c.failure_info.as_ref().map(|f| f.message.clone()))
            .unwrap_or_else(|| "child execution failed".to_string());
        response.failure_info = Some(FailureInfo::new(format!(
            "{message} (failed children: {})",
            culprits.join(", ")
        )));
    }
    response
}

/// Default mapping of task results to a step response: every task must have
/// succeeded. Task outputs are exposed as outcomes keyed by correlation id
/// (or merged directly when there is a single object output).
pub fn task_results_to_step_response(responses: &Responses) -> StepResponse {
    let mut outcomes = BTreeMap::new();

    for (id, data) in responses {
        let Some(result) = data.as_task() else {
            return StepResponse::failed(FailureInfo::new(format!(
                "expected a task result for '{id}'"
            )));
        };

        match result.outcome {
            TaskOutcome::Success => {}
            TaskOutcome::Aborted => return StepResponse::with_status(Status::Aborted),
            TaskOutcome::Timeout => {
                return StepResponse::failed(FailureInfo::retryable(
                    result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "task timed out".to_string()),
                ));
            }
            TaskOutcome::Failure => {
                return StepResponse::failed(FailureInfo::new(
                    result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "task failed".to_string()),
                ));
            }
        }

        match (&result.output, responses.len()) {
            (Value::Object(map), 1) => {
                outcomes.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            (output, _) => {
                outcomes.insert(id.clone(), output.clone());
            }
        }
    }

    StepResponse {
        status: Status::Succeeded,
        failure_info: None,
        outcomes,
    }
}
