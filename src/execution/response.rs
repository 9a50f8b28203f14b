// src/execution/response.rs

//! Payloads exchanged between steps, strategies and the wait/notify engine.
//!
//! Everything here is a tagged serde enum rather than an opaque blob, so a
//! persisted record can be read back by any process that shares the schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::Status;

/// Failure details attached to a FAILED step response or node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    pub retryable: bool,
}

impl FailureInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Result a step (or a parent aggregation) hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: Status,
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
    /// Named outputs, addressable via `<+steps.IDENT.outcome.KEY>`.
    #[serde(default)]
    pub outcomes: BTreeMap<String, Value>,
}

impl StepResponse {
    pub fn succeeded() -> Self {
        Self {
            status: Status::Succeeded,
            failure_info: None,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn failed(info: FailureInfo) -> Self {
        Self {
            status: Status::Failed,
            failure_info: Some(info),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            failure_info: None,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn with_outcome(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outcomes.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Success,
    Failure,
    Timeout,
    Aborted,
}

/// What the task executor bridge delivers for a finished (or timed out, or
/// aborted) task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub outcome: TaskOutcome,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskResult {
    pub fn success(output: Value) -> Self {
        Self {
            outcome: TaskOutcome::Success,
            output,
            error_message: None,
        }
    }

    pub fn failure(outcome: TaskOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            output: Value::Null,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == TaskOutcome::Success
    }
}

/// Published by a child node execution when it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNotifyData {
    pub node_execution_id: String,
    pub node_id: String,
    pub identifier: String,
    pub status: Status,
    #[serde(default)]
    pub failure_info: Option<FailureInfo>,
}

/// Payload stored in a `NotifyResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseData {
    Task(TaskResult),
    StepNotify(StepNotifyData),
    Value(Value),
}

impl ResponseData {
    pub fn as_task(&self) -> Option<&TaskResult> {
        match self {
            ResponseData::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_step_notify(&self) -> Option<&StepNotifyData> {
        match self {
            ResponseData::StepNotify(n) => Some(n),
            _ => None,
        }
    }
}

/// Opaque chain-continuation state owned by a step. The engine stores it and
/// hands it back unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PassThroughData {
    pub version: u32,
    #[serde(default)]
    pub data: Value,
}

impl PassThroughData {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(data: Value) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            data,
        }
    }
}

/// One suspension point of a node execution. The last entry in
/// `NodeExecution::executable_responses` is the current wait condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutableResponse {
    Async {
        callback_ids: Vec<String>,
    },
    Task {
        task_id: String,
        task_type: String,
    },
    TaskChain {
        task_id: String,
        task_type: String,
        chain_end: bool,
        pass_through: PassThroughData,
    },
    Child {
        child_node_id: String,
    },
    Children {
        child_node_ids: Vec<String>,
    },
    ChildChain {
        child_node_id: String,
        chain_end: bool,
        pass_through: PassThroughData,
    },
}

impl ExecutableResponse {
    /// Task id, if this suspension is waiting on the task executor bridge.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            ExecutableResponse::Task { task_id, .. }
            | ExecutableResponse::TaskChain { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
