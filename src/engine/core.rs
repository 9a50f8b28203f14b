// src/engine/core.rs

//! Pure advancement decisions.
//!
//! Nothing in here touches the store, the waiter or the task executor: the
//! functions look at a node execution (plus an adviser decision where one is
//! needed) and say what should happen. The orchestrator in
//! [`super::orchestrator`] carries the decision out.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::advisers::AdviserResponse;
use crate::execution::{
    ExecutionMode, FailureInfo, NodeExecution, Status, StepNotifyData, StepResponse,
};
use crate::interrupts::InterruptType;

/// What to do with a step response.
#[derive(Debug, Clone, PartialEq)]
pub enum Conclusion {
    /// Move the node to this terminal status.
    Finalize {
        status: Status,
        failure_info: Option<FailureInfo>,
        outcomes: BTreeMap<String, Value>,
    },
    /// Close this attempt and start a new one.
    Retry { failure_info: Option<FailureInfo> },
    /// Park the node in INTERVENTION_WAITING.
    Intervene { failure_info: Option<FailureInfo> },
}

/// Decide how a node concludes. `decision` is only consulted for FAILED
/// responses; a non-terminal status in a response is a step bug and is
/// treated as a failure.
pub fn conclusion_for(response: StepResponse, decision: Option<AdviserResponse>) -> Conclusion {
    let StepResponse {
        status,
        failure_info,
        outcomes,
    } = response;

    if !status.is_terminal() {
        return Conclusion::Finalize {
            status: Status::Failed,
            failure_info: Some(FailureInfo::new(format!(
                "step returned non-terminal status {status}"
            ))),
            outcomes,
        };
    }

    if status != Status::Failed {
        return Conclusion::Finalize {
            status,
            failure_info,
            outcomes,
        };
    }

    match decision.unwrap_or(AdviserResponse::MarkFailed) {
        AdviserResponse::Retry => Conclusion::Retry { failure_info },
        AdviserResponse::ManualIntervention => Conclusion::Intervene { failure_info },
        AdviserResponse::Ignore => Conclusion::Finalize {
            status: Status::IgnoreFailed,
            failure_info,
            outcomes,
        },
        AdviserResponse::MarkFailed => Conclusion::Finalize {
            status: Status::Failed,
            failure_info,
            outcomes,
        },
    }
}

/// Where the graph goes once a node is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Start the plan node `next_node_id` as this node's successor.
    StartNext { next_node_id: String },
    /// Report the end of this branch to the waiting parent.
    NotifyParent {
        notify_id: String,
        data: StepNotifyData,
    },
    /// Top of the tree reached: the plan ends with this status.
    FinishPlan { status: Status },
    /// Superseded attempt or non-terminal node; nothing to do.
    Nothing,
}

pub fn end_transition(node: &NodeExecution) -> Transition {
    if !node.status.is_terminal() || node.old_retry {
        return Transition::Nothing;
    }

    if node.status.is_positive() {
        if let Some(next_node_id) = &node.node.next {
            return Transition::StartNext {
                next_node_id: next_node_id.clone(),
            };
        }
    }

    if let Some(notify_id) = &node.notify_id {
        return Transition::NotifyParent {
            notify_id: notify_id.clone(),
            data: StepNotifyData {
                node_execution_id: node.id.clone(),
                node_id: node.node.id.clone(),
                identifier: node.node.identifier.clone(),
                status: node.status,
                failure_info: node.failure_info.clone(),
            },
        };
    }

    Transition::FinishPlan {
        status: node.status.as_plan_status(),
    }
}

/// How an ABORT_ALL / EXPIRE_ALL registration treats one in-flight node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    /// Ask the task executor to abort; if it refuses, apply directly.
    SignalTask { task_id: String },
    /// Apply the interrupt handler now; the node cannot reach another
    /// invocation boundary by itself.
    ApplyNow,
    /// The next pre-invocation check (or the children) will handle it.
    LeaveToBoundary,
}

pub fn sweep_action(node: &NodeExecution) -> SweepAction {
    match node.status {
        Status::Paused | Status::InterventionWaiting => SweepAction::ApplyNow,
        Status::AsyncWaiting if node.mode == ExecutionMode::Async => SweepAction::ApplyNow,
        Status::TaskWaiting => match node
            .latest_executable_response()
            .and_then(|r| r.task_id())
        {
            Some(task_id) => SweepAction::SignalTask {
                task_id: task_id.to_string(),
            },
            None => SweepAction::ApplyNow,
        },
        _ => SweepAction::LeaveToBoundary,
    }
}

/// Status a node moves to when a node-level interrupt resolves a manual
/// intervention. `None` for RETRY (handled as a new attempt) and plan-level
/// types.
pub fn intervention_status_for(interrupt_type: InterruptType) -> Option<Status> {
    match interrupt_type {
        InterruptType::MarkSuccess => Some(Status::Succeeded),
        InterruptType::MarkFailed => Some(Status::Failed),
        InterruptType::Ignore => Some(Status::IgnoreFailed),
        _ => None,
    }
}
