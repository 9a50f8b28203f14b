// src/engine/mod.rs

//! Orchestration engine for nodeflow.
//!
//! This module ties together:
//! - the pure advancement decisions in [`core`]
//! - the [`Orchestrator`], which owns the services and runs
//!   [`EngineCommand`]s until the queue drains
//! - one handler per command (start, resume, conclude, advance)
//! - interrupt registration
//! - the notify callback that turns wait/notify deliveries into `Resume`
//!   commands
//! - crash recovery
//!
//! Work on one plan execution can happen concurrently (one command loop per
//! caller or delivery); coordination goes exclusively through the state
//! store's compare-and-swap and the status guards.

use crate::execution::{Status, StepResponse};
use crate::steps::Responses;

pub mod callbacks;
pub mod core;
mod event_handlers;
mod interrupt_handling;
pub mod orchestrator;
mod recovery;

pub use callbacks::{EngineCallback, ORCHESTRATION_PUBLISHER, OrchestrationCallback};
pub use orchestrator::Orchestrator;

/// Observable engine events, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    NodeStatusChanged {
        plan_execution_id: String,
        node_execution_id: String,
        identifier: String,
        status: Status,
    },
    PlanFinished {
        plan_execution_id: String,
        status: Status,
    },
}

/// Work items for the orchestrator's command loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Invoke the strategy `start` of a QUEUED (or paused-before-start) node.
    Start { node_execution_id: String },
    /// Invoke the strategy `resume` with the responses a wait collected.
    Resume {
        node_execution_id: String,
        responses: Responses,
    },
    /// Apply a step response: finalize, retry or park the node.
    Conclude {
        node_execution_id: String,
        response: StepResponse,
    },
    /// Move the graph on from a terminal node.
    Advance { node_execution_id: String },
}

impl EngineCommand {
    pub fn node_execution_id(&self) -> &str {
        match self {
            EngineCommand::Start { node_execution_id }
            | EngineCommand::Resume {
                node_execution_id, ..
            }
            | EngineCommand::Conclude {
                node_execution_id, ..
            }
            | EngineCommand::Advance { node_execution_id } => node_execution_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineCommand::Start { .. } => "start",
            EngineCommand::Resume { .. } => "resume",
            EngineCommand::Conclude { .. } => "conclude",
            EngineCommand::Advance { .. } => "advance",
        }
    }
}
