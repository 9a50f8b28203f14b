// src/execution/mod.rs

//! Execution state model.
//!
//! - [`status`] / [`mode`] are the enums every other module switches on.
//! - [`node_execution`] / [`plan_execution`] are the persisted records.
//! - [`response`] holds the payloads flowing between steps, strategies and
//!   the wait/notify engine.
//! - [`service`] wraps the store with guarded, versioned updates.

pub mod mode;
pub mod node_execution;
pub mod plan_execution;
pub mod response;
pub mod service;
pub mod status;

pub use mode::ExecutionMode;
pub use node_execution::NodeExecution;
pub use plan_execution::PlanExecution;
pub use response::{
    ExecutableResponse, FailureInfo, PassThroughData, ResponseData, StepNotifyData, StepResponse,
    TaskOutcome, TaskResult,
};
pub use service::{NodeExecutionService, PlanExecutionService};
pub use status::Status;
