// src/strategies/mod.rs

//! Execute strategies, one per [`ExecutionMode`].
//!
//! A strategy never touches the store: it talks to the step (and, for task
//! modes, the task executor bridge) and tells the orchestrator what to do
//! next through a [`StrategyOutcome`]. The orchestrator applies the outcome
//! (status change, wait registration, child spawning, conclusion).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{EngineError, Result};
use crate::execution::{ExecutableResponse, ExecutionMode, NodeExecution, Status, StepResponse};
use crate::steps::{Responses, StepInput, StepRegistry};
use crate::tasks::TaskExecutor;
use crate::types::BoxFuture;

pub mod asynchronous;
pub mod child;
pub mod sync;
pub mod task;

pub use asynchronous::AsyncStrategy;
pub use child::{ChildChainStrategy, ChildStrategy, ChildrenStrategy};
pub use sync::SyncStrategy;
pub use task::{TaskChainStrategy, TaskStrategy};

/// Input to [`ExecuteStrategy::start`].
#[derive(Debug, Clone)]
pub struct InvokerPackage {
    pub node_execution: NodeExecution,
    pub input: StepInput,
}

/// Input to [`ExecuteStrategy::resume`]: the node plus every response its
/// current wait collected.
#[derive(Debug, Clone)]
pub struct ResumePackage {
    pub node_execution: NodeExecution,
    pub input: StepInput,
    pub responses: Responses,
}

/// What the orchestrator should do after a strategy call.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// The step is done; conclude the node with this response.
    Completed(StepResponse),
    /// Record `response`, move to `status` and wait on `correlation_ids`.
    Suspended {
        status: Status,
        response: ExecutableResponse,
        correlation_ids: Vec<String>,
    },
    /// Record `response` and spawn one child execution per plan node id,
    /// waiting for all of them. The parent stays RUNNING.
    SpawnChildren {
        response: ExecutableResponse,
        child_node_ids: Vec<String>,
    },
}

pub trait ExecuteStrategy: Send + Sync {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>>;

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>>;
}

/// Mode -> strategy map, built once at startup.
#[derive(Clone)]
pub struct StrategyFactory {
    strategies: HashMap<ExecutionMode, Arc<dyn ExecuteStrategy>>,
}

impl fmt::Debug for StrategyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modes: Vec<_> = self.strategies.keys().collect();
        f.debug_struct("StrategyFactory")
            .field("modes", &modes)
            .finish()
    }
}

impl StrategyFactory {
    pub fn new(registry: Arc<StepRegistry>, task_executor: Arc<dyn TaskExecutor>) -> Self {
        let mut strategies: HashMap<ExecutionMode, Arc<dyn ExecuteStrategy>> = HashMap::new();
        strategies.insert(
            ExecutionMode::Sync,
            Arc::new(SyncStrategy::new(Arc::clone(&registry))),
        );
        strategies.insert(
            ExecutionMode::Async,
            Arc::new(AsyncStrategy::new(Arc::clone(&registry))),
        );
        strategies.insert(
            ExecutionMode::Task,
            Arc::new(TaskStrategy::new(
                Arc::clone(&registry),
                Arc::clone(&task_executor),
            )),
        );
        strategies.insert(
            ExecutionMode::TaskChain,
            Arc::new(TaskChainStrategy::new(Arc::clone(&registry), task_executor)),
        );
        strategies.insert(
            ExecutionMode::Child,
            Arc::new(ChildStrategy::new(Arc::clone(&registry))),
        );
        strategies.insert(
            ExecutionMode::Children,
            Arc::new(ChildrenStrategy::new(Arc::clone(&registry))),
        );
        strategies.insert(
            ExecutionMode::ChildChain,
            Arc::new(ChildChainStrategy::new(registry)),
        );
        Self { strategies }
    }

    /// Replace the strategy for `mode`.
    pub fn register(&mut self, mode: ExecutionMode, strategy: Arc<dyn ExecuteStrategy>) {
        self.strategies.insert(mode, strategy);
    }

    pub fn obtain(&self, mode: ExecutionMode) -> Result<Arc<dyn ExecuteStrategy>> {
        self.strategies
            .get(&mode)
            .cloned()
            .ok_or_else(|| EngineError::ContractViolation(format!("no strategy for mode {mode}")))
    }
}
