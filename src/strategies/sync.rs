// src/strategies/sync.rs

use std::sync::Arc;

use super::{ExecuteStrategy, InvokerPackage, ResumePackage, StrategyOutcome};
use crate::errors::{EngineError, Result};
use crate::steps::StepRegistry;
use crate::types::BoxFuture;

/// Runs the step inline and completes immediately. Never suspends.
pub struct SyncStrategy {
    registry: Arc<StepRegistry>,
}

impl SyncStrategy {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }
}

impl ExecuteStrategy for SyncStrategy {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.sync_step(&package.input.node.step_type)?;
            let response = step.execute_sync(&package.input)?;
            Ok(StrategyOutcome::Completed(response))
        })
    }

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            Err(EngineError::ContractViolation(format!(
                "sync node execution {} cannot be resumed",
                package.node_execution.id
            )))
        })
    }
}
