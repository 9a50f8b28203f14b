// src/strategies/asynchronous.rs

use std::sync::Arc;

use super::{ExecuteStrategy, InvokerPackage, ResumePackage, StrategyOutcome};
use crate::errors::{EngineError, Result};
use crate::execution::{ExecutableResponse, Status};
use crate::steps::StepRegistry;
use crate::types::BoxFuture;

/// Suspends on the callback ids the step hands back; resumes once all of them
/// are notified.
pub struct AsyncStrategy {
    registry: Arc<StepRegistry>,
}

impl AsyncStrategy {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }
}

impl ExecuteStrategy for AsyncStrategy {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.async_step(&package.input.node.step_type)?;
            let callback_ids = step.execute_async(&package.input)?;

            if callback_ids.is_empty() {
                return Err(EngineError::ContractViolation(format!(
                    "async step '{}' returned no callback ids",
                    package.input.node.identifier
                )));
            }

            Ok(StrategyOutcome::Suspended {
                status: Status::AsyncWaiting,
                response: ExecutableResponse::Async {
                    callback_ids: callback_ids.clone(),
                },
                correlation_ids: callback_ids,
            })
        })
    }

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.async_step(&package.input.node.step_type)?;
            let response = step.handle_async_response(&package.input, &package.responses)?;
            Ok(StrategyOutcome::Completed(response))
        })
    }
}
