// src/strategies/task.rs

use std::sync::Arc;

use tracing::debug;

use super::{ExecuteStrategy, InvokerPackage, ResumePackage, StrategyOutcome};
use crate::errors::{EngineError, Result};
use crate::execution::{ExecutableResponse, Status};
use crate::steps::{Responses, StepInput, StepRegistry, TaskChainExecutable, TaskChainResponse};
use crate::tasks::{TaskDescriptor, TaskExecutor};
use crate::types::BoxFuture;

async fn submit(
    executor: &dyn TaskExecutor,
    input: &StepInput,
    task: TaskDescriptor,
) -> Result<String> {
    let task_type = task.task_type.clone();
    let task_id = executor
        .queue_task(input.ambiance.setup_abstractions.clone(), task)
        .await?;
    debug!(
        node_execution_id = %input.node_execution_id,
        task_id = %task_id,
        task_type = %task_type,
        "task submitted"
    );
    Ok(task_id)
}

/// Submits one task and completes with the step's view of its result.
pub struct TaskStrategy {
    registry: Arc<StepRegistry>,
    executor: Arc<dyn TaskExecutor>,
}

impl TaskStrategy {
    pub fn new(registry: Arc<StepRegistry>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { registry, executor }
    }
}

impl ExecuteStrategy for TaskStrategy {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.task_step(&package.input.node.step_type)?;
            let task = step.obtain_task(&package.input)?;
            let task_type = task.task_type.clone();
            let task_id = submit(self.executor.as_ref(), &package.input, task).await?;

            Ok(StrategyOutcome::Suspended {
                status: Status::TaskWaiting,
                response: ExecutableResponse::Task {
                    task_id: task_id.clone(),
                    task_type,
                },
                correlation_ids: vec![task_id],
            })
        })
    }

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.task_step(&package.input.node.step_type)?;
            let response = step.handle_task_result(&package.input, &package.responses)?;
            Ok(StrategyOutcome::Completed(response))
        })
    }
}

/// Multi-hop task execution: each completed task either finalizes the step
/// (when its link was flagged `chain_end`) or yields the next link.
pub struct TaskChainStrategy {
    registry: Arc<StepRegistry>,
    executor: Arc<dyn TaskExecutor>,
}

impl TaskChainStrategy {
    pub fn new(registry: Arc<StepRegistry>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self { registry, executor }
    }

    /// Submit `link`'s task, or finalize right away if the link ends the chain
    /// without one.
    async fn run_link(
        &self,
        step: &dyn TaskChainExecutable,
        input: &StepInput,
        link: TaskChainResponse,
        responses: &Responses,
    ) -> Result<StrategyOutcome> {
        let Some(task) = link.task else {
            if link.chain_end {
                let response = step.finalize_execution(input, &link.pass_through, responses)?;
                return Ok(StrategyOutcome::Completed(response));
            }
            return Err(EngineError::ContractViolation(format!(
                "task chain step '{}' returned a link with no task that does not end the chain",
                input.node.identifier
            )));
        };

        let task_type = task.task_type.clone();
        let task_id = submit(self.executor.as_ref(), input, task).await?;

        Ok(StrategyOutcome::Suspended {
            status: Status::TaskWaiting,
            response: ExecutableResponse::TaskChain {
                task_id: task_id.clone(),
                task_type,
                chain_end: link.chain_end,
                pass_through: link.pass_through,
            },
            correlation_ids: vec![task_id],
        })
    }
}

impl ExecuteStrategy for TaskChainStrategy {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.task_chain_step(&package.input.node.step_type)?;
            let link = step.start_chain_link(&package.input)?;
            self.run_link(step.as_ref(), &package.input, link, &Responses::new())
                .await
        })
    }

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.task_chain_step(&package.input.node.step_type)?;

            let Some(ExecutableResponse::TaskChain {
                chain_end,
                pass_through,
                ..
            }) = package.node_execution.latest_executable_response()
            else {
                return Err(EngineError::ContractViolation(format!(
                    "task chain node execution {} resumed without a task chain response",
                    package.node_execution.id
                )));
            };

            if *chain_end {
                let response =
                    step.finalize_execution(&package.input, pass_through, &package.responses)?;
                return Ok(StrategyOutcome::Completed(response));
            }

            let link = step.execute_next_link(&package.input, pass_through, &package.responses)?;
            self.run_link(step.as_ref(), &package.input, link, &package.responses)
                .await
        })
    }
}
