// src/strategies/child.rs

//! Parent modes. A parent node does no step work itself: it names the plan
//! nodes to spawn and aggregates their terminal statuses once they report
//! back.

use std::sync::Arc;

use super::{ExecuteStrategy, InvokerPackage, ResumePackage, StrategyOutcome};
use crate::errors::{EngineError, Result};
use crate::execution::{ExecutableResponse, StepResponse};
use crate::steps::{ChildChainExecutable, ChildChainResponse, Responses, StepInput, StepRegistry};
use crate::types::BoxFuture;

pub struct ChildStrategy {
    registry: Arc<StepRegistry>,
}

impl ChildStrategy {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }
}

impl ExecuteStrategy for ChildStrategy {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.child_step(&package.input.node.step_type)?;
            let child_node_id = step.obtain_child(&package.input)?;
            Ok(StrategyOutcome::SpawnChildren {
                response: ExecutableResponse::Child {
                    child_node_id: child_node_id.clone(),
                },
                child_node_ids: vec![child_node_id],
            })
        })
    }

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.child_step(&package.input.node.step_type)?;
            let response = step.handle_child_response(&package.input, &package.responses)?;
            Ok(StrategyOutcome::Completed(response))
        })
    }
}

pub struct ChildrenStrategy {
    registry: Arc<StepRegistry>,
}

impl ChildrenStrategy {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }
}

impl ExecuteStrategy for ChildrenStrategy {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.children_step(&package.input.node.step_type)?;
            let child_node_ids = step.obtain_children(&package.input)?;

            // Nothing to wait for.
            if child_node_ids.is_empty() {
                return Ok(StrategyOutcome::Completed(StepResponse::succeeded()));
            }

            Ok(StrategyOutcome::SpawnChildren {
                response: ExecutableResponse::Children {
                    child_node_ids: child_node_ids.clone(),
                },
                child_node_ids,
            })
        })
    }

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.children_step(&package.input.node.step_type)?;
            let response = step.handle_children_response(&package.input, &package.responses)?;
            Ok(StrategyOutcome::Completed(response))
        })
    }
}

/// Children one at a time, each link deciding the next, same chain-end
/// contract as task chains.
pub struct ChildChainStrategy {
    registry: Arc<StepRegistry>,
}

impl ChildChainStrategy {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }

    fn run_link(
        step: &dyn ChildChainExecutable,
        input: &StepInput,
        link: ChildChainResponse,
        responses: &Responses,
    ) -> Result<StrategyOutcome> {
        let Some(child_node_id) = link.child_node_id else {
            if link.chain_end {
                let response = step.finalize_execution(input, &link.pass_through, responses)?;
                return Ok(StrategyOutcome::Completed(response));
            }
            return Err(EngineError::ContractViolation(format!(
                "child chain step '{}' returned a link with no child that does not end the chain",
                input.node.identifier
            )));
        };

        Ok(StrategyOutcome::SpawnChildren {
            response: ExecutableResponse::ChildChain {
                child_node_id: child_node_id.clone(),
                chain_end: link.chain_end,
                pass_through: link.pass_through,
            },
            child_node_ids: vec![child_node_id],
        })
    }
}

impl ExecuteStrategy for ChildChainStrategy {
    fn start(&self, package: InvokerPackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.child_chain_step(&package.input.node.step_type)?;
            let link = step.start_chain_link(&package.input)?;
            Self::run_link(step.as_ref(), &package.input, link, &Responses::new())
        })
    }

    fn resume(&self, package: ResumePackage) -> BoxFuture<'_, Result<StrategyOutcome>> {
        Box::pin(async move {
            let step = self.registry.child_chain_step(&package.input.node.step_type)?;

            let Some(ExecutableResponse::ChildChain {
                chain_end,
                pass_through,
                ..
            }) = package.node_execution.latest_executable_response()
            else {
                return Err(EngineError::ContractViolation(format!(
                    "child chain node execution {} resumed without a child chain response",
                    package.node_execution.id
                )));
            };

            if *chain_end {
                let response =
                    step.finalize_execution(&package.input, pass_through, &package.responses)?;
                return Ok(StrategyOutcome::Completed(response));
            }

            let link = step.execute_next_child(&package.input, pass_through, &package.responses)?;
            Self::run_link(step.as_ref(), &package.input, link, &package.responses)
        })
    }
}
