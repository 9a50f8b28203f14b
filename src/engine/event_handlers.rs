// src/engine/event_handlers.rs

//! Handlers for [`EngineCommand`]s.
//!
//! Each handler reads the node it is about, performs at most a couple of
//! guarded writes and returns the follow-up commands. None of them loops or
//! recurses; the command loop in [`Orchestrator::run_commands`] does that.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{Instrument, debug, info, warn};

use super::callbacks::{EngineCallback, ORCHESTRATION_PUBLISHER};
use super::core::{self, Conclusion, Transition};
use super::orchestrator::Orchestrator;
use super::EngineCommand;
use crate::errors::{EngineError, Result};
use crate::execution::{
    ExecutableResponse, FailureInfo, NodeExecution, ResponseData, Status, StepResponse,
};
use crate::expressions::ExpressionContext;
use crate::interrupts::{ExecutionCheck, Interrupt, InterruptEffect, InterruptState};
use crate::steps::{Responses, StepInput};
use crate::strategies::{InvokerPackage, ResumePackage, StrategyOutcome};

/// Version conflicts that outlasted the reload-and-reapply bound. These fail
/// the node instead of escaping the command loop.
fn is_exhausted(err: &EngineError) -> bool {
    matches!(err, EngineError::UpdateExhausted { .. })
}

fn step_input(node: &NodeExecution) -> StepInput {
    StepInput {
        ambiance: node.ambiance.clone(),
        node: node.node.clone(),
        node_execution_id: node.id.clone(),
        parameters: node.step_parameters().clone(),
    }
}

impl Orchestrator {
    pub(super) async fn handle_start(&self, id: &str) -> Result<Vec<EngineCommand>> {
        let node = self.nodes.get(id)?;
        if !matches!(node.status, Status::Queued | Status::Paused) {
            debug!(
                node_execution_id = id,
                status = %node.status,
                "node execution not startable; skipping"
            );
            return Ok(Vec::new());
        }

        let check = self.interrupts.check_pre_invocation(&node, None)?;
        if !check.proceed {
            return self.after_interrupted(id, &check);
        }

        let parameters = self.resolve_parameters(&node)?;
        let started = match self.nodes.update_status(id, Status::Running, |n| {
            n.resolved_step_parameters = Some(parameters.clone());
        }) {
            Err(err) if is_exhausted(&err) => return Ok(vec![self.handle_error(&node, &err)]),
            other => other?,
        };
        let Some(node) = started else {
            return Ok(Vec::new());
        };
        self.emit_node_status(&node);

        let span = node.ambiance.span();
        let package = InvokerPackage {
            node_execution: node.clone(),
            input: step_input(&node),
        };
        let outcome = async {
            let strategy = self.strategies.obtain(node.mode)?;
            strategy.start(package).await
        }
        .instrument(span)
        .await;

        self.apply_outcome(&node, outcome)
    }

    pub(super) async fn handle_resume(
        &self,
        id: &str,
        responses: Responses,
    ) -> Result<Vec<EngineCommand>> {
        let node = self.nodes.get(id)?;
        if !node.status.is_resumable() && node.status != Status::Paused {
            warn!(
                node_execution_id = id,
                status = %node.status,
                "node execution not resumable; ignoring delivery"
            );
            return Ok(Vec::new());
        }

        let check = self.interrupts.check_pre_invocation(&node, Some(&responses))?;
        if !check.proceed {
            return self.after_interrupted(id, &check);
        }

        let node = if node.status == Status::Running {
            node
        } else {
            let resumed = match self.nodes.update_status(id, Status::Running, |n| {
                n.pending_resume = None;
            }) {
                Err(err) if is_exhausted(&err) => {
                    return Ok(vec![self.handle_error(&node, &err)]);
                }
                other => other?,
            };
            let Some(updated) = resumed else {
                return Ok(Vec::new());
            };
            self.emit_node_status(&updated);
            updated
        };

        let span = node.ambiance.span();
        let package = ResumePackage {
            node_execution: node.clone(),
            input: step_input(&node),
            responses,
        };
        let outcome = async {
            let strategy = self.strategies.obtain(node.mode)?;
            strategy.resume(package).await
        }
        .instrument(span)
        .await;

        self.apply_outcome(&node, outcome)
    }

    pub(super) fn handle_conclude(
        &self,
        id: &str,
        response: StepResponse,
    ) -> Result<Vec<EngineCommand>> {
        let node = self.nodes.get(id)?;
        if node.status.is_terminal() {
            debug!(
                node_execution_id = id,
                status = %node.status,
                "node execution already terminal; ignoring conclusion"
            );
            return Ok(Vec::new());
        }

        let decision = if response.status == Status::Failed {
            let mut failed = node.clone();
            failed.failure_info = response.failure_info.clone();
            Some(self.advisers.decide(&failed))
        } else {
            None
        };

        match core::conclusion_for(response, decision) {
            Conclusion::Finalize {
                status,
                failure_info,
                outcomes,
            } => self.finalize(id, status, failure_info, outcomes, None),
            Conclusion::Retry { failure_info } => self.retry_node(&node, failure_info, None),
            Conclusion::Intervene { failure_info } => self.intervene(&node, failure_info),
        }
    }

    pub(super) fn handle_advance(&self, id: &str) -> Result<Vec<EngineCommand>> {
        let node = self.nodes.get(id)?;

        match core::end_transition(&node) {
            Transition::Nothing => Ok(Vec::new()),
            Transition::StartNext { next_node_id } => self.start_next(&node, &next_node_id),
            Transition::NotifyParent { notify_id, data } => {
                debug!(
                    node_execution_id = id,
                    %notify_id,
                    status = %data.status,
                    "branch finished; notifying parent"
                );
                self.waiter
                    .done_with(&notify_id, ResponseData::StepNotify(data))?;
                Ok(Vec::new())
            }
            Transition::FinishPlan { status } => {
                self.finish_plan(node.plan_execution_id(), status)?;
                Ok(Vec::new())
            }
        }
    }

    /// Move a node to a terminal status and advance the graph from it.
    ///
    /// If the write keeps conflicting, the node is reloaded once more and
    /// written as a retryable FAILED.
    pub(super) fn finalize(
        &self,
        id: &str,
        status: Status,
        failure_info: Option<FailureInfo>,
        outcomes: BTreeMap<String, Value>,
        interrupt: Option<&Interrupt>,
    ) -> Result<Vec<EngineCommand>> {
        let updated = self.nodes.update_status(id, status, |n| {
            if let Some(interrupt) = interrupt {
                n.interrupt_history
                    .push(InterruptEffect::new(interrupt, n.status));
            }
            if failure_info.is_some() {
                n.failure_info = failure_info.clone();
            }
            n.outcomes.extend(outcomes.clone());
        });
        let updated = match updated {
            Err(err) if is_exhausted(&err) => {
                warn!(
                    node_execution_id = id,
                    target = %status,
                    error = %err,
                    "could not conclude node execution; marking it failed"
                );
                self.nodes.update_status(id, Status::Failed, |n| {
                    n.failure_info = Some(FailureInfo::retryable(err.to_string()));
                })?
            }
            other => other?,
        };

        let Some(node) = updated else {
            return Ok(Vec::new());
        };

        info!(
            plan_execution_id = %node.plan_execution_id(),
            node_execution_id = %node.id,
            identifier = %node.node.identifier,
            status = %node.status,
            "node execution concluded"
        );
        self.emit_node_status(&node);

        Ok(vec![EngineCommand::Advance {
            node_execution_id: node.id,
        }])
    }

    /// Close `node` as a superseded FAILED attempt and start a new one.
    pub(super) fn retry_node(
        &self,
        node: &NodeExecution,
        failure_info: Option<FailureInfo>,
        interrupt: Option<&Interrupt>,
    ) -> Result<Vec<EngineCommand>> {
        let closed = self.nodes.update_status(&node.id, Status::Failed, |n| {
            if let Some(interrupt) = interrupt {
                n.interrupt_history
                    .push(InterruptEffect::new(interrupt, n.status));
            }
            if failure_info.is_some() {
                n.failure_info = failure_info.clone();
            }
            n.old_retry = true;
        });
        let closed = match closed {
            // The attempt could not be superseded; it fails for good.
            Err(err) if is_exhausted(&err) => {
                let info = FailureInfo::retryable(err.to_string());
                return self.finalize(
                    &node.id,
                    Status::Failed,
                    Some(info),
                    BTreeMap::new(),
                    interrupt,
                );
            }
            other => other?,
        };
        let Some(old) = closed else {
            return Ok(Vec::new());
        };
        self.emit_node_status(&old);

        let attempt = self.nodes.save(old.new_retry_attempt())?;
        if let Some(previous_id) = &attempt.previous_id {
            self.nodes
                .update(previous_id, |n| n.next_id = Some(attempt.id.clone()))?;
        }

        info!(
            plan_execution_id = %old.plan_execution_id(),
            node_execution_id = %old.id,
            retry_node_execution_id = %attempt.id,
            attempt = attempt.retry_ids.len() + 1,
            "retrying node"
        );

        Ok(vec![EngineCommand::Start {
            node_execution_id: attempt.id,
        }])
    }

    fn intervene(
        &self,
        node: &NodeExecution,
        failure_info: Option<FailureInfo>,
    ) -> Result<Vec<EngineCommand>> {
        let parked = self
            .nodes
            .update_status(&node.id, Status::InterventionWaiting, |n| {
                n.failure_info = failure_info.clone();
            });
        let parked = match parked {
            Err(err) if is_exhausted(&err) => {
                let info = FailureInfo::retryable(err.to_string());
                return self.finalize(
                    &node.id,
                    Status::Failed,
                    Some(info),
                    BTreeMap::new(),
                    None,
                );
            }
            other => other?,
        };
        let Some(updated) = parked else {
            return Ok(Vec::new());
        };
        self.emit_node_status(&updated);

        if self
            .plans
            .update_status(updated.plan_execution_id(), Status::InterventionWaiting)?
            .is_some()
        {
            warn!(
                plan_execution_id = %updated.plan_execution_id(),
                node_execution_id = %updated.id,
                "plan execution waiting for manual intervention"
            );
        }
        Ok(Vec::new())
    }

    fn start_next(&self, node: &NodeExecution, next_node_id: &str) -> Result<Vec<EngineCommand>> {
        let plan = self.plans.get(node.plan_execution_id())?;
        let plan_node = plan
            .plan
            .fetch_node(next_node_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("PlanNode", next_node_id))?;
        let mode = self.registry.mode_of(&plan_node.step_type)?;

        let mut next = NodeExecution::new(&node.ambiance.clone_for_finish(), plan_node, mode);
        next.parent_id = node.parent_id.clone();
        next.notify_id = node.notify_id.clone();
        next.previous_id = Some(node.id.clone());

        if !self.nodes.link_next(&node.id, &next.id)? {
            debug!(
                node_execution_id = %node.id,
                "successor already linked; skipping"
            );
            return Ok(Vec::new());
        }
        let next = self.nodes.save(next)?;

        debug!(
            node_execution_id = %node.id,
            next_node_execution_id = %next.id,
            next_identifier = %next.node.identifier,
            "advancing to next node"
        );

        Ok(vec![EngineCommand::Start {
            node_execution_id: next.id,
        }])
    }

    pub(super) fn finish_plan(&self, plan_execution_id: &str, status: Status) -> Result<()> {
        let Some(plan) = self.plans.update_status(plan_execution_id, status)? else {
            return Ok(());
        };

        for interrupt in self.interrupts.fetch_active_plan_level(plan_execution_id)? {
            self.interrupts
                .mark_processed(&interrupt.id, InterruptState::ProcessedSuccessfully)?;
        }

        info!(
            plan_execution_id,
            status = %plan.status,
            "plan execution finished"
        );
        self.emit_plan_finished(&plan);
        Ok(())
    }

    fn apply_outcome(
        &self,
        node: &NodeExecution,
        outcome: Result<StrategyOutcome>,
    ) -> Result<Vec<EngineCommand>> {
        match outcome {
            Err(err) => Ok(vec![self.handle_error(node, &err)]),
            Ok(StrategyOutcome::Completed(response)) => Ok(vec![EngineCommand::Conclude {
                node_execution_id: node.id.clone(),
                response,
            }]),
            Ok(StrategyOutcome::Suspended {
                status,
                response,
                correlation_ids,
            }) => self.suspend(node, status, response, &correlation_ids),
            Ok(StrategyOutcome::SpawnChildren {
                response,
                child_node_ids,
            }) => self.spawn_children(node, response, &child_node_ids),
        }
    }

    fn suspend(
        &self,
        node: &NodeExecution,
        status: Status,
        response: ExecutableResponse,
        correlation_ids: &[String],
    ) -> Result<Vec<EngineCommand>> {
        let suspended = match self.nodes.update_status(&node.id, status, |n| {
            n.executable_responses.push(response.clone());
        }) {
            Err(err) if is_exhausted(&err) => return Ok(vec![self.handle_error(node, &err)]),
            other => other?,
        };
        let Some(updated) = suspended else {
            return Ok(Vec::new());
        };
        self.emit_node_status(&updated);

        let callback = EngineCallback::Resume {
            node_execution_id: node.id.clone(),
        };
        if let Err(err) =
            self.waiter
                .wait_for_all_on(ORCHESTRATION_PUBLISHER, &callback, correlation_ids)
        {
            return Ok(vec![self.handle_error(&updated, &err)]);
        }

        debug!(
            node_execution_id = %node.id,
            status = %status,
            correlation_ids = ?correlation_ids,
            "node execution suspended"
        );
        Ok(Vec::new())
    }

    fn spawn_children(
        &self,
        parent: &NodeExecution,
        response: ExecutableResponse,
        child_node_ids: &[String],
    ) -> Result<Vec<EngineCommand>> {
        let children = match self.build_children(parent, child_node_ids) {
            Ok(children) => children,
            Err(err) => return Ok(vec![self.handle_error(parent, &err)]),
        };

        // The parent stays RUNNING while its children execute.
        let recorded = match self.nodes.update_status_from(
            &parent.id,
            Status::Running,
            &[Status::Running],
            |n| n.executable_responses.push(response.clone()),
        ) {
            Err(err) if is_exhausted(&err) => return Ok(vec![self.handle_error(parent, &err)]),
            other => other?,
        };
        let Some(parent) = recorded else {
            return Ok(Vec::new());
        };

        let child_ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
        let callback = EngineCallback::Resume {
            node_execution_id: parent.id.clone(),
        };
        if let Err(err) =
            self.waiter
                .wait_for_all_on(ORCHESTRATION_PUBLISHER, &callback, &child_ids)
        {
            return Ok(vec![self.handle_error(&parent, &err)]);
        }

        let mut commands = Vec::with_capacity(children.len());
        for child in children {
            let child = self.nodes.save(child)?;
            debug!(
                node_execution_id = %parent.id,
                child_node_execution_id = %child.id,
                child_identifier = %child.node.identifier,
                "child node execution spawned"
            );
            commands.push(EngineCommand::Start {
                node_execution_id: child.id,
            });
        }
        Ok(commands)
    }

    fn build_children(
        &self,
        parent: &NodeExecution,
        child_node_ids: &[String],
    ) -> Result<Vec<NodeExecution>> {
        let plan = self.plans.get(parent.plan_execution_id())?;

        let mut children = Vec::with_capacity(child_node_ids.len());
        for child_node_id in child_node_ids {
            let plan_node = plan.plan.fetch_node(child_node_id).cloned().ok_or_else(|| {
                EngineError::ContractViolation(format!(
                    "node '{}' spawned unknown child '{child_node_id}'",
                    parent.node.id
                ))
            })?;
            let mode = self.registry.mode_of(&plan_node.step_type)?;
            let mut child = NodeExecution::new(&parent.ambiance, plan_node, mode);
            child.parent_id = Some(parent.id.clone());
            child.notify_id = Some(child.id.clone());
            children.push(child);
        }
        Ok(children)
    }

    /// Turn an invocation error into a FAILED conclusion so it goes through
    /// the advisers like any other failure.
    fn handle_error(&self, node: &NodeExecution, err: &EngineError) -> EngineCommand {
        warn!(
            plan_execution_id = %node.plan_execution_id(),
            node_execution_id = %node.id,
            identifier = %node.node.identifier,
            error = %err,
            "node invocation failed"
        );

        let info = if err.is_retryable() {
            FailureInfo::retryable(err.to_string())
        } else {
            FailureInfo::new(err.to_string())
        };
        EngineCommand::Conclude {
            node_execution_id: node.id.clone(),
            response: StepResponse::failed(info),
        }
    }

    fn after_interrupted(&self, id: &str, check: &ExecutionCheck) -> Result<Vec<EngineCommand>> {
        let node = self.nodes.get(id)?;
        info!(
            node_execution_id = id,
            interrupt_type = ?check.interrupt_type,
            reason = %check.reason,
            status = %node.status,
            "invocation stopped by interrupt"
        );
        self.emit_node_status(&node);

        if node.status.is_terminal() {
            Ok(vec![EngineCommand::Advance {
                node_execution_id: node.id,
            }])
        } else {
            Ok(Vec::new())
        }
    }

    fn resolve_parameters(&self, node: &NodeExecution) -> Result<Value> {
        let mut steps = HashMap::new();
        for other in self.nodes.fetch_by_plan(node.plan_execution_id())? {
            if other.old_retry || other.node.skip_expression_chain || other.outcomes.is_empty() {
                continue;
            }
            steps.insert(other.node.identifier.clone(), other.outcomes);
        }

        let ctx = ExpressionContext {
            plan_execution_id: node.plan_execution_id().to_string(),
            setup_abstractions: node.ambiance.setup_abstractions.clone(),
            node_identifier: node.node.identifier.clone(),
            node_execution_id: node.id.clone(),
            steps,
        };
        Ok(self.resolver.resolve(&node.node.step_parameters, &ctx))
    }
}
