// src/engine/interrupt_handling.rs

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::core::{self, SweepAction};
use super::orchestrator::Orchestrator;
use super::EngineCommand;
use crate::errors::{EngineError, Result};
use crate::execution::{NodeExecution, Status};
use crate::interrupts::{
    AbortInterruptHandler, Interrupt, InterruptHandler, InterruptState, InterruptType,
    MarkExpiredInterruptHandler,
};

/// Node statuses an ABORT_ALL / EXPIRE_ALL registration looks at.
const SWEPT: &[Status] = &[
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::InterventionWaiting,
    Status::Paused,
];

impl Orchestrator {
    /// Register an interrupt and act on it.
    ///
    /// - ABORT_ALL / EXPIRE_ALL: running tasks get an abort signal; waiting
    ///   leaves that cannot reach another invocation boundary are terminated
    ///   right away; everything else stops at its next pre-invocation check.
    /// - PAUSE_ALL: the plan is PAUSED and nodes pause at their next
    ///   invocation boundary. The interrupt stays active until RESUME_ALL.
    /// - RESUME_ALL: paused nodes are started again, replaying any responses
    ///   that arrived while they were paused.
    /// - RETRY / MARK_SUCCESS / MARK_FAILED / IGNORE: resolve a node waiting
    ///   for manual intervention. Any other node status is rejected with
    ///   [`EngineError::InvalidInterrupt`] and the interrupt is DISCARDED.
    ///
    /// Interrupts for a finished plan are recorded as DISCARDED.
    pub async fn register_interrupt(
        &self,
        plan_execution_id: &str,
        interrupt_type: InterruptType,
        node_execution_id: Option<&str>,
    ) -> Result<String> {
        let plan = self.plans.get(plan_execution_id)?;
        let interrupt = self.interrupts.save(Interrupt::new(
            plan_execution_id,
            interrupt_type,
            node_execution_id.map(str::to_string),
        ))?;

        if plan.status.is_terminal() {
            warn!(
                plan_execution_id,
                interrupt_id = %interrupt.id,
                %interrupt_type,
                status = %plan.status,
                "plan execution already finished; discarding interrupt"
            );
            self.interrupts
                .mark_processed(&interrupt.id, InterruptState::Discarded)?;
            return Ok(interrupt.id);
        }

        let commands = match interrupt_type {
            InterruptType::AbortAll | InterruptType::ExpireAll => {
                self.process_terminating(&interrupt).await?
            }
            InterruptType::PauseAll => self.process_pause(&interrupt)?,
            InterruptType::ResumeAll => self.process_resume(&interrupt)?,
            InterruptType::Retry
            | InterruptType::MarkSuccess
            | InterruptType::MarkFailed
            | InterruptType::Ignore => self.process_node_level(&interrupt)?,
        };

        self.run_commands(commands).await;
        Ok(interrupt.id)
    }

    async fn process_terminating(&self, interrupt: &Interrupt) -> Result<Vec<EngineCommand>> {
        let Some(interrupt) = self.interrupts.mark_processing(&interrupt.id)? else {
            return Ok(Vec::new());
        };

        let in_flight = self
            .nodes
            .fetch_by_status(&interrupt.plan_execution_id, SWEPT)?;

        let mut commands = Vec::new();
        for node in in_flight {
            let apply_now = match core::sweep_action(&node) {
                SweepAction::LeaveToBoundary => false,
                SweepAction::ApplyNow => true,
                SweepAction::SignalTask { task_id } => {
                    self.signal_abort(&node, task_id).await
                }
            };

            if apply_now && self.apply_terminating(&node, &interrupt)?.is_some() {
                commands.push(EngineCommand::Advance {
                    node_execution_id: node.id.clone(),
                });
            }
        }

        info!(
            plan_execution_id = %interrupt.plan_execution_id,
            interrupt_id = %interrupt.id,
            interrupt_type = %interrupt.interrupt_type,
            terminated = commands.len(),
            "terminating interrupt processed"
        );
        Ok(commands)
    }

    /// Ask the task executor to abort. Returns whether the handler still has
    /// to be applied directly (the executor refused or failed).
    async fn signal_abort(&self, node: &NodeExecution, task_id: String) -> bool {
        match self
            .task_executor
            .abort_task(node.ambiance.setup_abstractions.clone(), task_id.clone())
            .await
        {
            Ok(true) => {
                info!(
                    node_execution_id = %node.id,
                    %task_id,
                    "abort signalled to running task"
                );
                false
            }
            Ok(false) => true,
            Err(err) => {
                warn!(
                    node_execution_id = %node.id,
                    %task_id,
                    error = %err,
                    "abort signal failed; terminating node directly"
                );
                true
            }
        }
    }

    fn apply_terminating(
        &self,
        node: &NodeExecution,
        interrupt: &Interrupt,
    ) -> Result<Option<NodeExecution>> {
        let handler: &dyn InterruptHandler = match interrupt.interrupt_type {
            InterruptType::AbortAll => &AbortInterruptHandler,
            _ => &MarkExpiredInterruptHandler,
        };
        let updated = handler.handle_for_node(&self.nodes, &node.id, interrupt, None)?;
        if let Some(updated) = &updated {
            self.emit_node_status(updated);
        }
        Ok(updated)
    }

    fn process_pause(&self, interrupt: &Interrupt) -> Result<Vec<EngineCommand>> {
        self.interrupts.mark_processing(&interrupt.id)?;
        if self
            .plans
            .update_status(&interrupt.plan_execution_id, Status::Paused)?
            .is_some()
        {
            info!(
                plan_execution_id = %interrupt.plan_execution_id,
                interrupt_id = %interrupt.id,
                "plan execution paused"
            );
        }
        Ok(Vec::new())
    }

    fn process_resume(&self, interrupt: &Interrupt) -> Result<Vec<EngineCommand>> {
        let Some(interrupt) = self.interrupts.mark_processing(&interrupt.id)? else {
            return Ok(Vec::new());
        };
        let plan_execution_id = interrupt.plan_execution_id.as_str();

        for pause in self.interrupts.fetch_active_plan_level(plan_execution_id)? {
            if pause.interrupt_type == InterruptType::PauseAll {
                self.interrupts
                    .mark_processed(&pause.id, InterruptState::ProcessedSuccessfully)?;
            }
        }
        self.plans.update_status(plan_execution_id, Status::Running)?;

        let commands: Vec<EngineCommand> = self
            .nodes
            .fetch_by_status(plan_execution_id, &[Status::Paused])?
            .into_iter()
            .map(|node| match node.pending_resume {
                Some(responses) => EngineCommand::Resume {
                    node_execution_id: node.id,
                    responses,
                },
                None => EngineCommand::Start {
                    node_execution_id: node.id,
                },
            })
            .collect();

        info!(
            plan_execution_id,
            resumed = commands.len(),
            "plan execution resumed"
        );
        self.interrupts
            .mark_processed(&interrupt.id, InterruptState::ProcessedSuccessfully)?;
        Ok(commands)
    }

    fn process_node_level(&self, interrupt: &Interrupt) -> Result<Vec<EngineCommand>> {
        let node_execution_id = interrupt.node_execution_id.as_deref().ok_or_else(|| {
            EngineError::InvalidInterrupt(format!(
                "{} requires a node execution id",
                interrupt.interrupt_type
            ))
        })?;
        let node = self.nodes.get(node_execution_id)?;

        if node.status != Status::InterventionWaiting
            || node.plan_execution_id() != interrupt.plan_execution_id
        {
            self.interrupts
                .mark_processed(&interrupt.id, InterruptState::Discarded)?;
            return Err(EngineError::InvalidInterrupt(format!(
                "{} needs node execution {} of plan {} to be INTERVENTION_WAITING, found {}",
                interrupt.interrupt_type,
                node.id,
                interrupt.plan_execution_id,
                node.status
            )));
        }

        let Some(interrupt) = self.interrupts.mark_processing(&interrupt.id)? else {
            return Ok(Vec::new());
        };

        let commands = match core::intervention_status_for(interrupt.interrupt_type) {
            Some(status) => {
                self.finalize(&node.id, status, None, BTreeMap::new(), Some(&interrupt))?
            }
            None => self.retry_node(&node, None, Some(&interrupt))?,
        };

        let plan_execution_id = interrupt.plan_execution_id.as_str();
        let still_waiting = self
            .nodes
            .fetch_by_status(plan_execution_id, &[Status::InterventionWaiting])?;
        let plan = self.plans.get(plan_execution_id)?;
        if still_waiting.is_empty() && plan.status == Status::InterventionWaiting {
            self.plans.update_status(plan_execution_id, Status::Running)?;
            info!(
                plan_execution_id,
                "manual intervention resolved; plan execution running again"
            );
        }

        self.interrupts
            .mark_processed(&interrupt.id, InterruptState::ProcessedSuccessfully)?;
        Ok(commands)
    }
}
