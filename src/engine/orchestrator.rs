// src/engine/orchestrator.rs

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info};

use super::callbacks::{ORCHESTRATION_PUBLISHER, OrchestrationCallback};
use super::{EngineCommand, EngineEvent};
use crate::advisers::AdviserRegistry;
use crate::ambiance::Ambiance;
use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::execution::{
    NodeExecution, NodeExecutionService, PlanExecution, PlanExecutionService, Status,
};
use crate::expressions::ExpressionResolver;
use crate::interrupts::{Interrupt, InterruptService};
use crate::plan::Plan;
use crate::steps::StepRegistry;
use crate::store::StateStore;
use crate::strategies::StrategyFactory;
use crate::tasks::TaskExecutor;
use crate::waiter::WaitNotifyEngine;

const EVENT_CAPACITY: usize = 256;

/// Drives plan executions from start to a terminal status.
///
/// Every entry point (trigger, wait/notify delivery, interrupt registration,
/// recovery) turns into a list of [`EngineCommand`]s that
/// [`Orchestrator::run_commands`] executes until no follow-up is left.
/// A failing command is logged and contained; it never takes the caller
/// down.
pub struct Orchestrator {
    pub(super) plans: PlanExecutionService,
    pub(super) nodes: NodeExecutionService,
    pub(super) interrupts: InterruptService,
    pub(super) waiter: Arc<WaitNotifyEngine>,
    pub(super) task_executor: Arc<dyn TaskExecutor>,
    pub(super) registry: Arc<StepRegistry>,
    pub(super) strategies: StrategyFactory,
    pub(super) advisers: AdviserRegistry,
    pub(super) resolver: ExpressionResolver,
    pub(super) events: broadcast::Sender<EngineEvent>,
    pub(super) config: EngineConfig,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("strategies", &self.strategies)
            .field("advisers", &self.advisers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build the orchestrator and register its notify callback with
    /// `waiter`.
    pub fn new(
        store: &StateStore,
        waiter: Arc<WaitNotifyEngine>,
        task_executor: Arc<dyn TaskExecutor>,
        registry: Arc<StepRegistry>,
        advisers: AdviserRegistry,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        let nodes = NodeExecutionService::new(Arc::clone(&store.nodes), config.max_update_attempts);
        let plans = PlanExecutionService::new(Arc::clone(&store.plans), config.max_update_attempts);
        let interrupts = InterruptService::new(
            Arc::clone(&store.interrupts),
            nodes.clone(),
            config.max_update_attempts,
        );
        let strategies = StrategyFactory::new(Arc::clone(&registry), Arc::clone(&task_executor));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let orchestrator = Arc::new(Self {
            plans,
            nodes,
            interrupts,
            waiter,
            task_executor,
            registry,
            strategies,
            advisers,
            resolver: ExpressionResolver::new()?,
            events,
            config,
        });

        orchestrator.waiter.register_publisher(
            ORCHESTRATION_PUBLISHER,
            Arc::new(OrchestrationCallback::new(Arc::downgrade(&orchestrator))),
        );

        Ok(orchestrator)
    }

    /// Start a new execution of `plan`. Synchronous nodes at the head of the
    /// plan run before this returns.
    pub async fn trigger_execution(
        &self,
        plan: Plan,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Result<String> {
        self.check_registrations(&plan)?;

        let start = plan.fetch_starting_node().cloned().ok_or_else(|| {
            EngineError::ConfigError(format!(
                "start node '{}' is not part of the plan",
                plan.start_node_id()
            ))
        })?;
        let mode = self.registry.mode_of(&start.step_type)?;

        let plan_execution = self.plans.save(PlanExecution::new(
            plan,
            setup_abstractions,
            self.config.plan_ttl_days,
        )?)?;
        let ambiance = Ambiance::new(
            plan_execution.id.clone(),
            plan_execution.setup_abstractions.clone(),
        );
        let node = self.nodes.save(NodeExecution::new(&ambiance, start, mode))?;

        info!(
            plan_execution_id = %plan_execution.id,
            start_node = %node.node.id,
            nodes = plan_execution.plan.len(),
            "plan execution triggered"
        );

        self.run_commands(vec![EngineCommand::Start {
            node_execution_id: node.id,
        }])
        .await;

        Ok(plan_execution.id)
    }

    pub fn get_execution_status(&self, plan_execution_id: &str) -> Result<Status> {
        Ok(self.plans.get(plan_execution_id)?.status)
    }

    pub fn plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution> {
        self.plans.get(plan_execution_id)
    }

    pub fn node_execution(&self, node_execution_id: &str) -> Result<NodeExecution> {
        self.nodes.get(node_execution_id)
    }

    /// Every node execution of a plan, superseded retries included.
    pub fn node_executions(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        let mut nodes = self.nodes.fetch_by_plan(plan_execution_id)?;
        nodes.sort_by_key(|n| n.created_at);
        Ok(nodes)
    }

    pub fn interrupt_history(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        self.interrupts.fetch_all(plan_execution_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn waiter(&self) -> &Arc<WaitNotifyEngine> {
        &self.waiter
    }

    /// Wait until the plan execution reaches a terminal status.
    pub async fn wait_for_plan(&self, plan_execution_id: &str) -> Result<Status> {
        let mut rx = self.subscribe();
        loop {
            let status = self.get_execution_status(plan_execution_id)?;
            if status.is_terminal() {
                return Ok(status);
            }

            match rx.recv().await {
                Ok(EngineEvent::PlanFinished {
                    plan_execution_id: finished,
                    status,
                }) if finished == plan_execution_id => return Ok(status),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return self.get_execution_status(plan_execution_id),
            }
        }
    }

    /// Execute `initial` and every follow-up command until none are left.
    pub async fn run_commands(&self, initial: Vec<EngineCommand>) {
        let mut queue: VecDeque<EngineCommand> = initial.into();

        while let Some(command) = queue.pop_front() {
            let label = command.label();
            let node_execution_id = command.node_execution_id().to_string();
            debug!(command = label, %node_execution_id, "handling engine command");

            match self.handle_command(command).await {
                Ok(follow_ups) => queue.extend(follow_ups),
                Err(err) => error!(
                    command = label,
                    %node_execution_id,
                    error = %err,
                    "engine command failed"
                ),
            }
        }
    }

    async fn handle_command(&self, command: EngineCommand) -> Result<Vec<EngineCommand>> {
        match command {
            EngineCommand::Start { node_execution_id } => {
                self.handle_start(&node_execution_id).await
            }
            EngineCommand::Resume {
                node_execution_id,
                responses,
            } => self.handle_resume(&node_execution_id, responses).await,
            EngineCommand::Conclude {
                node_execution_id,
                response,
            } => self.handle_conclude(&node_execution_id, response),
            EngineCommand::Advance { node_execution_id } => {
                self.handle_advance(&node_execution_id)
            }
        }
    }

    /// Every step type and adviser type the plan names must be registered.
    fn check_registrations(&self, plan: &Plan) -> Result<()> {
        for node in plan.nodes() {
            if !self.registry.contains(&node.step_type) {
                return Err(EngineError::UnknownStepType(node.step_type.clone()));
            }
            for adviser in &node.advisers {
                if !self.advisers.contains(&adviser.adviser_type) {
                    return Err(EngineError::UnknownAdviserType(
                        adviser.adviser_type.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub(super) fn emit_node_status(&self, node: &NodeExecution) {
        let _ = self.events.send(EngineEvent::NodeStatusChanged {
            plan_execution_id: node.plan_execution_id().to_string(),
            node_execution_id: node.id.clone(),
            identifier: node.node.identifier.clone(),
            status: node.status,
        });
    }

    pub(super) fn emit_plan_finished(&self, plan: &PlanExecution) {
        let _ = self.events.send(EngineEvent::PlanFinished {
            plan_execution_id: plan.id.clone(),
            status: plan.status,
        });
    }
}
