// src/interrupts/mod.rs

//! Interrupt service.
//!
//! Interrupts are control-plane records registered from outside (API, CLI
//! Ctrl-C). Plan-level interrupts (ABORT_ALL, PAUSE_ALL, EXPIRE_ALL) are
//! checked by the orchestrator right before every strategy `start` /
//! `resume`; node-level ones (RETRY, MARK_SUCCESS, MARK_FAILED, IGNORE) act
//! on a node waiting for manual intervention.
//!
//! State machine: REGISTERED -> PROCESSING -> {PROCESSED_SUCCESSFULLY,
//! DISCARDED}. The first transition is a compare-and-set so only one
//! processor ever owns an interrupt. Records are never deleted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::execution::{NodeExecution, NodeExecutionService, ResponseData, Status};
use crate::store::{Entity, Table, modify};

pub mod handlers;

pub use handlers::{
    AbortInterruptHandler, InterruptHandler, MarkExpiredInterruptHandler, PauseInterruptHandler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    AbortAll,
    PauseAll,
    ResumeAll,
    ExpireAll,
    Retry,
    MarkSuccess,
    MarkFailed,
    Ignore,
}

impl InterruptType {
    pub fn is_plan_level(self) -> bool {
        matches!(
            self,
            InterruptType::AbortAll
                | InterruptType::PauseAll
                | InterruptType::ResumeAll
                | InterruptType::ExpireAll
        )
    }
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterruptType::AbortAll => "ABORT_ALL",
            InterruptType::PauseAll => "PAUSE_ALL",
            InterruptType::ResumeAll => "RESUME_ALL",
            InterruptType::ExpireAll => "EXPIRE_ALL",
            InterruptType::Retry => "RETRY",
            InterruptType::MarkSuccess => "MARK_SUCCESS",
            InterruptType::MarkFailed => "MARK_FAILED",
            InterruptType::Ignore => "IGNORE",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for InterruptType {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ABORT_ALL" => Ok(InterruptType::AbortAll),
            "PAUSE_ALL" => Ok(InterruptType::PauseAll),
            "RESUME_ALL" => Ok(InterruptType::ResumeAll),
            "EXPIRE_ALL" => Ok(InterruptType::ExpireAll),
            "RETRY" => Ok(InterruptType::Retry),
            "MARK_SUCCESS" => Ok(InterruptType::MarkSuccess),
            "MARK_FAILED" => Ok(InterruptType::MarkFailed),
            "IGNORE" => Ok(InterruptType::Ignore),
            other => Err(EngineError::InvalidInterrupt(format!(
                "unknown interrupt type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    Registered,
    Processing,
    ProcessedSuccessfully,
    Discarded,
}

impl InterruptState {
    pub fn is_active(self) -> bool {
        matches!(self, InterruptState::Registered | InterruptState::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: String,
    pub plan_execution_id: String,
    /// `None` for plan-level interrupts.
    pub node_execution_id: Option<String>,
    pub interrupt_type: InterruptType,
    pub state: InterruptState,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Interrupt {
    pub fn new(
        plan_execution_id: impl Into<String>,
        interrupt_type: InterruptType,
        node_execution_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan_execution_id: plan_execution_id.into(),
            node_execution_id,
            interrupt_type,
            state: InterruptState::Registered,
            created_at: Utc::now(),
            version: 0,
        }
    }
}

impl Entity for Interrupt {
    const KIND: &'static str = "Interrupt";

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Audit entry appended to a node execution's interrupt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEffect {
    pub interrupt_id: String,
    pub interrupt_type: InterruptType,
    /// Node status right before the interrupt was applied.
    pub from_status: Status,
    pub applied_at: DateTime<Utc>,
}

impl InterruptEffect {
    pub fn new(interrupt: &Interrupt, from_status: Status) -> Self {
        Self {
            interrupt_id: interrupt.id.clone(),
            interrupt_type: interrupt.interrupt_type,
            from_status,
            applied_at: Utc::now(),
        }
    }
}

/// Result of the pre-invocation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionCheck {
    pub proceed: bool,
    /// Interrupt that stopped (or was propagated past) the invocation.
    pub interrupt_type: Option<InterruptType>,
    pub reason: String,
}

impl ExecutionCheck {
    fn proceed() -> Self {
        Self {
            proceed: true,
            interrupt_type: None,
            reason: "no active plan level interrupt".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterruptService {
    table: Arc<dyn Table<Interrupt>>,
    nodes: NodeExecutionService,
    max_update_attempts: u32,
}

impl InterruptService {
    pub fn new(
        table: Arc<dyn Table<Interrupt>>,
        nodes: NodeExecutionService,
        max_update_attempts: u32,
    ) -> Self {
        Self {
            table,
            nodes,
            max_update_attempts,
        }
    }

    /// Persist `interrupt` in the REGISTERED state.
    pub fn save(&self, mut interrupt: Interrupt) -> Result<Interrupt> {
        if !interrupt.interrupt_type.is_plan_level() && interrupt.node_execution_id.is_none() {
            return Err(EngineError::InvalidInterrupt(format!(
                "{} requires a node execution id",
                interrupt.interrupt_type
            )));
        }
        interrupt.state = InterruptState::Registered;
        let saved = self.table.insert(interrupt)?;
        info!(
            interrupt_id = %saved.id,
            plan_execution_id = %saved.plan_execution_id,
            interrupt_type = %saved.interrupt_type,
            "interrupt registered"
        );
        Ok(saved)
    }

    pub fn get(&self, id: &str) -> Result<Interrupt> {
        self.table
            .get(id)?
            .ok_or_else(|| EngineError::not_found(Interrupt::KIND, id))
    }

    /// Called right before a strategy `start` / `resume` of `node`.
    ///
    /// ABORT_ALL and EXPIRE_ALL terminate leaf nodes on the spot and stop the
    /// invocation; parent nodes proceed so the interrupt reaches their
    /// children. PAUSE_ALL pauses any node, stashing `pending` responses for
    /// replay on RESUME_ALL.
    pub fn check_pre_invocation(
        &self,
        node: &NodeExecution,
        pending: Option<&BTreeMap<String, ResponseData>>,
    ) -> Result<ExecutionCheck> {
        let active = self.fetch_active_plan_level(node.plan_execution_id())?;

        let terminating = active.iter().find(|i| {
            matches!(
                i.interrupt_type,
                InterruptType::AbortAll | InterruptType::ExpireAll
            )
        });

        if let Some(interrupt) = terminating {
            if node.mode.is_parent() {
                return Ok(ExecutionCheck {
                    proceed: true,
                    interrupt_type: Some(interrupt.interrupt_type),
                    reason: format!(
                        "{} propagates to children of parent node",
                        interrupt.interrupt_type
                    ),
                });
            }

            let handler: &dyn InterruptHandler = match interrupt.interrupt_type {
                InterruptType::AbortAll => &AbortInterruptHandler,
                _ => &MarkExpiredInterruptHandler,
            };
            handler.handle_for_node(&self.nodes, &node.id, interrupt, pending)?;

            return Ok(ExecutionCheck {
                proceed: false,
                interrupt_type: Some(interrupt.interrupt_type),
                reason: format!("{} applied to leaf node", interrupt.interrupt_type),
            });
        }

        if let Some(interrupt) = active
            .iter()
            .find(|i| i.interrupt_type == InterruptType::PauseAll)
        {
            PauseInterruptHandler.handle_for_node(&self.nodes, &node.id, interrupt, pending)?;
            return Ok(ExecutionCheck {
                proceed: false,
                interrupt_type: Some(InterruptType::PauseAll),
                reason: "plan is paused".to_string(),
            });
        }

        Ok(ExecutionCheck::proceed())
    }

    /// REGISTERED -> PROCESSING. `None` if someone else got there first.
    pub fn mark_processing(&self, id: &str) -> Result<Option<Interrupt>> {
        let claimed = modify(self.table.as_ref(), id, self.max_update_attempts, |interrupt| {
            if interrupt.state != InterruptState::Registered {
                return Ok(false);
            }
            interrupt.state = InterruptState::Processing;
            Ok(true)
        })?;
        if claimed.is_none() {
            debug!(interrupt_id = id, "interrupt already claimed");
        }
        Ok(claimed)
    }

    /// Terminal transition; the record is kept for audit.
    pub fn mark_processed(&self, id: &str, final_state: InterruptState) -> Result<Interrupt> {
        if final_state.is_active() {
            return Err(EngineError::InvalidInterrupt(format!(
                "{final_state:?} is not a final interrupt state"
            )));
        }

        let updated = modify(self.table.as_ref(), id, self.max_update_attempts, |interrupt| {
            if !interrupt.state.is_active() {
                return Ok(false);
            }
            interrupt.state = final_state;
            Ok(true)
        })?;

        match updated {
            Some(interrupt) => {
                info!(
                    interrupt_id = %interrupt.id,
                    interrupt_type = %interrupt.interrupt_type,
                    state = ?interrupt.state,
                    "interrupt processed"
                );
                Ok(interrupt)
            }
            None => self.get(id),
        }
    }

    /// Every interrupt of a plan, oldest first.
    pub fn fetch_all(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        let mut all = self
            .table
            .find(&|i: &Interrupt| i.plan_execution_id == plan_execution_id)?;
        all.sort_by_key(|i| i.created_at);
        Ok(all)
    }

    pub fn fetch_active(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        Ok(self
            .fetch_all(plan_execution_id)?
            .into_iter()
            .filter(|i| i.state.is_active())
            .collect())
    }

    pub fn fetch_active_plan_level(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        Ok(self
            .fetch_active(plan_execution_id)?
            .into_iter()
            .filter(|i| i.node_execution_id.is_none() && i.interrupt_type.is_plan_level())
            .collect())
    }
}
