// src/interrupts/handlers.rs

//! Per-node effects of plan-level interrupts.

use std::collections::BTreeMap;

use tracing::info;

use super::{Interrupt, InterruptEffect};
use crate::errors::Result;
use crate::execution::{NodeExecution, NodeExecutionService, ResponseData, Status};

pub trait InterruptHandler: Send + Sync {
    /// Apply `interrupt` to one node execution. `None` when the node was
    /// already past the point where the interrupt could apply.
    fn handle_for_node(
        &self,
        nodes: &NodeExecutionService,
        node_execution_id: &str,
        interrupt: &Interrupt,
        pending: Option<&BTreeMap<String, ResponseData>>,
    ) -> Result<Option<NodeExecution>>;
}

fn apply_status(
    nodes: &NodeExecutionService,
    node_execution_id: &str,
    interrupt: &Interrupt,
    target: Status,
) -> Result<Option<NodeExecution>> {
    let updated = nodes.update_status(node_execution_id, target, |node| {
        let effect = InterruptEffect::new(interrupt, node.status);
        node.interrupt_history.push(effect);
    })?;

    if let Some(node) = &updated {
        info!(
            node_execution_id = %node.id,
            interrupt_type = %interrupt.interrupt_type,
            status = %node.status,
            "interrupt applied to node"
        );
    }
    Ok(updated)
}

/// ABORT_ALL: node -> ABORTED.
pub struct AbortInterruptHandler;

impl InterruptHandler for AbortInterruptHandler {
    fn handle_for_node(
        &self,
        nodes: &NodeExecutionService,
        node_execution_id: &str,
        interrupt: &Interrupt,
        _pending: Option<&BTreeMap<String, ResponseData>>,
    ) -> Result<Option<NodeExecution>> {
        apply_status(nodes, node_execution_id, interrupt, Status::Aborted)
    }
}

/// EXPIRE_ALL: node -> EXPIRED.
pub struct MarkExpiredInterruptHandler;

impl InterruptHandler for MarkExpiredInterruptHandler {
    fn handle_for_node(
        &self,
        nodes: &NodeExecutionService,
        node_execution_id: &str,
        interrupt: &Interrupt,
        _pending: Option<&BTreeMap<String, ResponseData>>,
    ) -> Result<Option<NodeExecution>> {
        apply_status(nodes, node_execution_id, interrupt, Status::Expired)
    }
}

/// PAUSE_ALL: node -> PAUSED, keeping any delivered responses for replay.
pub struct PauseInterruptHandler;

impl InterruptHandler for PauseInterruptHandler {
    fn handle_for_node(
        &self,
        nodes: &NodeExecutionService,
        node_execution_id: &str,
        interrupt: &Interrupt,
        pending: Option<&BTreeMap<String, ResponseData>>,
    ) -> Result<Option<NodeExecution>> {
        let updated = nodes.update_status(node_execution_id, Status::Paused, |node| {
            node.interrupt_history
                .push(InterruptEffect::new(interrupt, node.status));
            node.pending_resume = pending.cloned();
        })?;

        if let Some(node) = &updated {
            info!(
                node_execution_id = %node.id,
                has_pending_resume = node.pending_resume.is_some(),
                "node paused"
            );
        }
        Ok(updated)
    }
}
