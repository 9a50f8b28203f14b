// src/execution/service.rs

//! Node and plan execution services.
//!
//! All mutations go through [`crate::store::modify`], so a concurrent writer
//! never blindly overwrites another one. Status changes additionally go
//! through the allowed-start-set guard on [`Status`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::node_execution::NodeExecution;
use super::plan_execution::PlanExecution;
use super::status::Status;
use crate::errors::{EngineError, Result};
use crate::store::{Entity, Table, modify};

#[derive(Debug, Clone)]
pub struct NodeExecutionService {
    table: Arc<dyn Table<NodeExecution>>,
    max_update_attempts: u32,
}

impl NodeExecutionService {
    pub fn new(table: Arc<dyn Table<NodeExecution>>, max_update_attempts: u32) -> Self {
        Self {
            table,
            max_update_attempts,
        }
    }

    pub fn get(&self, id: &str) -> Result<NodeExecution> {
        self.table
            .get(id)?
            .ok_or_else(|| EngineError::not_found(NodeExecution::KIND, id))
    }

    pub fn save(&self, node: NodeExecution) -> Result<NodeExecution> {
        self.table.insert(node)
    }

    /// Apply `ops` unconditionally (status untouched unless `ops` changes it).
    pub fn update<F>(&self, id: &str, mut ops: F) -> Result<NodeExecution>
    where
        F: FnMut(&mut NodeExecution),
    {
        modify(self.table.as_ref(), id, self.max_update_attempts, |node| {
            ops(node);
            Ok(true)
        })?
        .ok_or_else(|| EngineError::not_found(NodeExecution::KIND, id))
    }

    /// Move `id` to `target` and apply `ops` in the same write.
    ///
    /// Returns `Ok(None)` without writing when the current status is not in
    /// [`Status::node_allowed_start_set`] for `target`.
    pub fn update_status<F>(
        &self,
        id: &str,
        target: Status,
        ops: F,
    ) -> Result<Option<NodeExecution>>
    where
        F: FnMut(&mut NodeExecution),
    {
        self.update_status_from(id, target, Status::node_allowed_start_set(target), ops)
    }

    /// Like [`Self::update_status`] with an explicit allowed start set.
    pub fn update_status_from<F>(
        &self,
        id: &str,
        target: Status,
        allowed: &[Status],
        mut ops: F,
    ) -> Result<Option<NodeExecution>>
    where
        F: FnMut(&mut NodeExecution),
    {
        let updated = modify(self.table.as_ref(), id, self.max_update_attempts, |node| {
            if !allowed.contains(&node.status) {
                return Ok(false);
            }
            // `ops` still sees the status being left.
            ops(node);
            let now = Utc::now();
            if target == Status::Running && node.start_ts.is_none() {
                node.start_ts = Some(now);
            }
            if target.is_terminal() {
                node.end_ts = Some(now);
            }
            node.status = target;
            Ok(true)
        })?;

        match &updated {
            Some(node) => debug!(
                node_execution_id = %node.id,
                status = %node.status,
                version = node.version,
                "node execution status updated"
            ),
            None => warn!(
                node_execution_id = id,
                target = %target,
                "node execution not in an allowed start status; update skipped"
            ),
        }
        Ok(updated)
    }

    /// Set `next_id` on `id` unless a successor is already linked. Returns
    /// whether this call did the linking.
    pub fn link_next(&self, id: &str, next_id: &str) -> Result<bool> {
        let linked = modify(self.table.as_ref(), id, self.max_update_attempts, |node| {
            if node.next_id.is_some() {
                return Ok(false);
            }
            node.next_id = Some(next_id.to_string());
            Ok(true)
        })?;
        Ok(linked.is_some())
    }

    pub fn fetch_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>> {
        self.table
            .find(&|n: &NodeExecution| n.parent_id.as_deref() == Some(parent_id))
    }

    pub fn fetch_by_plan(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        self.table
            .find(&|n: &NodeExecution| n.plan_execution_id() == plan_execution_id)
    }

    /// Current (non-superseded) executions of a plan in any of `statuses`.
    pub fn fetch_by_status(
        &self,
        plan_execution_id: &str,
        statuses: &[Status],
    ) -> Result<Vec<NodeExecution>> {
        self.table.find(&|n: &NodeExecution| {
            n.plan_execution_id() == plan_execution_id
                && !n.old_retry
                && statuses.contains(&n.status)
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlanExecutionService {
    table: Arc<dyn Table<PlanExecution>>,
    max_update_attempts: u32,
}

impl PlanExecutionService {
    pub fn new(table: Arc<dyn Table<PlanExecution>>, max_update_attempts: u32) -> Self {
        Self {
            table,
            max_update_attempts,
        }
    }

    pub fn get(&self, id: &str) -> Result<PlanExecution> {
        self.table
            .get(id)?
            .ok_or_else(|| EngineError::not_found(PlanExecution::KIND, id))
    }

    pub fn save(&self, plan: PlanExecution) -> Result<PlanExecution> {
        self.table.insert(plan)
    }

    /// Guarded status change, see [`Status::plan_allowed_start_set`].
    pub fn update_status(&self, id: &str, target: Status) -> Result<Option<PlanExecution>> {
        let allowed = Status::plan_allowed_start_set(target);
        let updated = modify(self.table.as_ref(), id, self.max_update_attempts, |plan| {
            if !allowed.contains(&plan.status) {
                return Ok(false);
            }
            plan.status = target;
            if target.is_terminal() {
                plan.end_ts = Some(Utc::now());
            }
            Ok(true)
        })?;

        if updated.is_none() {
            debug!(
                plan_execution_id = id,
                target = %target,
                "plan execution not in an allowed start status; update skipped"
            );
        }
        Ok(updated)
    }

    pub fn fetch_by_status(&self, statuses: &[Status]) -> Result<Vec<PlanExecution>> {
        self.table
            .find(&|p: &PlanExecution| statuses.contains(&p.status))
    }
}
