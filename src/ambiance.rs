// src/ambiance.rs

//! Execution context threaded through a plan run.
//!
//! An [`Ambiance`] is a call-stack of [`Level`]s plus the setup abstractions
//! (account, org, project, ...) and the owning plan execution id. It is never
//! mutated in place: every node execution receives a derived copy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::Span;

use crate::plan::{NodeGroup, PlanNode};

/// One frame of the ambiance stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Plan node id.
    pub setup_id: String,
    /// Node execution id.
    pub runtime_id: String,
    pub identifier: String,
    pub step_type: String,
    pub group: NodeGroup,
}

impl Level {
    pub fn from_plan_node(runtime_id: impl Into<String>, node: &PlanNode) -> Self {
        Self {
            setup_id: node.id.clone(),
            runtime_id: runtime_id.into(),
            identifier: node.identifier.clone(),
            step_type: node.step_type.clone(),
            group: node.group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    pub plan_execution_id: String,
    pub setup_abstractions: BTreeMap<String, String>,
    pub levels: Vec<Level>,
}

impl Ambiance {
    pub fn new(
        plan_execution_id: impl Into<String>,
        setup_abstractions: BTreeMap<String, String>,
    ) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            setup_abstractions,
            levels: Vec::new(),
        }
    }

    /// Child ambiance: this one plus `level` on top.
    pub fn with_level(&self, level: Level) -> Self {
        let mut cloned = self.clone();
        cloned.levels.push(level);
        cloned
    }

    /// Ambiance for a sibling that replaces the current top level (used when
    /// advancing along a `next` edge).
    pub fn clone_for_finish(&self) -> Self {
        let mut cloned = self.clone();
        cloned.levels.pop();
        cloned
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    pub fn current_runtime_id(&self) -> Option<&str> {
        self.current_level().map(|l| l.runtime_id.as_str())
    }

    pub fn setup_value(&self, key: &str) -> Option<&str> {
        self.setup_abstractions.get(key).map(String::as_str)
    }

    /// Tracing span carrying the execution coordinates of the current level.
    pub fn span(&self) -> Span {
        let level = self.current_level();
        tracing::info_span!(
            "node",
            plan_execution_id = %self.plan_execution_id,
            node_execution_id = level.map(|l| l.runtime_id.as_str()).unwrap_or(""),
            identifier = level.map(|l| l.identifier.as_str()).unwrap_or(""),
        )
    }
}
