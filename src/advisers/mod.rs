// src/advisers/mod.rs

//! Failure advisers.
//!
//! When a node fails, the orchestrator walks the node's adviser list in
//! order and applies the first decision it gets. A node with no matching
//! adviser is marked failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ambiance::Ambiance;
use crate::errors::{EngineError, Result};
use crate::execution::NodeExecution;

pub mod builtin;

pub use builtin::{IgnoreAdviser, ManualInterventionAdviser, MarkFailedAdviser, RetryAdviser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    /// Start a new attempt of the same node.
    Retry,
    /// Record the failure but advance as if the node succeeded.
    Ignore,
    MarkFailed,
    /// Suspend until a node-level interrupt decides.
    ManualIntervention,
}

pub trait Adviser: Send + Sync {
    /// `None` passes the decision on to the next adviser.
    fn on_failure(
        &self,
        ambiance: &Ambiance,
        node_execution: &NodeExecution,
        parameters: &Value,
    ) -> Result<Option<AdviserResponse>>;
}

/// Adviser type -> implementation.
#[derive(Clone, Default)]
pub struct AdviserRegistry {
    advisers: HashMap<String, Arc<dyn Adviser>>,
}

impl fmt::Debug for AdviserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<_> = self.advisers.keys().collect();
        f.debug_struct("AdviserRegistry")
            .field("types", &types)
            .finish()
    }
}

impl AdviserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register("retry", Arc::new(RetryAdviser))
            .register("ignore", Arc::new(IgnoreAdviser))
            .register("mark_failed", Arc::new(MarkFailedAdviser))
            .register("manual_intervention", Arc::new(ManualInterventionAdviser));
        registry
    }

    pub fn register(&mut self, adviser_type: impl Into<String>, adviser: Arc<dyn Adviser>) -> &mut Self {
        self.advisers.insert(adviser_type.into(), adviser);
        self
    }

    pub fn get(&self, adviser_type: &str) -> Result<Arc<dyn Adviser>> {
        self.advisers
            .get(adviser_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownAdviserType(adviser_type.to_string()))
    }

    pub fn contains(&self, adviser_type: &str) -> bool {
        self.advisers.contains_key(adviser_type)
    }

    /// Exactly one decision for a failed node: the first adviser that answers,
    /// or `MarkFailed`.
    pub fn decide(&self, node_execution: &NodeExecution) -> AdviserResponse {
        for obtainment in &node_execution.node.advisers {
            let adviser = match self.get(&obtainment.adviser_type) {
                Ok(adviser) => adviser,
                Err(e) => {
                    warn!(node_execution_id = %node_execution.id, error = %e, "skipping adviser");
                    continue;
                }
            };

            match adviser.on_failure(
                &node_execution.ambiance,
                node_execution,
                &obtainment.parameters,
            ) {
                Ok(Some(decision)) => {
                    debug!(
                        node_execution_id = %node_execution.id,
                        adviser = %obtainment.adviser_type,
                        ?decision,
                        "adviser decided"
                    );
                    return decision;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    node_execution_id = %node_execution.id,
                    adviser = %obtainment.adviser_type,
                    error = %e,
                    "adviser failed; trying the next one"
                ),
            }
        }

        AdviserResponse::MarkFailed
    }
}
