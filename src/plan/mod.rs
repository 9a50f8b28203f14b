// src/plan/mod.rs

//! Immutable plan model.
//!
//! A [`Plan`] is a set of [`PlanNode`]s plus the id of the node to start
//! from. It is built once per execution (from a TOML file or
//! programmatically), embedded in the owning `PlanExecution`, and never
//! mutated afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

pub mod node;

pub use node::{AdviserObtainment, NodeGroup, PlanNode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    start_node_id: String,
    nodes: BTreeMap<String, PlanNode>,
}

impl Plan {
    /// Build a plan, checking that the start node and every `next` /
    /// `children` reference exist.
    ///
    /// Acyclicity is checked when loading from a file (see
    /// [`crate::config::validate`]); programmatic callers are trusted.
    pub fn new(start_node_id: impl Into<String>, nodes: Vec<PlanNode>) -> Result<Self> {
        let start_node_id = start_node_id.into();
        let nodes: BTreeMap<String, PlanNode> =
            nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

        if !nodes.contains_key(&start_node_id) {
            return Err(EngineError::ConfigError(format!(
                "start node '{start_node_id}' is not part of the plan"
            )));
        }

        for node in nodes.values() {
            let refs = node.next.iter().chain(node.children.iter());
            for target in refs {
                if !nodes.contains_key(target) {
                    return Err(EngineError::ConfigError(format!(
                        "node '{}' references unknown node '{}'",
                        node.id, target
                    )));
                }
            }
        }

        Ok(Self {
            start_node_id,
            nodes,
        })
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn fetch_starting_node(&self) -> Option<&PlanNode> {
        self.nodes.get(&self.start_node_id)
    }

    pub fn fetch_node(&self, id: &str) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
