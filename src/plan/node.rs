// src/plan/node.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a node in the logical pipeline hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeGroup {
    Pipeline,
    Stages,
    Stage,
    #[default]
    Step,
}

impl fmt::Display for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeGroup::Pipeline => "PIPELINE",
            NodeGroup::Stages => "STAGES",
            NodeGroup::Stage => "STAGE",
            NodeGroup::Step => "STEP",
        };
        f.write_str(s)
    }
}

/// Reference to an adviser plus its parameters, consulted in order when the
/// node fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
    pub adviser_type: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl AdviserObtainment {
    pub fn new(adviser_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            adviser_type: adviser_type.into(),
            parameters,
        }
    }
}

/// Static step definition inside a [`Plan`](super::Plan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Unique id within the plan.
    pub id: String,
    /// Human-facing key, used by `<+steps.IDENTIFIER...>` expressions.
    pub identifier: String,
    pub group: NodeGroup,
    /// Dispatch tag looked up in the step registry.
    pub step_type: String,
    /// Raw, unresolved step parameters.
    pub step_parameters: serde_json::Value,
    pub advisers: Vec<AdviserObtainment>,
    /// Node to advance to once this one succeeds.
    pub next: Option<String>,
    /// Child nodes a parent-mode step may spawn.
    pub children: Vec<String>,
    pub skip_expression_chain: bool,
}

impl PlanNode {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            identifier: id.clone(),
            id,
            group: NodeGroup::default(),
            step_type: step_type.into(),
            step_parameters: serde_json::Value::Null,
            advisers: Vec::new(),
            next: None,
            children: Vec::new(),
            skip_expression_chain: false,
        }
    }
}
