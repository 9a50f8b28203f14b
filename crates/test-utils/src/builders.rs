#![allow(dead_code)]

use serde_json::Value;
use nodeflow::plan::{AdviserObtainment, NodeGroup, Plan, PlanNode};

/// Builder for `Plan` to simplify test setup.
///
/// The start node defaults to the first node added.
pub struct PlanBuilder {
    start: Option<String>,
    nodes: Vec<PlanNode>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            start: None,
            nodes: Vec::new(),
        }
    }

    pub fn start(mut self, id: &str) -> Self {
        self.start = Some(id.to_string());
        self
    }

    pub fn node(mut self, node: PlanNode) -> Self {
        if self.start.is_none() {
            self.start = Some(node.id.clone());
        }
        self.nodes.push(node);
        self
    }

    pub fn build(self) -> Plan {
        let start = self.start.expect("plan builder needs at least one node");
        Plan::new(start, self.nodes).expect("Failed to build valid plan from builder")
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `PlanNode`.
pub struct NodeBuilder {
    node: PlanNode,
}

impl NodeBuilder {
    pub fn new(id: &str, step_type: &str) -> Self {
        Self {
            node: PlanNode::new(id, step_type),
        }
    }

    pub fn identifier(mut self, identifier: &str) -> Self {
        self.node.identifier = identifier.to_string();
        self
    }

    pub fn group(mut self, group: NodeGroup) -> Self {
        self.node.group = group;
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.node.step_parameters = params;
        self
    }

    pub fn next(mut self, id: &str) -> Self {
        self.node.next = Some(id.to_string());
        self
    }

    pub fn child(mut self, id: &str) -> Self {
        self.node.children.push(id.to_string());
        self
    }

    pub fn children(mut self, ids: &[&str]) -> Self {
        self.node
            .children
            .extend(ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn adviser(mut self, adviser_type: &str, parameters: Value) -> Self {
        self.node
            .advisers
            .push(AdviserObtainment::new(adviser_type, parameters));
        self
    }

    pub fn skip_expression_chain(mut self, val: bool) -> Self {
        self.node.skip_expression_chain = val;
        self
    }

    pub fn build(self) -> PlanNode {
        self.node
    }
}
