// src/execution/node_execution.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::mode::ExecutionMode;
use super::response::{ExecutableResponse, FailureInfo, ResponseData};
use super::status::Status;
use crate::ambiance::{Ambiance, Level};
use crate::interrupts::InterruptEffect;
use crate::plan::PlanNode;
use crate::store::Entity;

/// One execution attempt of one plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: String,
    pub ambiance: Ambiance,
    pub node: PlanNode,
    pub mode: ExecutionMode,
    /// Step parameters after expression resolution. `None` until the node is
    /// first invoked.
    pub resolved_step_parameters: Option<Value>,
    pub parent_id: Option<String>,
    pub next_id: Option<String>,
    pub previous_id: Option<String>,
    /// Correlation id published to the wait/notify engine when this
    /// execution's branch ends. Only set for children of a parent node.
    pub notify_id: Option<String>,
    pub status: Status,
    pub executable_responses: Vec<ExecutableResponse>,
    pub interrupt_history: Vec<InterruptEffect>,
    /// Earlier attempts of the same node, oldest first.
    pub retry_ids: Vec<String>,
    /// Set once a newer attempt has superseded this one.
    pub old_retry: bool,
    pub failure_info: Option<FailureInfo>,
    pub outcomes: BTreeMap<String, Value>,
    /// Responses delivered while the node was paused, replayed on resume.
    pub pending_resume: Option<BTreeMap<String, ResponseData>>,
    pub created_at: DateTime<Utc>,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub version: u64,
}

impl NodeExecution {
    /// A QUEUED execution of `node`. The ambiance gets a new level for it on
    /// top of `parent_ambiance`.
    pub fn new(parent_ambiance: &Ambiance, node: PlanNode, mode: ExecutionMode) -> Self {
        let id = Uuid::new_v4().to_string();
        let ambiance = parent_ambiance.with_level(Level::from_plan_node(&id, &node));
        Self {
            id,
            ambiance,
            node,
            mode,
            resolved_step_parameters: None,
            parent_id: None,
            next_id: None,
            previous_id: None,
            notify_id: None,
            status: Status::Queued,
            executable_responses: Vec::new(),
            interrupt_history: Vec::new(),
            retry_ids: Vec::new(),
            old_retry: false,
            failure_info: None,
            outcomes: BTreeMap::new(),
            pending_resume: None,
            created_at: Utc::now(),
            start_ts: None,
            end_ts: None,
            version: 0,
        }
    }

    /// A fresh attempt of this execution's node, linked to it via
    /// `retry_ids` and sharing its parent, notify and previous links.
    pub fn new_retry_attempt(&self) -> Self {
        let mut attempt = Self::new(&self.ambiance.clone_for_finish(), self.node.clone(), self.mode);
        attempt.parent_id = self.parent_id.clone();
        attempt.previous_id = self.previous_id.clone();
        attempt.notify_id = self.notify_id.clone();
        attempt.retry_ids = self.retry_ids.clone();
        attempt.retry_ids.push(self.id.clone());
        attempt
    }

    pub fn plan_execution_id(&self) -> &str {
        &self.ambiance.plan_execution_id
    }

    pub fn latest_executable_response(&self) -> Option<&ExecutableResponse> {
        self.executable_responses.last()
    }

    /// Parameters the step should see: resolved ones if available, raw
    /// otherwise.
    pub fn step_parameters(&self) -> &Value {
        self.resolved_step_parameters
            .as_ref()
            .unwrap_or(&self.node.step_parameters)
    }
}

impl Entity for NodeExecution {
    const KIND: &'static str = "NodeExecution";

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
