// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{NodeGroup, Plan};

/// Plan file exactly as read from TOML, before validation.
///
/// ```toml
/// [config]
/// consumer_workers = 2
///
/// [setup]
/// accountId = "acc-1"
///
/// [plan]
/// start = "pipeline"
///
/// [node.pipeline]
/// group = "pipeline"
/// step_type = "section"
/// children = ["build"]
///
/// [node.build]
/// step_type = "shell"
/// [node.build.params]
/// script = "echo hi"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlanFile {
    #[serde(default)]
    pub config: EngineConfig,

    /// Setup abstractions propagated down every ambiance.
    #[serde(default)]
    pub setup: BTreeMap<String, String>,

    pub plan: PlanSection,

    /// All nodes from `[node.<id>]`, keyed by node id.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,
}

/// `[plan]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSection {
    pub start: String,
}

/// `[node.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Defaults to the table key.
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub group: NodeGroup,

    pub step_type: String,

    #[serde(default)]
    pub next: Option<String>,

    #[serde(default)]
    pub children: Vec<String>,

    #[serde(default)]
    pub skip_expression_chain: bool,

    /// Free-form step parameters (`[node.<id>.params]`).
    #[serde(default)]
    pub params: Value,

    /// `[[node.<id>.advisers]]`, consulted in order on failure.
    #[serde(default)]
    pub advisers: Vec<AdviserConfig>,
}

/// `[[node.<id>.advisers]]` entry: a `type` plus arbitrary parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct AdviserConfig {
    #[serde(rename = "type")]
    pub adviser_type: String,

    #[serde(flatten)]
    pub parameters: serde_json::Map<String, Value>,
}

/// Engine tuning knobs from `[config]`. Every field is optional in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wait/notify consumer pool size.
    #[serde(default = "default_consumer_workers")]
    pub consumer_workers: usize,

    /// Backlog poll interval for consumers when no wake signal arrives.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a consumer owns a claimed notify queue entry.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// Delivery attempts per notify queue entry before it is dropped.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Age after which an unreferenced NotifyResponse is swept.
    #[serde(default = "default_response_retention_secs")]
    pub response_retention_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Reload-and-reapply bound for version conflicts.
    #[serde(default = "default_max_update_attempts")]
    pub max_update_attempts: u32,

    /// Timeout for tasks whose step does not set one.
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    #[serde(default = "default_plan_ttl_days")]
    pub plan_ttl_days: u32,
}

fn default_consumer_workers() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_lease_ms() -> u64 {
    30_000
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_response_retention_secs() -> u64 {
    14 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_max_update_attempts() -> u32 {
    5
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_plan_ttl_days() -> u32 {
    21
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consumer_workers: default_consumer_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_ms: default_lease_ms(),
            max_delivery_attempts: default_max_delivery_attempts(),
            response_retention_secs: default_response_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_update_attempts: default_max_update_attempts(),
            default_task_timeout_secs: default_task_timeout_secs(),
            plan_ttl_days: default_plan_ttl_days(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn response_retention(&self) -> Duration {
        Duration::from_secs(self.response_retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }
}

/// Validated plan file: engine config, setup abstractions and an immutable
/// [`Plan`]. Only constructed through `TryFrom<RawPlanFile>`.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub config: EngineConfig,
    pub setup: BTreeMap<String, String>,
    pub plan: Plan,
}

impl PlanFile {
    pub(crate) fn new_unchecked(
        config: EngineConfig,
        setup: BTreeMap<String, String>,
        plan: Plan,
    ) -> Self {
        Self {
            config,
            setup,
            plan,
        }
    }
}
