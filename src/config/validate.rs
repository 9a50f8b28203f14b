// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{EngineConfig, PlanFile, RawPlanFile};
use crate::errors::{EngineError, Result};
use crate::plan::{AdviserObtainment, Plan, PlanNode};

impl TryFrom<RawPlanFile> for PlanFile {
    type Error = EngineError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        validate_plan_file(&raw)?;
        let plan = build_plan(&raw)?;
        Ok(PlanFile::new_unchecked(raw.config, raw.setup, plan))
    }
}

/// Semantic checks on a raw plan file: node presence, references, acyclicity
/// and engine config sanity.
pub fn validate_plan_file(raw: &RawPlanFile) -> Result<()> {
    ensure_has_nodes(raw)?;
    validate_engine_config(&raw.config)?;
    validate_references(raw)?;
    validate_acyclic(raw)?;
    Ok(())
}

fn ensure_has_nodes(raw: &RawPlanFile) -> Result<()> {
    if raw.node.is_empty() {
        return Err(EngineError::ConfigError(
            "plan must contain at least one [node.<id>] section".to_string(),
        ));
    }
    if !raw.node.contains_key(&raw.plan.start) {
        return Err(EngineError::ConfigError(format!(
            "[plan].start refers to unknown node '{}'",
            raw.plan.start
        )));
    }
    Ok(())
}

/// One day.
const MAX_LEASE_MS: u64 = 86_400_000;
/// One year.
const MAX_RESPONSE_RETENTION_SECS: u64 = 31_536_000;
const MAX_PLAN_TTL_DAYS: u64 = 36_500;

pub fn validate_engine_config(cfg: &EngineConfig) -> Result<()> {
    let checks: [(&str, bool); 7] = [
        ("consumer_workers", cfg.consumer_workers == 0),
        ("poll_interval_ms", cfg.poll_interval_ms == 0),
        ("lease_ms", cfg.lease_ms == 0),
        ("max_delivery_attempts", cfg.max_delivery_attempts == 0),
        ("cleanup_interval_secs", cfg.cleanup_interval_secs == 0),
        ("max_update_attempts", cfg.max_update_attempts == 0),
        ("default_task_timeout_secs", cfg.default_task_timeout_secs == 0),
    ];

    for (name, is_zero) in checks {
        if is_zero {
            return Err(EngineError::ConfigError(format!(
                "[config].{name} must be >= 1 (got 0)"
            )));
        }
    }

    let bounds: [(&str, u64, u64); 3] = [
        ("lease_ms", cfg.lease_ms, MAX_LEASE_MS),
        (
            "response_retention_secs",
            cfg.response_retention_secs,
            MAX_RESPONSE_RETENTION_SECS,
        ),
        ("plan_ttl_days", u64::from(cfg.plan_ttl_days), MAX_PLAN_TTL_DAYS),
    ];

    for (name, value, max) in bounds {
        if value > max {
            return Err(EngineError::ConfigError(format!(
                "[config].{name} must be <= {max} (got {value})"
            )));
        }
    }
    Ok(())
}

fn validate_references(raw: &RawPlanFile) -> Result<()> {
    for (id, node) in raw.node.iter() {
        if node.step_type.trim().is_empty() {
            return Err(EngineError::ConfigError(format!(
                "node '{id}' has an empty step_type"
            )));
        }

        for target in node.next.iter().chain(node.children.iter()) {
            if !raw.node.contains_key(target) {
                return Err(EngineError::ConfigError(format!(
                    "node '{id}' references unknown node '{target}'"
                )));
            }
            if target == id {
                return Err(EngineError::ConfigError(format!(
                    "node '{id}' cannot reference itself"
                )));
            }
        }
    }
    Ok(())
}

fn validate_acyclic(raw: &RawPlanFile) -> Result<()> {
    // Edges: node -> next, parent -> child. Either kind of loop would make a
    // run non-terminating.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in raw.node.keys() {
        graph.add_node(id.as_str());
    }

    for (id, node) in raw.node.iter() {
        for target in node.next.iter().chain(node.children.iter()) {
            graph.add_edge(id.as_str(), target.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(EngineError::PlanCycle(format!(
            "cycle detected in plan graph involving node '{}'",
            cycle.node_id()
        ))),
    }
}

fn build_plan(raw: &RawPlanFile) -> Result<Plan> {
    let nodes = raw
        .node
        .iter()
        .map(|(id, cfg)| PlanNode {
            id: id.clone(),
            identifier: cfg.identifier.clone().unwrap_or_else(|| id.clone()),
            group: cfg.group,
            step_type: cfg.step_type.clone(),
            step_parameters: cfg.params.clone(),
            advisers: cfg
                .advisers
                .iter()
                .map(|a| {
                    AdviserObtainment::new(
                        a.adviser_type.clone(),
                        serde_json::Value::Object(a.parameters.clone()),
                    )
                })
                .collect(),
            next: cfg.next.clone(),
            children: cfg.children.clone(),
            skip_expression_chain: cfg.skip_expression_chain,
        })
        .collect();

    Plan::new(raw.plan.start.clone(), nodes)
}
