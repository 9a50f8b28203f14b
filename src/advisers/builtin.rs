// src/advisers/builtin.rs

use serde::Deserialize;
use serde_json::Value;

use super::{Adviser, AdviserResponse};
use crate::ambiance::Ambiance;
use crate::errors::{EngineError, Result};
use crate::execution::NodeExecution;

#[derive(Debug, Deserialize)]
struct RetryParams {
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,
    /// Only retry failures flagged retryable.
    #[serde(default)]
    retryable_only: bool,
}

fn default_max_attempts() -> usize {
    1
}

/// Retries up to `max_attempts` times (counted over the node's retry chain),
/// then passes.
pub struct RetryAdviser;

impl Adviser for RetryAdviser {
    fn on_failure(
        &self,
        _ambiance: &Ambiance,
        node_execution: &NodeExecution,
        parameters: &Value,
    ) -> Result<Option<AdviserResponse>> {
        let params: RetryParams = match parameters {
            Value::Null => serde_json::from_value(Value::Object(Default::default()))?,
            other => serde_json::from_value(other.clone()).map_err(|e| {
                EngineError::ConfigError(format!("invalid retry adviser parameters: {e}"))
            })?,
        };

        if params.retryable_only
            && !node_execution
                .failure_info
                .as_ref()
                .is_some_and(|f| f.retryable)
        {
            return Ok(None);
        }

        if node_execution.retry_ids.len() < params.max_attempts {
            return Ok(Some(AdviserResponse::Retry));
        }
        Ok(None)
    }
}

pub struct IgnoreAdviser;

impl Adviser for IgnoreAdviser {
    fn on_failure(&self, _: &Ambiance, _: &NodeExecution, _: &Value) -> Result<Option<AdviserResponse>> {
        Ok(Some(AdviserResponse::Ignore))
    }
}

pub struct MarkFailedAdviser;

impl Adviser for MarkFailedAdviser {
    fn on_failure(&self, _: &Ambiance, _: &NodeExecution, _: &Value) -> Result<Option<AdviserResponse>> {
        Ok(Some(AdviserResponse::MarkFailed))
    }
}

pub struct ManualInterventionAdviser;

impl Adviser for ManualInterventionAdviser {
    fn on_failure(&self, _: &Ambiance, _: &NodeExecution, _: &Value) -> Result<Option<AdviserResponse>> {
        Ok(Some(AdviserResponse::ManualIntervention))
    }
}
