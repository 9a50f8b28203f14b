// src/engine/callbacks.rs

//! Bridge from wait/notify deliveries back into the orchestrator.

use std::collections::BTreeMap;
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::orchestrator::Orchestrator;
use super::EngineCommand;
use crate::errors::Result;
use crate::execution::ResponseData;
use crate::types::BoxFuture;
use crate::waiter::NotifyCallback;

/// Publisher name the orchestrator registers its waits under.
pub const ORCHESTRATION_PUBLISHER: &str = "orchestration";

/// Payload stored on every wait instance the orchestrator registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EngineCallback {
    Resume { node_execution_id: String },
}

/// Holds a weak reference so the waiter does not keep the orchestrator
/// alive.
#[derive(Debug)]
pub struct OrchestrationCallback {
    orchestrator: Weak<Orchestrator>,
}

impl OrchestrationCallback {
    pub fn new(orchestrator: Weak<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl NotifyCallback for OrchestrationCallback {
    fn notify(
        &self,
        callback: Value,
        responses: BTreeMap<String, ResponseData>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let EngineCallback::Resume { node_execution_id } = serde_json::from_value(callback)?;

            let Some(orchestrator) = self.orchestrator.upgrade() else {
                warn!(
                    %node_execution_id,
                    "orchestrator dropped; ignoring delivery"
                );
                return Ok(());
            };

            orchestrator
                .run_commands(vec![EngineCommand::Resume {
                    node_execution_id,
                    responses,
                }])
                .await;
            Ok(())
        })
    }
}
