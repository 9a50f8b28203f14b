// src/engine/recovery.rs

use tracing::info;

use super::orchestrator::Orchestrator;
use super::EngineCommand;
use crate::errors::Result;
use crate::execution::Status;

impl Orchestrator {
    /// Pick up work left behind by a previous process on the same store.
    ///
    /// QUEUED nodes of RUNNING plans are started, terminal nodes that never
    /// linked a successor are advanced again, and complete wait instances
    /// without a queue entry are re-enqueued. Waiting nodes are left to
    /// wait/notify. Returns the number of commands issued.
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let mut commands = Vec::new();

        for plan in self.plans.fetch_by_status(&[Status::Running])? {
            for node in self.nodes.fetch_by_plan(&plan.id)? {
                if node.old_retry {
                    continue;
                }
                if node.status == Status::Queued {
                    commands.push(EngineCommand::Start {
                        node_execution_id: node.id,
                    });
                } else if node.status.is_terminal() && node.next_id.is_none() {
                    commands.push(EngineCommand::Advance {
                        node_execution_id: node.id,
                    });
                }
            }
        }

        let requeued = self.waiter.recover()?;
        let issued = commands.len();
        info!(issued, requeued, "recovering in-flight executions");

        self.run_commands(commands).await;
        Ok(issued)
    }
}
