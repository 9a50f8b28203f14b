use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use nodeflow::advisers::AdviserRegistry;
use nodeflow::config::EngineConfig;
use nodeflow::engine::Orchestrator;
use nodeflow::execution::{NodeExecution, Status};
use nodeflow::plan::Plan;
use nodeflow::steps::StepRegistry;
use nodeflow::store::StateStore;
use nodeflow::waiter::{ConsumerHandle, WaitNotifyEngine, spawn_consumers};

use crate::fake_executor::FakeTaskExecutor;
use crate::with_timeout;

/// Engine config with short intervals, suitable for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        consumer_workers: 2,
        poll_interval_ms: 20,
        lease_ms: 2_000,
        cleanup_interval_secs: 1,
        ..EngineConfig::default()
    }
}

/// Store + wait/notify engine + fake task executor + orchestrator, wired
/// together the way the binary wires the real ones.
///
/// Consumers are not started by default: call [`TestHarness::pump`] to
/// deliver ready waits deterministically, or [`TestHarness::start_consumers`]
/// for background delivery.
pub struct TestHarness {
    pub store: StateStore,
    pub waiter: Arc<WaitNotifyEngine>,
    pub executor: Arc<FakeTaskExecutor>,
    pub orchestrator: Arc<Orchestrator>,
    consumers: Option<ConsumerHandle>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_registry(StepRegistry::with_builtins())
    }

    pub fn with_registry(registry: StepRegistry) -> Self {
        Self::with_config(registry, test_config())
    }

    pub fn with_config(registry: StepRegistry, config: EngineConfig) -> Self {
        Self::with_store(StateStore::in_memory(), registry, config)
    }

    /// Wire the engine over a caller-built store, e.g. one with a
    /// [`ConflictingTable`](crate::conflicts::ConflictingTable) in it.
    pub fn with_store(store: StateStore, registry: StepRegistry, config: EngineConfig) -> Self {
        let waiter = Arc::new(WaitNotifyEngine::new(store.clone(), config.clone()));
        let executor = Arc::new(FakeTaskExecutor::new(Arc::clone(&waiter)));
        let orchestrator = Orchestrator::new(
            &store,
            Arc::clone(&waiter),
            executor.clone(),
            Arc::new(registry),
            AdviserRegistry::with_builtins(),
            config,
        )
        .expect("orchestrator should build");

        Self {
            store,
            waiter,
            executor,
            orchestrator,
            consumers: None,
        }
    }

    pub fn start_consumers(&mut self) {
        if self.consumers.is_none() {
            self.consumers = Some(spawn_consumers(Arc::clone(&self.waiter)));
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(consumers) = self.consumers.take() {
            consumers.shutdown().await;
        }
    }

    pub async fn trigger(&self, plan: Plan) -> String {
        self.trigger_with_setup(plan, BTreeMap::new()).await
    }

    pub async fn trigger_with_setup(&self, plan: Plan, setup: BTreeMap<String, String>) -> String {
        self.orchestrator
            .trigger_execution(plan, setup)
            .await
            .expect("trigger_execution should succeed")
    }

    /// Deliver ready waits until nothing is left to deliver.
    pub async fn pump(&self) -> usize {
        let mut total = 0;
        loop {
            let delivered = self
                .waiter
                .process_pending()
                .await
                .expect("process_pending should succeed");
            if delivered == 0 && self.waiter.pending_events().unwrap_or(0) == 0 {
                return total;
            }
            total += delivered;
            if delivered == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    pub fn status(&self, plan_execution_id: &str) -> Status {
        self.orchestrator
            .get_execution_status(plan_execution_id)
            .expect("plan execution should exist")
    }

    pub async fn wait_for_plan(&self, plan_execution_id: &str) -> Status {
        with_timeout(self.orchestrator.wait_for_plan(plan_execution_id))
            .await
            .expect("plan execution should exist")
    }

    /// Every attempt of the node with `identifier`, oldest first.
    pub fn attempts(&self, plan_execution_id: &str, identifier: &str) -> Vec<NodeExecution> {
        self.orchestrator
            .node_executions(plan_execution_id)
            .expect("node executions should load")
            .into_iter()
            .filter(|n| n.node.identifier == identifier)
            .collect()
    }

    /// Current (non-superseded) attempt of the node with `identifier`.
    pub fn node(&self, plan_execution_id: &str, identifier: &str) -> NodeExecution {
        self.attempts(plan_execution_id, identifier)
            .into_iter()
            .rev()
            .find(|n| !n.old_retry)
            .unwrap_or_else(|| panic!("no node execution for '{identifier}'"))
    }

    pub fn try_node(&self, plan_execution_id: &str, identifier: &str) -> Option<NodeExecution> {
        self.attempts(plan_execution_id, identifier)
            .into_iter()
            .rev()
            .find(|n| !n.old_retry)
    }

    /// Poll until the current attempt of `identifier` has `status`.
    pub async fn wait_for_node_status(
        &self,
        plan_execution_id: &str,
        identifier: &str,
        status: Status,
    ) -> NodeExecution {
        with_timeout(async {
            loop {
                if let Some(node) = self.try_node(plan_execution_id, identifier) {
                    if node.status == status {
                        return node;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
