//! Shared fixtures for nodeflow's integration tests: plan builders, scripted
//! steps, a fake task executor and a `TestHarness` that wires the engine over
//! an in-memory store without background consumers.

pub mod builders;
pub mod conflicts;
pub mod fake_executor;
pub mod harness;
pub mod recording;
pub mod steps;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use nodeflow::logging::{LOG_ENV, filter_directives};
use tracing_subscriber::{EnvFilter, fmt};

/// Upper bound for anything a test awaits on: plan completion, a node
/// reaching a status, a shell task finishing.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Capture engine logs per test, filtered the same way the binary filters
/// them (`NODEFLOW_LOG=debug cargo test` to see node transitions). Output is
/// only shown for failing tests unless run with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env = std::env::var(LOG_ENV).ok();
        let filter = EnvFilter::try_new(filter_directives(None, env.as_deref()))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("timed out after {TEST_TIMEOUT:?}"))
}
