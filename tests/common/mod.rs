#![allow(dead_code, unused_imports)]

pub use nodeflow_test_utils::builders;
pub use nodeflow_test_utils::conflicts;
pub use nodeflow_test_utils::fake_executor;
pub use nodeflow_test_utils::harness::{self, TestHarness, test_config};
pub use nodeflow_test_utils::recording;
pub use nodeflow_test_utils::steps;
pub use nodeflow_test_utils::{init_tracing, with_timeout};
