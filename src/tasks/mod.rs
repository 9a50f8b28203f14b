// src/tasks/mod.rs

//! Task executor bridge.
//!
//! The engine hands units of remote work to a [`TaskExecutor`] and gets a
//! task id back. The executor later reports the result (success, failure,
//! timeout or abort alike) by calling `done_with(task_id, ...)` on the
//! wait/notify engine, so every outcome resumes the node through the same
//! path.
//!
//! - [`shell`] provides [`ShellTaskExecutor`], which runs `sh -c` scripts
//!   locally and is what the `nodeflow` binary uses.
//! - Tests use the fake executor from the test-utils crate.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::types::BoxFuture;

pub mod shell;

pub use shell::ShellTaskExecutor;

/// A unit of work for the task executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_type: String,
    pub parameters: Value,
    /// `None` means the engine's default task timeout.
    pub timeout: Option<Duration>,
}

impl TaskDescriptor {
    pub fn new(task_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            task_type: task_type.into(),
            parameters,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Queues work to an executor and signals aborts. Fire-and-forget: results
/// arrive through the wait/notify engine keyed by the returned task id.
pub trait TaskExecutor: Send + Sync {
    fn queue_task(
        &self,
        setup_abstractions: BTreeMap<String, String>,
        task: TaskDescriptor,
    ) -> BoxFuture<'_, Result<String>>;

    /// Best-effort abort. `Ok(true)` if the executor accepted the signal.
    fn abort_task(
        &self,
        setup_abstractions: BTreeMap<String, String>,
        task_id: String,
    ) -> BoxFuture<'_, Result<bool>>;
}
