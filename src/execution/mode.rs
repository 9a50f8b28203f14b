// src/execution/mode.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dispatch tag selecting the execute strategy that drives a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Sync,
    Async,
    Task,
    TaskChain,
    Child,
    Children,
    ChildChain,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 7] = [
        ExecutionMode::Sync,
        ExecutionMode::Async,
        ExecutionMode::Task,
        ExecutionMode::TaskChain,
        ExecutionMode::Child,
        ExecutionMode::Children,
        ExecutionMode::ChildChain,
    ];

    /// Modes whose nodes spawn child nodes instead of doing step work.
    pub fn is_parent(self) -> bool {
        matches!(
            self,
            ExecutionMode::Child | ExecutionMode::Children | ExecutionMode::ChildChain
        )
    }

    pub fn is_leaf(self) -> bool {
        !self.is_parent()
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Sync => "SYNC",
            ExecutionMode::Async => "ASYNC",
            ExecutionMode::Task => "TASK",
            ExecutionMode::TaskChain => "TASK_CHAIN",
            ExecutionMode::Child => "CHILD",
            ExecutionMode::Children => "CHILDREN",
            ExecutionMode::ChildChain => "CHILD_CHAIN",
        };
        f.write_str(s)
    }
}
