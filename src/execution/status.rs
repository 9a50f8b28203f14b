// src/execution/status.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by node and plan executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Queued,
    Running,
    AsyncWaiting,
    TaskWaiting,
    /// Suspended after a failure until a node-level interrupt decides.
    InterventionWaiting,
    Paused,
    Succeeded,
    Failed,
    /// Failed, but an adviser chose to ignore it.
    IgnoreFailed,
    Aborted,
    Expired,
    Discarded,
}

const NON_TERMINAL: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::AsyncWaiting,
    Status::TaskWaiting,
    Status::InterventionWaiting,
    Status::Paused,
];

impl Status {
    pub const TERMINAL: &'static [Status] = &[
        Status::Succeeded,
        Status::Failed,
        Status::IgnoreFailed,
        Status::Aborted,
        Status::Expired,
        Status::Discarded,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Statuses from which a wait/notify delivery may resume the node.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            Status::Running | Status::AsyncWaiting | Status::TaskWaiting
        )
    }

    /// Terminal statuses that let the graph advance along `next`.
    pub fn is_positive(self) -> bool {
        matches!(self, Status::Succeeded | Status::IgnoreFailed)
    }

    /// Statuses a node execution may be in for a transition to `target` to be
    /// legal. Terminal statuses never appear in any set, which is what makes
    /// terminal node executions immutable.
    pub fn node_allowed_start_set(target: Status) -> &'static [Status] {
        match target {
            Status::Queued => &[Status::Paused],
            Status::Running => &[
                Status::Queued,
                Status::AsyncWaiting,
                Status::TaskWaiting,
                Status::Paused,
            ],
            Status::AsyncWaiting | Status::TaskWaiting => &[Status::Running],
            Status::InterventionWaiting => &[
                Status::Queued,
                Status::Running,
                Status::AsyncWaiting,
                Status::TaskWaiting,
            ],
            Status::Paused => &[
                Status::Queued,
                Status::Running,
                Status::AsyncWaiting,
                Status::TaskWaiting,
            ],
            Status::Succeeded
            | Status::Failed
            | Status::IgnoreFailed
            | Status::Aborted
            | Status::Expired
            | Status::Discarded => NON_TERMINAL,
        }
    }

    /// Same idea as [`Status::node_allowed_start_set`] for plan executions.
    pub fn plan_allowed_start_set(target: Status) -> &'static [Status] {
        match target {
            Status::Running => &[Status::Paused, Status::InterventionWaiting],
            Status::Paused => &[Status::Running],
            Status::InterventionWaiting => &[Status::Running],
            Status::Succeeded
            | Status::Failed
            | Status::IgnoreFailed
            | Status::Aborted
            | Status::Expired
            | Status::Discarded => NON_TERMINAL,
            Status::Queued | Status::AsyncWaiting | Status::TaskWaiting => &[],
        }
    }

    /// Status a plan takes when its final node ends with `self`.
    pub fn as_plan_status(self) -> Status {
        match self {
            Status::IgnoreFailed => Status::Succeeded,
            other => other,
        }
    }

    /// Fold child statuses into a parent status.
    ///
    /// ABORTED beats EXPIRED beats FAILED beats everything else; the result
    /// does not depend on the order children finished in. No children means
    /// SUCCEEDED.
    pub fn aggregate<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        statuses
            .into_iter()
            .map(|s| match s {
                Status::Aborted => (3, Status::Aborted),
                Status::Expired => (2, Status::Expired),
                Status::Failed => (1, Status::Failed),
                _ => (0, Status::Succeeded),
            })
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, status)| status)
            .unwrap_or(Status::Succeeded)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::AsyncWaiting => "ASYNC_WAITING",
            Status::TaskWaiting => "TASK_WAITING",
            Status::InterventionWaiting => "INTERVENTION_WAITING",
            Status::Paused => "PAUSED",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::IgnoreFailed => "IGNORE_FAILED",
            Status::Aborted => "ABORTED",
            Status::Expired => "EXPIRED",
            Status::Discarded => "DISCARDED",
        };
        f.write_str(s)
    }
}
