// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in plan: {0}")]
    PlanCycle(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("Version conflict on {kind} {id}: expected {expected}, found {found}")]
    VersionConflict {
        kind: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Concurrent modification of {kind} {id} still conflicting after {attempts} attempts")]
    UpdateExhausted {
        kind: &'static str,
        id: String,
        attempts: u32,
    },

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("No step registered for type: {0}")]
    UnknownStepType(String),

    #[error("No adviser registered for type: {0}")]
    UnknownAdviserType(String),

    #[error("Invalid interrupt: {0}")]
    InvalidInterrupt(String),

    #[error("Task submission failed: {0}")]
    TaskSubmission(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether retrying the failed node could reasonably succeed.
    ///
    /// Infrastructure hiccups are retryable; contract violations and missing
    /// registrations are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::VersionConflict { .. }
                | EngineError::UpdateExhausted { .. }
                | EngineError::TaskSubmission(_)
                | EngineError::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
