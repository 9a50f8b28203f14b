// src/execution/plan_execution.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::Status;
use crate::errors::{EngineError, Result};
use crate::plan::Plan;
use crate::store::Entity;

/// Root execution record of one plan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    pub id: String,
    pub plan: Plan,
    pub setup_abstractions: BTreeMap<String, String>,
    pub status: Status,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    /// After this instant the record may be purged.
    pub valid_until: DateTime<Utc>,
    pub version: u64,
}

impl PlanExecution {
    pub fn new(
        plan: Plan,
        setup_abstractions: BTreeMap<String, String>,
        ttl_days: u32,
    ) -> Result<Self> {
        let start_ts = Utc::now();
        let valid_until = start_ts
            .checked_add_signed(Duration::days(i64::from(ttl_days)))
            .ok_or_else(|| {
                EngineError::ConfigError(format!("plan_ttl_days of {ttl_days} is out of range"))
            })?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            plan,
            setup_abstractions,
            status: Status::Running,
            start_ts,
            end_ts: None,
            valid_until,
            version: 0,
        })
    }
}

impl Entity for PlanExecution {
    const KIND: &'static str = "PlanExecution";

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
