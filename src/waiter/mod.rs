// src/waiter/mod.rs

//! Wait/Notify engine.
//!
//! Correlation-id based completion: a caller registers a [`WaitInstance`] on
//! one or more correlation ids, producers call `done_with` for each id, and
//! once every id has a [`NotifyResponse`] the registered callback fires
//! exactly once with all of them.
//!
//! - [`engine`] holds the records-and-delivery logic ([`WaitNotifyEngine`]).
//! - [`consumer`] runs the background worker pool and the zombie sweep.
//!
//! Ready waits are handed to consumers through a durable queue table
//! ([`NotifyEvent`]); a `tokio::sync::Notify` wakes idle consumers and an
//! interval poll picks up anything the wake signal missed (e.g. after a
//! restart).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::execution::ResponseData;
use crate::store::Entity;
use crate::types::BoxFuture;

pub mod consumer;
pub mod engine;

pub use consumer::{ConsumerHandle, spawn_consumers};
pub use engine::WaitNotifyEngine;

/// A pending wait on a set of correlation ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitInstance {
    pub id: String,
    /// Key of the [`NotifyCallback`] that receives the delivery.
    pub publisher: String,
    pub correlation_ids: Vec<String>,
    /// Serialized callback payload, handed back verbatim on delivery.
    pub callback: Value,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// The recorded result for one correlation id. `id` is the correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub id: String,
    pub data: ResponseData,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// Durable queue entry: "this wait instance has all of its responses".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub id: String,
    pub wait_instance_id: String,
    /// Number of times a consumer has claimed this entry.
    pub attempts: u32,
    /// Claimed by a consumer until this instant.
    pub leased_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl NotifyEvent {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.leased_until.is_none_or(|until| until <= now)
    }
}

/// Receiver of deliveries for one publisher.
///
/// `callback` is the payload given to `wait_for_all_on`; `responses` maps each
/// correlation id of the wait to its response data.
pub trait NotifyCallback: Send + Sync {
    fn notify(
        &self,
        callback: Value,
        responses: BTreeMap<String, ResponseData>,
    ) -> BoxFuture<'_, Result<()>>;
}

macro_rules! impl_entity {
    ($ty:ty, $kind:literal) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;

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
    };
}

impl_entity!(WaitInstance, "WaitInstance");
impl_entity!(NotifyResponse, "NotifyResponse");
impl_entity!(NotifyEvent, "NotifyEvent");
