// src/waiter/engine.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{NotifyCallback, NotifyEvent, NotifyResponse, WaitInstance};
use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::execution::ResponseData;
use crate::store::{StateStore, modify};

/// What happened to one claimed queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    /// Wait instance already claimed by another consumer.
    AlreadyDelivered,
    NotReady,
}

pub struct WaitNotifyEngine {
    store: StateStore,
    callbacks: RwLock<HashMap<String, Arc<dyn NotifyCallback>>>,
    wake: Arc<Notify>,
    config: EngineConfig,
}

impl fmt::Debug for WaitNotifyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let publishers: Vec<String> = self.callbacks.read().keys().cloned().collect();
        f.debug_struct("WaitNotifyEngine")
            .field("publishers", &publishers)
            .finish_non_exhaustive()
    }
}

impl WaitNotifyEngine {
    pub fn new(store: StateStore, config: EngineConfig) -> Self {
        Self {
            store,
            callbacks: RwLock::new(HashMap::new()),
            wake: Arc::new(Notify::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Signal consumers wait on between polls.
    pub fn wake_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Route deliveries for waits registered under `publisher` to `callback`.
    pub fn register_publisher(
        &self,
        publisher: impl Into<String>,
        callback: Arc<dyn NotifyCallback>,
    ) {
        let publisher = publisher.into();
        debug!(%publisher, "registering notify publisher");
        self.callbacks.write().insert(publisher, callback);
    }

    /// Register a wait on all of `correlation_ids`.
    ///
    /// Responses recorded before this call count: if every id already has a
    /// response the wait is queued for delivery right away.
    pub fn wait_for_all_on<C: Serialize>(
        &self,
        publisher: &str,
        callback: &C,
        correlation_ids: &[String],
    ) -> Result<String> {
        if correlation_ids.is_empty() {
            return Err(EngineError::ContractViolation(format!(
                "wait_for_all_on called by '{publisher}' with no correlation ids"
            )));
        }

        let mut seen = HashSet::new();
        let correlation_ids: Vec<String> = correlation_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let wait = WaitInstance {
            id: Uuid::new_v4().to_string(),
            publisher: publisher.to_string(),
            correlation_ids,
            callback: serde_json::to_value(callback)?,
            created_at: Utc::now(),
            version: 0,
        };
        let wait = self.store.waits.insert(wait)?;

        debug!(
            wait_instance_id = %wait.id,
            publisher,
            correlation_ids = ?wait.correlation_ids,
            "wait instance registered"
        );

        // A done_with that ran before the insert did not see this wait.
        if self.all_responses_present(&wait)? {
            debug!(
                wait_instance_id = %wait.id,
                "all responses already present; queueing delivery"
            );
            self.enqueue(&wait.id)?;
        }

        Ok(wait.id)
    }

    /// Record the response for `correlation_id` and queue every wait that is
    /// now complete.
    ///
    /// The first response for an id wins; later ones are logged and ignored.
    pub fn done_with(&self, correlation_id: &str, data: ResponseData) -> Result<String> {
        let response = NotifyResponse {
            id: correlation_id.to_string(),
            data,
            created_at: Utc::now(),
            version: 0,
        };

        match self.store.responses.insert(response) {
            Ok(_) => {}
            Err(EngineError::AlreadyExists { .. }) => {
                warn!(
                    correlation_id,
                    "response already recorded for correlation id; ignoring duplicate"
                );
                return Ok(correlation_id.to_string());
            }
            Err(other) => return Err(other),
        }

        debug!(correlation_id, "notify response recorded");

        let waits = self
            .store
            .waits
            .find(&|w: &WaitInstance| w.correlation_ids.iter().any(|c| c == correlation_id))?;

        for wait in waits {
            if self.all_responses_present(&wait)? {
                self.enqueue(&wait.id)?;
            }
        }

        Ok(correlation_id.to_string())
    }

    /// Claim and deliver every claimable queue entry once. Returns the number
    /// of callbacks fired.
    pub async fn process_pending(&self) -> Result<usize> {
        let now = Utc::now();
        let candidates = self
            .store
            .notify_queue
            .find(&|e: &NotifyEvent| e.is_claimable(now))?;

        let mut delivered = 0;
        for candidate in candidates {
            let Some(event) = self.claim(&candidate.id)? else {
                continue;
            };

            match self.deliver(&event).await {
                Ok(outcome) => {
                    if outcome == Delivery::Delivered {
                        delivered += 1;
                    }
                    self.ack(&event.id)?;
                }
                Err(err) if event.attempts >= self.config.max_delivery_attempts => {
                    error!(
                        notify_event_id = %event.id,
                        wait_instance_id = %event.wait_instance_id,
                        attempts = event.attempts,
                        error = %err,
                        "notify delivery failed too many times; dropping queue entry"
                    );
                    self.ack(&event.id)?;
                }
                Err(err) => {
                    warn!(
                        notify_event_id = %event.id,
                        wait_instance_id = %event.wait_instance_id,
                        attempts = event.attempts,
                        error = %err,
                        "notify delivery failed; will retry"
                    );
                    self.release(&event.id)?;
                }
            }
        }

        Ok(delivered)
    }

    /// Delete responses older than the retention window that no wait instance
    /// references. Returns the number removed.
    pub fn sweep_zombie_responses(&self, now: DateTime<Utc>) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.response_retention())
            .map_err(|e| EngineError::ConfigError(format!("response retention: {e}")))?;
        let cutoff = now.checked_sub_signed(retention).ok_or_else(|| {
            EngineError::ConfigError("response retention is out of range".to_string())
        })?;

        let referenced: HashSet<String> = self
            .store
            .waits
            .find(&|_: &WaitInstance| true)?
            .into_iter()
            .flat_map(|w| w.correlation_ids)
            .collect();

        let zombies = self.store.responses.find(&|r: &NotifyResponse| {
            r.created_at <= cutoff && !referenced.contains(&r.id)
        })?;

        let mut removed = 0;
        for zombie in zombies {
            if self.store.responses.remove(&zombie.id)?.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "swept zombie notify responses");
        }
        Ok(removed)
    }

    /// Re-queue complete wait instances that have no queue entry, e.g. after
    /// a crash between recording the last response and enqueueing.
    pub fn recover(&self) -> Result<usize> {
        let queued: HashSet<String> = self
            .store
            .notify_queue
            .find(&|_: &NotifyEvent| true)?
            .into_iter()
            .map(|e| e.wait_instance_id)
            .collect();

        let mut requeued = 0;
        for wait in self.store.waits.find(&|_: &WaitInstance| true)? {
            if !queued.contains(&wait.id) && self.all_responses_present(&wait)? {
                self.enqueue(&wait.id)?;
                requeued += 1;
            }
        }

        if requeued > 0 {
            info!(requeued, "re-queued complete wait instances");
        }
        Ok(requeued)
    }

    pub fn wait_instance(&self, id: &str) -> Result<Option<WaitInstance>> {
        self.store.waits.get(id)
    }

    pub fn pending_events(&self) -> Result<usize> {
        Ok(self.store.notify_queue.find(&|_: &NotifyEvent| true)?.len())
    }

    fn all_responses_present(&self, wait: &WaitInstance) -> Result<bool> {
        for id in &wait.correlation_ids {
            if self.store.responses.get(id)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn enqueue(&self, wait_instance_id: &str) -> Result<()> {
        let event = NotifyEvent {
            id: Uuid::new_v4().to_string(),
            wait_instance_id: wait_instance_id.to_string(),
            attempts: 0,
            leased_until: None,
            created_at: Utc::now(),
            version: 0,
        };
        self.store.notify_queue.insert(event)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Lease a queue entry. `None` if another consumer got it first or it has
    /// already been acknowledged.
    fn claim(&self, event_id: &str) -> Result<Option<NotifyEvent>> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.config.lease())
            .map_err(|e| EngineError::ConfigError(format!("lease: {e}")))?;
        let leased_until = now
            .checked_add_signed(lease)
            .ok_or_else(|| EngineError::ConfigError("lease is out of range".to_string()))?;

        let claimed = modify(self.store.notify_queue.as_ref(), event_id, 1, |event| {
            if !event.is_claimable(now) {
                return Ok(false);
            }
            event.leased_until = Some(leased_until);
            event.attempts += 1;
            Ok(true)
        });

        match claimed {
            Ok(event) => Ok(event),
            Err(EngineError::UpdateExhausted { .. }) | Err(EngineError::NotFound { .. }) => {
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    fn ack(&self, event_id: &str) -> Result<()> {
        self.store.notify_queue.remove(event_id)?;
        Ok(())
    }

    fn release(&self, event_id: &str) -> Result<()> {
        let released = modify(
            self.store.notify_queue.as_ref(),
            event_id,
            self.config.max_update_attempts,
            |event| {
                event.leased_until = None;
                Ok(true)
            },
        );
        match released {
            Ok(_) | Err(EngineError::NotFound { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    async fn deliver(&self, event: &NotifyEvent) -> Result<Delivery> {
        let Some(wait) = self.store.waits.get(&event.wait_instance_id)? else {
            return Ok(Delivery::AlreadyDelivered);
        };

        if !self.all_responses_present(&wait)? {
            debug!(
                wait_instance_id = %wait.id,
                "queued wait instance is not complete yet; skipping"
            );
            return Ok(Delivery::NotReady);
        }

        let handler = self
            .callbacks
            .read()
            .get(&wait.publisher)
            .cloned()
            .ok_or_else(|| {
                EngineError::ContractViolation(format!(
                    "no notify callback registered for publisher '{}'",
                    wait.publisher
                ))
            })?;

        // Removing the wait instance is the atomic claim: exactly one
        // consumer observes `Some`.
        let Some(wait) = self.store.waits.remove(&wait.id)? else {
            return Ok(Delivery::AlreadyDelivered);
        };

        let mut responses = BTreeMap::new();
        for id in &wait.correlation_ids {
            match self.store.responses.get(id)? {
                Some(response) => {
                    responses.insert(id.clone(), response.data);
                }
                None => warn!(
                    wait_instance_id = %wait.id,
                    correlation_id = %id,
                    "response vanished before delivery"
                ),
            }
        }

        debug!(
            wait_instance_id = %wait.id,
            publisher = %wait.publisher,
            responses = responses.len(),
            "delivering notify callback"
        );

        if let Err(err) = handler.notify(wait.callback.clone(), responses).await {
            error!(
                wait_instance_id = %wait.id,
                publisher = %wait.publisher,
                error = %err,
                "notify callback failed"
            );
        }

        Ok(Delivery::Delivered)
    }
}
