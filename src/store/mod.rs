// src/store/mod.rs

//! Persistence collaborator.
//!
//! The engine only needs a key-value-with-query contract with optimistic
//! versioning, so that is all this module defines:
//!
//! - [`Entity`] is implemented by every persisted record.
//! - [`Table`] is the per-entity access contract (get / insert / compare-and-swap
//!   replace / remove / filtered scan).
//! - [`memory::InMemoryTable`] is the implementation used by the binary and the
//!   tests.
//! - [`StateStore`] bundles one table per entity kind.
//! - [`modify`] is the reload-and-reapply loop every mutating service goes
//!   through.

use std::fmt::Debug;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::execution::{NodeExecution, PlanExecution};
use crate::interrupts::Interrupt;
use crate::waiter::{NotifyEvent, NotifyResponse, WaitInstance};

pub mod memory;

pub use memory::InMemoryTable;

/// A persisted record with a string id and an optimistic-concurrency version.
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    /// Human-facing kind used in errors and logs.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

/// Access contract for one entity kind.
///
/// Versions start at 1 on insert and strictly increase on every successful
/// [`Table::replace`]. A replace whose entity carries a stale version fails
/// with [`EngineError::VersionConflict`] and leaves the stored record alone.
pub trait Table<T: Entity>: Send + Sync + Debug {
    fn get(&self, id: &str) -> Result<Option<T>>;

    /// Insert a new record; fails with `AlreadyExists` if the id is taken.
    fn insert(&self, entity: T) -> Result<T>;

    /// Compare-and-swap: store `entity` only if the stored version equals
    /// `entity.version()`. Returns the stored copy with its bumped version.
    fn replace(&self, entity: T) -> Result<T>;

    /// Remove and return the record. Only one caller can ever observe `Some`
    /// for a given record, which makes this usable as an atomic claim.
    fn remove(&self, id: &str) -> Result<Option<T>>;

    /// All records matching `filter`.
    fn find(&self, filter: &dyn Fn(&T) -> bool) -> Result<Vec<T>>;
}

/// Load `id`, apply `apply` to a copy and write it back with compare-and-swap,
/// reloading and reapplying on version conflicts up to `max_attempts` times.
///
/// `apply` returns `Ok(false)` to abandon the update (e.g. the record is no
/// longer in a state the caller may change); `modify` then returns `Ok(None)`.
pub fn modify<T, F>(
    table: &dyn Table<T>,
    id: &str,
    max_attempts: u32,
    mut apply: F,
) -> Result<Option<T>>
where
    T: Entity,
    F: FnMut(&mut T) -> Result<bool>,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let mut entity = table
            .get(id)?
            .ok_or_else(|| EngineError::not_found(T::KIND, id))?;

        if !apply(&mut entity)? {
            return Ok(None);
        }

        match table.replace(entity) {
            Ok(stored) => return Ok(Some(stored)),
            Err(EngineError::VersionConflict {
                expected, found, ..
            }) => {
                debug!(
                    kind = T::KIND,
                    id,
                    attempt,
                    expected,
                    found,
                    "version conflict; reloading and reapplying update"
                );
            }
            Err(other) => return Err(other),
        }
    }

    Err(EngineError::UpdateExhausted {
        kind: T::KIND,
        id: id.to_string(),
        attempts: max_attempts,
    })
}

/// One table per persisted entity kind.
///
/// This is the only shared mutable resource in the engine; orchestrator,
/// interrupt service and wait/notify consumers coordinate exclusively through
/// it.
#[derive(Debug, Clone)]
pub struct StateStore {
    pub plans: Arc<dyn Table<PlanExecution>>,
    pub nodes: Arc<dyn Table<NodeExecution>>,
    pub interrupts: Arc<dyn Table<Interrupt>>,
    pub waits: Arc<dyn Table<WaitInstance>>,
    pub responses: Arc<dyn Table<NotifyResponse>>,
    pub notify_queue: Arc<dyn Table<NotifyEvent>>,
}

impl StateStore {
    /// A store backed entirely by [`InMemoryTable`]s.
    pub fn in_memory() -> Self {
        Self {
            plans: Arc::new(InMemoryTable::<PlanExecution>::new()),
            nodes: Arc::new(InMemoryTable::<NodeExecution>::new()),
            interrupts: Arc::new(InMemoryTable::<Interrupt>::new()),
            waits: Arc::new(InMemoryTable::<WaitInstance>::new()),
            responses: Arc::new(InMemoryTable::<NotifyResponse>::new()),
            notify_queue: Arc::new(InMemoryTable::<NotifyEvent>::new()),
        }
    }
}
