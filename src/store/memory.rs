// src/store/memory.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Entity, Table};
use crate::errors::{EngineError, Result};

/// In-memory [`Table`] implementation.
///
/// Cloning shares the underlying map, so a clone can be handed to several
/// services (or test assertions) and they all see the same records.
pub struct InMemoryTable<T: Entity> {
    records: Arc<Mutex<HashMap<String, T>>>,
}

impl<T: Entity> InMemoryTable<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl<T: Entity> Default for InMemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Clone for InMemoryTable<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<T: Entity> fmt::Debug for InMemoryTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTable")
            .field("kind", &T::KIND)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Entity> Table<T> for InMemoryTable<T> {
    fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn insert(&self, mut entity: T) -> Result<T> {
        let mut records = self.records.lock();
        if records.contains_key(entity.id()) {
            return Err(EngineError::AlreadyExists {
                kind: T::KIND,
                id: entity.id().to_string(),
            });
        }
        entity.set_version(1);
        records.insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    fn replace(&self, mut entity: T) -> Result<T> {
        let mut records = self.records.lock();
        let stored = records
            .get(entity.id())
            .ok_or_else(|| EngineError::not_found(T::KIND, entity.id()))?;

        if stored.version() != entity.version() {
            return Err(EngineError::VersionConflict {
                kind: T::KIND,
                id: entity.id().to_string(),
                expected: entity.version(),
                found: stored.version(),
            });
        }

        entity.set_version(stored.version() + 1);
        records.insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    fn remove(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.lock().remove(id))
    }

    fn find(&self, filter: &dyn Fn(&T) -> bool) -> Result<Vec<T>> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|entity| filter(entity))
            .cloned()
            .collect())
    }
}
