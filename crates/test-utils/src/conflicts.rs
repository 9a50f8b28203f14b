use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nodeflow::errors::{EngineError, Result};
use nodeflow::store::{Entity, Table};

/// Table wrapper whose next `n` replaces fail with a version conflict, as if
/// another writer got there first each time.
#[derive(Debug)]
pub struct ConflictingTable<T: Entity> {
    inner: Arc<dyn Table<T>>,
    remaining: AtomicUsize,
    conflicts: AtomicUsize,
}

impl<T: Entity> ConflictingTable<T> {
    pub fn new(inner: Arc<dyn Table<T>>) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(0),
            conflicts: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` replaces conflict.
    pub fn conflict_next(&self, n: usize) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    /// Conflicts reported so far.
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }
}

impl<T: Entity> Table<T> for ConflictingTable<T> {
    fn get(&self, id: &str) -> Result<Option<T>> {
        self.inner.get(id)
    }

    fn insert(&self, entity: T) -> Result<T> {
        self.inner.insert(entity)
    }

    fn replace(&self, entity: T) -> Result<T> {
        let armed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(EngineError::VersionConflict {
                kind: T::KIND,
                id: entity.id().to_string(),
                expected: entity.version(),
                found: entity.version() + 1,
            });
        }
        self.inner.replace(entity)
    }

    fn remove(&self, id: &str) -> Result<Option<T>> {
        self.inner.remove(id)
    }

    fn find(&self, filter: &dyn Fn(&T) -> bool) -> Result<Vec<T>> {
        self.inner.find(filter)
    }
}
