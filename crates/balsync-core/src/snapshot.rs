//! Per-entity memory of the last confirmed local and remote values.
//!
//! In-memory only. A fresh process rebuilds entries from the RemoteStore on
//! first contact with each entity. Entries are written only by a
//! reconciliation step that holds the entity's step lock (see
//! [`SnapshotTracker::lock_entity`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as StepMutex, OwnedMutexGuard};

use crate::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub last_known_local: Decimal,
    pub last_known_remote: Decimal,
    /// Bumped on every write; never reused within a process.
    pub version: u64,
}

/// Guard proving the holder is the only reconciliation step running for one entity.
pub type StepGuard = OwnedMutexGuard<()>;

#[derive(Debug)]
pub struct SnapshotTracker {
    entries: Mutex<HashMap<EntityId, SnapshotEntry>>,
    step_locks: Mutex<HashMap<EntityId, Arc<StepMutex<()>>>>,
    next_version: AtomicU64,
}

impl Default for SnapshotTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            step_locks: Mutex::new(HashMap::new()),
            // 0 is reserved for "no entry" in `version_of`.
            next_version: AtomicU64::new(1),
        }
    }

    /// Acquire the step lock for one entity. Different entities never contend.
    pub async fn lock_entity(&self, id: EntityId) -> StepGuard {
        let lock = {
            let mut locks = self.step_locks.lock();
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop `guard` and forget the entity's step lock when it has no entry
    /// and no other step holds or waits on the lock.
    pub fn release(&self, id: EntityId, guard: StepGuard) {
        drop(guard);
        if self.entries.lock().contains_key(&id) {
            return;
        }
        let mut locks = self.step_locks.lock();
        if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&id);
        }
    }

    /// Entities that currently have a step lock allocated.
    pub fn lock_count(&self) -> usize {
        self.step_locks.lock().len()
    }

    pub fn get(&self, id: EntityId) -> Option<SnapshotEntry> {
        self.entries.lock().get(&id).copied()
    }

    /// Record the engine's confirmed view of both sides.
    pub fn set(&self, id: EntityId, local: Decimal, remote: Decimal) -> SnapshotEntry {
        let entry = SnapshotEntry {
            last_known_local: local,
            last_known_remote: remote,
            version: self.next_version.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.lock().insert(id, entry);
        entry
    }

    pub fn remove(&self, id: EntityId) -> Option<SnapshotEntry> {
        self.entries.lock().remove(&id)
    }

    /// Current version, 0 when there is no entry.
    pub fn version_of(&self, id: EntityId) -> u64 {
        self.get(id).map(|e| e.version).unwrap_or(0)
    }

    /// Versions for many ids in one critical section.
    pub fn versions(&self, ids: &[EntityId]) -> HashMap<EntityId, u64> {
        let entries = self.entries.lock();
        ids.iter()
            .map(|id| (*id, entries.get(id).map(|e| e.version).unwrap_or(0)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop everything. Called at process shutdown.
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.step_locks.lock().clear();
    }
}
