//! Shared in-memory RemoteStore.
//!
//! Clones share one table, so several engines built on clones behave like
//! several processes against one database. Failure injection makes every
//! call return `StoreError::Unavailable` until cleared.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use balsync_core::{Entity, EntityId, RemoteStore, StoreError};
use parking_lot::Mutex;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct Row {
    pub name: String,
    pub balance: Decimal,
}

#[derive(Debug, Default)]
struct Inner {
    rows: Mutex<HashMap<EntityId, Row>>,
    failing: AtomicBool,
    overwrites: AtomicUsize,
    deltas: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn balance(&self, id: EntityId) -> Option<Decimal> {
        self.inner.rows.lock().get(&id).map(|r| r.balance)
    }

    pub fn row(&self, id: EntityId) -> Option<Row> {
        self.inner.rows.lock().get(&id).cloned()
    }

    /// Out-of-band write, as an external tool would do it.
    pub fn external_set(&self, id: EntityId, balance: Decimal) {
        let mut rows = self.inner.rows.lock();
        rows.entry(id)
            .and_modify(|r| r.balance = balance)
            .or_insert_with(|| Row {
                name: String::new(),
                balance,
            });
    }

    /// Out-of-band increment on an existing row. Returns `false` if absent.
    pub fn external_add(&self, id: EntityId, delta: Decimal) -> bool {
        match self.inner.rows.lock().get_mut(&id) {
            Some(r) => {
                r.balance += delta;
                true
            }
            None => false,
        }
    }

    /// Number of `write_absolute` calls that succeeded.
    pub fn overwrite_count(&self) -> usize {
        self.inner.overwrites.load(Ordering::SeqCst)
    }

    /// Number of `apply_delta` calls that succeeded.
    pub fn delta_count(&self) -> usize {
        self.inner.deltas.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read(&self, id: EntityId) -> Result<Option<Decimal>, StoreError> {
        self.check()?;
        Ok(self.balance(id))
    }

    async fn read_batch(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Decimal>, StoreError> {
        self.check()?;
        let rows = self.inner.rows.lock();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|r| (*id, r.balance)))
            .collect())
    }

    async fn write_absolute(&self, entity: &Entity, balance: Decimal) -> Result<(), StoreError> {
        self.check()?;
        self.inner.rows.lock().insert(
            entity.id,
            Row {
                name: entity.name.clone(),
                balance: balance.round_dp(2),
            },
        );
        self.inner.overwrites.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_delta(
        &self,
        entity: &Entity,
        delta: Decimal,
        starting_balance: Decimal,
    ) -> Result<Decimal, StoreError> {
        self.check()?;
        let mut rows = self.inner.rows.lock();
        let row = rows
            .entry(entity.id)
            .and_modify(|r| {
                r.balance += delta;
                r.name = entity.name.clone();
            })
            .or_insert_with(|| Row {
                name: entity.name.clone(),
                balance: starting_balance + delta,
            });
        row.balance = row.balance.round_dp(2);
        let after = row.balance;
        drop(rows);
        self.inner.deltas.fetch_add(1, Ordering::SeqCst);
        Ok(after)
    }
}
