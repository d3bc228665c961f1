//! RemoteStore boundary.
//!
//! The store is shared by every process and treated as the source of truth.
//! Every mutating call must be a single atomic store-side operation; the
//! engine never trusts a client-side read-modify-write for the final value.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{Entity, EntityId, StoreError};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Balance of one entity, `None` when the store has no record.
    async fn read(&self, id: EntityId) -> Result<Option<Decimal>, StoreError>;

    /// Balances of many entities in one round trip. Ids without a record are
    /// absent from the map; that is never an error.
    async fn read_batch(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Decimal>, StoreError>;

    /// Upsert, last writer wins.
    async fn write_absolute(&self, entity: &Entity, balance: Decimal) -> Result<(), StoreError>;

    /// Atomically add `delta` to the record, or insert `starting_balance + delta`
    /// when no record exists. Returns the balance after the write.
    async fn apply_delta(
        &self,
        entity: &Entity,
        delta: Decimal,
        starting_balance: Decimal,
    ) -> Result<Decimal, StoreError>;
}
