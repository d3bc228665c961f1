//! balsync-core
//!
//! Balance reconciliation between a process-local ledger and a shared remote
//! store, for many processes writing the same entities concurrently.
//!
//! Invariants:
//! - Remote writes are deltas wherever a snapshot exists; overwrite only on
//!   first contact.
//! - A failed store call never mutates the SnapshotTracker or the LocalLedger.
//! - All LocalLedger mutations run on a single owner context.
//! - Reconciliation steps are mutually exclusive per entity, parallel across
//!   entities.
//! - Differences within 0.001 are noise and never applied.
//!
//! No database code here; see `balsync-db` for the Postgres RemoteStore.

mod balance;
mod error;
mod ledger;
mod memory;
mod notify;
mod snapshot;
mod store;
mod types;

pub mod engine;
pub mod scheduler;

pub use balance::{
    is_divergent, is_negligible, to_store_precision, DIVERGENCE_THRESHOLD, STORE_SCALE,
};
pub use engine::ReconciliationEngine;
pub use error::{LedgerError, StoreError, SyncError};
pub use ledger::{apply_signed, LocalLedger, OwnerContext};
pub use memory::MemoryLedger;
pub use notify::{BalanceEvent, EventKind, Notifier, TracingNotifier};
pub use scheduler::{schedule_attach, spawn_sync_tasks, Scheduler};
pub use snapshot::{SnapshotEntry, SnapshotTracker, StepGuard};
pub use store::RemoteStore;
pub use types::*;
