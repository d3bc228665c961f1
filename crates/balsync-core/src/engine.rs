//! Balance reconciliation between one process's LocalLedger and the shared
//! RemoteStore.
//!
//! Rules:
//! - Every RemoteStore write is a delta (atomic add) whenever a snapshot
//!   exists for the entity; overwrite is used only on first contact.
//! - A failed RemoteStore call abandons the step before the SnapshotTracker
//!   or the LocalLedger is touched. The next cycle is the retry.
//! - After a failed attach the LocalLedger value is unconfirmed: the next
//!   poll or flush reads the store before anything is written.
//! - LocalLedger reads that feed an adjustment are taken on the owner
//!   context, in the same job as the adjustment.
//! - One step per entity at a time (step lock); entities run in parallel.
//!
//! Convergence is eventual, bounded by max(poll interval, flush interval)
//! when the same entity is attached on several processes at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use balsync_config::SyncSettings;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::balance::{is_divergent, is_negligible, to_store_precision};
use crate::ledger::{apply_signed, LocalLedger, OwnerContext};
use crate::notify::{BalanceEvent, EventKind, Notifier};
use crate::snapshot::{SnapshotEntry, SnapshotTracker};
use crate::store::RemoteStore;
use crate::{
    AttachOutcome, BulkReport, Entity, EntityId, FlushOutcome, LedgerError, PollReport, SyncError,
};

pub struct ReconciliationEngine<L> {
    settings: SyncSettings,
    store: Arc<dyn RemoteStore>,
    ledger: OwnerContext<L>,
    notifier: Arc<dyn Notifier>,
    snapshots: SnapshotTracker,
    attached: Mutex<HashMap<EntityId, Entity>>,
    pending_attach: Mutex<HashSet<EntityId>>,
    /// Entities whose attach failed before the store was read. Their ledger
    /// value is unconfirmed and must never overwrite a store record.
    load_pending: Mutex<HashSet<EntityId>>,
}

impl<L: LocalLedger> ReconciliationEngine<L> {
    pub fn new(
        settings: SyncSettings,
        store: Arc<dyn RemoteStore>,
        ledger: OwnerContext<L>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            store,
            ledger,
            notifier,
            snapshots: SnapshotTracker::new(),
            attached: Mutex::new(HashMap::new()),
            pending_attach: Mutex::new(HashSet::new()),
            load_pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Handle to the LocalLedger owner context, for host-side mutations.
    pub fn ledger(&self) -> &OwnerContext<L> {
        &self.ledger
    }

    pub fn snapshot(&self, id: EntityId) -> Option<SnapshotEntry> {
        self.snapshots.get(id)
    }

    pub fn tracked_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_attached(&self, id: EntityId) -> bool {
        self.attached.lock().contains_key(&id)
    }

    pub fn attached_entities(&self) -> Vec<Entity> {
        let mut v: Vec<Entity> = self.attached.lock().values().cloned().collect();
        v.sort_by_key(|e| e.id);
        v
    }

    /// Entities with a step lock allocated.
    pub fn step_lock_count(&self) -> usize {
        self.snapshots.lock_count()
    }

    /// `true` while an attach that failed to read the store awaits retry.
    pub fn is_load_pending(&self, id: EntityId) -> bool {
        self.load_pending.lock().contains(&id)
    }

    pub fn attached_count(&self) -> usize {
        self.attached.lock().len()
    }

    // ------------------------------------------------------------------
    // Attach
    // ------------------------------------------------------------------

    /// Record that `entity` became locally active and will be attached after
    /// the configured delay. A Detach before then cancels it.
    pub fn mark_pending(&self, entity: &Entity) {
        self.pending_attach.lock().insert(entity.id);
    }

    /// Complete a deferred attach. Returns `Ok(None)` when the entity was
    /// detached while the attach was pending.
    pub async fn attach_pending(&self, entity: &Entity) -> Result<Option<AttachOutcome>, SyncError> {
        let _step = self.snapshots.lock_entity(entity.id).await;
        {
            // Claim and attach in one critical section so a concurrent detach
            // sees either the pending flag or the attached entry.
            let mut pending = self.pending_attach.lock();
            if !pending.remove(&entity.id) {
                debug!(entity = %entity.id, "pending attach cancelled");
                return Ok(None);
            }
            self.attached.lock().insert(entity.id, entity.clone());
        }
        self.attach_locked(entity).await.map(Some)
    }

    /// Load the store value into the LocalLedger and start tracking.
    ///
    /// The entity counts as attached even when the store read fails. Its
    /// ledger is left untouched and it is marked load-pending: the next poll
    /// or flush reads the store before anything is written.
    pub async fn attach(&self, entity: &Entity) -> Result<AttachOutcome, SyncError> {
        let _step = self.snapshots.lock_entity(entity.id).await;
        self.attached.lock().insert(entity.id, entity.clone());
        self.attach_locked(entity).await
    }

    async fn attach_locked(&self, entity: &Entity) -> Result<AttachOutcome, SyncError> {
        let id = entity.id;
        let (remote0, used_starting_balance) = match self.store.read(id).await {
            Ok(Some(b)) => (b, false),
            Ok(None) => (self.settings.starting_balance, true),
            Err(e) => {
                self.load_pending.lock().insert(id);
                error!(entity = %id, name = %entity.name, error = %e, "attach: store read failed; ledger untouched");
                return Err(e.into());
            }
        };

        let reset = self.settings.reset_on_attach;
        let (local_before, local_after) = self.load_locked(entity, remote0, reset).await?;
        info!(
            entity = %id,
            name = %entity.name,
            remote = %remote0,
            local_before = %local_before,
            reset,
            used_starting_balance,
            "balance loaded"
        );

        Ok(AttachOutcome {
            remote: remote0,
            local_before,
            local_after,
            used_starting_balance,
        })
    }

    /// Move the LocalLedger to `remote` (creating the account if needed),
    /// record the snapshot and clear any load-pending mark. Caller holds the
    /// step lock. Returns the ledger value before and after.
    async fn load_locked(
        &self,
        entity: &Entity,
        remote: Decimal,
        reset: bool,
    ) -> Result<(Decimal, Decimal), SyncError> {
        let id = entity.id;
        let account = entity.clone();
        let (before, after) = self
            .ledger
            .run(move |l| -> Result<(Decimal, Decimal), LedgerError> {
                if !l.has_account(id) {
                    l.create_account(&account)?;
                }
                let before = l.balance(id).ok_or(LedgerError::NoAccount(id))?;
                let mut current = before;
                if reset {
                    apply_signed(l, id, -current)?;
                    current = Decimal::ZERO;
                }
                apply_signed(l, id, remote - current)?;
                let after = l.balance(id).ok_or(LedgerError::NoAccount(id))?;
                Ok((before, after))
            })
            .await?
            .map_err(|e| {
                error!(entity = %id, error = %e, "load: ledger adjustment failed");
                e
            })?;

        self.snapshots.set(id, remote, remote);
        self.load_pending.lock().remove(&id);

        self.notifier.notify(
            entity,
            &BalanceEvent {
                kind: EventKind::BalanceLoaded,
                old: before,
                new: remote,
            },
        );
        Ok((before, after))
    }

    // ------------------------------------------------------------------
    // Poll
    // ------------------------------------------------------------------

    /// Pull external store changes into the LocalLedger of attached entities.
    pub async fn poll(&self) -> Result<PollReport, SyncError> {
        let attached = self.attached_entities();
        let mut report = PollReport {
            considered: attached.len(),
            ..PollReport::default()
        };
        if attached.is_empty() {
            return Ok(report);
        }

        let ids: Vec<EntityId> = attached.iter().map(|e| e.id).collect();
        let seen_versions = self.snapshots.versions(&ids);
        let records = match self.store.read_batch(&ids).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, entities = ids.len(), "poll: store read failed; cycle skipped");
                return Err(e.into());
            }
        };

        for entity in attached {
            let id = entity.id;
            let Some(&remote) = records.get(&id) else {
                report.missing += 1;
                continue;
            };

            let _step = self.snapshots.lock_entity(id).await;
            if !self.is_attached(id) {
                continue;
            }
            // A flush or attach landed after our read; that read may be stale.
            if self.snapshots.version_of(id) != seen_versions.get(&id).copied().unwrap_or(0) {
                report.superseded += 1;
                continue;
            }

            if self.load_pending.lock().contains(&id) {
                match self.load_locked(&entity, remote, false).await {
                    Ok((before, _)) => {
                        report.applied += 1;
                        info!(entity = %id, local_before = %before, remote = %remote, "poll: deferred load completed");
                    }
                    Err(SyncError::OwnerContextClosed) => return Err(SyncError::OwnerContextClosed),
                    Err(e) => warn!(entity = %id, error = %e, "poll: deferred load failed"),
                }
                continue;
            }

            let prior = self.snapshots.get(id);
            if let Some(p) = prior {
                if !is_divergent(remote, p.last_known_remote) {
                    continue;
                }
            }

            let applied = self
                .ledger
                .run(move |l| -> Result<Option<(Decimal, Decimal)>, LedgerError> {
                    let Some(current) = l.balance(id) else {
                        return Ok(None);
                    };
                    apply_signed(l, id, remote - current)?;
                    let after = l.balance(id).ok_or(LedgerError::NoAccount(id))?;
                    Ok(Some((current, after)))
                })
                .await?;

            let (current, after) = match applied {
                Ok(Some(v)) => v,
                Ok(None) => {
                    debug!(entity = %id, "poll: attached entity has no ledger account yet");
                    continue;
                }
                Err(e) => {
                    warn!(entity = %id, error = %e, "poll: ledger adjustment failed");
                    continue;
                }
            };

            self.snapshots.set(id, after, remote);

            if is_negligible(after - current) {
                continue;
            }
            report.applied += 1;

            let old = prior.map(|p| p.last_known_remote).unwrap_or(current);
            info!(entity = %id, old = %old, new = %remote, "applied external store change");
            if self.settings.notify_on_external_change {
                self.notifier.notify(
                    &entity,
                    &BalanceEvent {
                        kind: EventKind::ExternalChange,
                        old,
                        new: remote,
                    },
                );
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    /// Push the local change since the last confirmed snapshot to the store.
    pub async fn flush(&self, entity: &Entity) -> Result<FlushOutcome, SyncError> {
        let _step = self.snapshots.lock_entity(entity.id).await;
        self.flush_locked(entity).await
    }

    /// Flush body; caller holds the entity's step lock.
    async fn flush_locked(&self, entity: &Entity) -> Result<FlushOutcome, SyncError> {
        let id = entity.id;
        let Some(local1) = self.ledger.balance(id).await? else {
            debug!(entity = %id, "flush: no ledger account");
            return Ok(FlushOutcome::NoAccount);
        };

        if self.load_pending.lock().contains(&id) {
            // The ledger value was never reconciled; read before writing.
            match self.store.read(id).await {
                Ok(Some(remote)) => {
                    self.load_locked(entity, remote, false).await?;
                    debug!(entity = %id, remote = %remote, "flush: loaded store record instead of overwriting");
                    return Ok(FlushOutcome::Loaded { remote });
                }
                // No record anywhere: the local value is the first contact.
                Ok(None) => {
                    self.snapshots.remove(id);
                }
                Err(e) => {
                    warn!(entity = %id, error = %e, "flush: store read failed; will retry next cycle");
                    return Err(e.into());
                }
            }
        }

        let Some(snap) = self.snapshots.get(id) else {
            // First contact: no reference point for a delta.
            let balance = to_store_precision(local1);
            if let Err(e) = self.store.write_absolute(entity, balance).await {
                warn!(entity = %id, error = %e, "flush: store overwrite failed");
                return Err(e.into());
            }
            self.snapshots.set(id, local1, balance);
            self.load_pending.lock().remove(&id);
            debug!(entity = %id, balance = %balance, "flush: first contact overwrite");
            return Ok(FlushOutcome::Overwritten { balance });
        };

        let delta = local1 - snap.last_known_local;
        if is_negligible(delta) {
            return Ok(FlushOutcome::Unchanged);
        }
        let delta = to_store_precision(delta);
        if delta.is_zero() {
            // Sub-cent drift the store cannot represent.
            return Ok(FlushOutcome::Unchanged);
        }

        let remote = match self
            .store
            .apply_delta(entity, delta, self.settings.starting_balance)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(entity = %id, delta = %delta, error = %e, "flush: store delta failed; will retry next cycle");
                return Err(e.into());
            }
        };

        // The store balance includes any writes from other processes. Only the
        // part this process accounts for is confirmed; a foreign remainder stays
        // divergent so the next poll pulls it into the ledger.
        let confirmed_remote = if is_divergent(remote, local1) {
            debug!(entity = %id, local = %local1, remote = %remote, "flush: store carries foreign writes");
            local1
        } else {
            remote
        };
        self.snapshots.set(id, local1, confirmed_remote);

        debug!(entity = %id, delta = %delta, remote = %remote, "flush: delta applied");
        Ok(FlushOutcome::DeltaApplied { delta, remote })
    }

    /// Flush every attached entity (periodic auto-save).
    pub async fn flush_attached(&self) -> BulkReport {
        let mut report = BulkReport::default();
        for entity in self.attached_entities() {
            report.visited += 1;
            match self.flush(&entity).await {
                Ok(o) if o.wrote_store() => report.written += 1,
                Ok(_) => {}
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    /// Persist every entity the LocalLedger knows about, attached or not.
    ///
    /// Entities without a snapshot are overwritten; entities with one go
    /// through the delta path like any other flush.
    pub async fn flush_all(&self) -> Result<BulkReport, SyncError> {
        let entities = self.ledger.accounts().await?;
        info!(entities = entities.len(), "saving all balances to store");

        let mut report = BulkReport::default();
        for entity in entities {
            report.visited += 1;
            let step = self.snapshots.lock_entity(entity.id).await;
            match self.flush_locked(&entity).await {
                Ok(o) if o.wrote_store() => report.written += 1,
                Ok(_) => {}
                Err(SyncError::OwnerContextClosed) => return Err(SyncError::OwnerContextClosed),
                Err(_) => report.failed += 1,
            }
            self.snapshots.release(entity.id, step);
        }

        info!(
            written = report.written,
            failed = report.failed,
            "saved balances to store"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Detach
    // ------------------------------------------------------------------

    /// Leave active reconciliation. Returns `Ok(None)` when the entity was
    /// not attached (or flush-on-detach is off).
    pub async fn detach(&self, id: EntityId) -> Result<Option<FlushOutcome>, SyncError> {
        let detached = {
            let mut pending = self.pending_attach.lock();
            pending.remove(&id);
            self.attached.lock().remove(&id)
        };
        let Some(entity) = detached else {
            return Ok(None);
        };

        let step = self.snapshots.lock_entity(id).await;
        let flushed = if self.settings.flush_on_detach {
            Some(self.flush_locked(&entity).await)
        } else {
            None
        };

        if !self.settings.monitor_offline_changes {
            self.snapshots.remove(id);
        }
        self.snapshots.release(id, step);
        debug!(entity = %id, "detached");

        flushed.transpose()
    }

    // ------------------------------------------------------------------
    // Offline divergence scan
    // ------------------------------------------------------------------

    /// Push ledger changes made while an entity was detached (e.g. by an
    /// administrative adjustment the engine never saw) as deltas.
    pub async fn offline_scan(&self) -> Result<BulkReport, SyncError> {
        let entities = self.ledger.accounts().await?;
        let mut report = BulkReport::default();

        for entity in entities {
            let id = entity.id;
            if self.is_attached(id) || self.snapshots.get(id).is_none() {
                continue;
            }

            let _step = self.snapshots.lock_entity(id).await;
            if self.is_attached(id) {
                continue;
            }
            let Some(before) = self.snapshots.get(id) else {
                continue;
            };
            report.visited += 1;

            match self.flush_locked(&entity).await {
                Ok(FlushOutcome::DeltaApplied { delta, remote }) => {
                    report.written += 1;
                    let local = self
                        .snapshots
                        .get(id)
                        .map(|s| s.last_known_local)
                        .unwrap_or(before.last_known_local + delta);
                    info!(entity = %id, delta = %delta, remote = %remote, "offline change pushed to store");
                    self.notifier.notify(
                        &entity,
                        &BalanceEvent {
                            kind: EventKind::OfflineChange,
                            old: before.last_known_local,
                            new: local,
                        },
                    );
                }
                Ok(_) => {}
                Err(SyncError::OwnerContextClosed) => return Err(SyncError::OwnerContextClosed),
                Err(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Forget all in-memory state. Snapshots are never persisted.
    pub fn shutdown(&self) {
        self.attached.lock().clear();
        self.pending_attach.lock().clear();
        self.load_pending.lock().clear();
        self.snapshots.clear();
        info!("reconciliation engine state cleared");
    }
}
