//! LocalLedger boundary and the single owner context that mutates it.
//!
//! The ledger value lives inside one tokio task. Every caller (reconciliation
//! steps, host code, HTTP handlers) submits a closure over an mpsc channel and
//! awaits the result on a oneshot, so all mutations for all entities are
//! serialized through that task and a read used to compute an adjustment is
//! always taken at apply time.

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::balance::is_negligible;
use crate::{Entity, EntityId, LedgerError, SyncError};

/// The live, in-process balance per entity (e.g. an in-memory economy).
///
/// Implementations are owned by an [`OwnerContext`] and never shared, so
/// they take `&mut self` for mutations and need no internal locking.
pub trait LocalLedger: Send + 'static {
    fn has_account(&self, id: EntityId) -> bool;

    fn create_account(&mut self, entity: &Entity) -> Result<(), LedgerError>;

    /// Current balance, `None` when the entity has no account.
    fn balance(&self, id: EntityId) -> Option<Decimal>;

    fn deposit(&mut self, id: EntityId, amount: Decimal) -> Result<(), LedgerError>;

    fn withdraw(&mut self, id: EntityId, amount: Decimal) -> Result<(), LedgerError>;

    /// Every entity the ledger holds an account for, attached or not.
    fn accounts(&self) -> Vec<Entity>;
}

/// Move an account by a signed amount: deposit when positive, withdraw the
/// magnitude when negative. Amounts within the divergence threshold are
/// skipped. Returns `true` when the ledger was touched.
pub fn apply_signed<L: LocalLedger + ?Sized>(
    ledger: &mut L,
    id: EntityId,
    diff: Decimal,
) -> Result<bool, LedgerError> {
    if is_negligible(diff) {
        return Ok(false);
    }
    if diff.is_sign_positive() {
        ledger.deposit(id, diff)?;
    } else {
        ledger.withdraw(id, diff.abs())?;
    }
    Ok(true)
}

type Job<L> = Box<dyn FnOnce(&mut L) + Send>;

/// Queue depth of the owner context; submitters wait when it is full.
const OWNER_QUEUE_DEPTH: usize = 1024;

/// Cloneable handle to the task that owns the LocalLedger.
pub struct OwnerContext<L> {
    tx: mpsc::Sender<Job<L>>,
}

impl<L> Clone for OwnerContext<L> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<L: LocalLedger> OwnerContext<L> {
    /// Move `ledger` into a dedicated task. The task ends (returning the
    /// ledger) once every handle has been dropped.
    pub fn spawn(ledger: L) -> (Self, JoinHandle<L>) {
        let (tx, mut rx) = mpsc::channel::<Job<L>>(OWNER_QUEUE_DEPTH);
        let handle = tokio::spawn(async move {
            let mut ledger = ledger;
            while let Some(job) = rx.recv().await {
                job(&mut ledger);
            }
            debug!("ledger owner context drained");
            ledger
        });
        (Self { tx }, handle)
    }

    /// Run `f` on the owner context and wait for its result.
    pub async fn run<R, F>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&mut L) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<L> = Box::new(move |ledger| {
            // Receiver gone means the caller was cancelled; the mutation stands.
            let _ = reply_tx.send(f(ledger));
        });
        self.tx
            .send(job)
            .await
            .map_err(|_| SyncError::OwnerContextClosed)?;
        reply_rx.await.map_err(|_| SyncError::OwnerContextClosed)
    }

    pub async fn balance(&self, id: EntityId) -> Result<Option<Decimal>, SyncError> {
        self.run(move |l| l.balance(id)).await
    }

    pub async fn accounts(&self) -> Result<Vec<Entity>, SyncError> {
        self.run(|l| l.accounts()).await
    }

    pub async fn deposit(&self, id: EntityId, amount: Decimal) -> Result<Decimal, SyncError> {
        self.run(move |l| {
            l.deposit(id, amount)?;
            l.balance(id).ok_or(LedgerError::NoAccount(id))
        })
        .await?
        .map_err(SyncError::from)
    }

    pub async fn withdraw(&self, id: EntityId, amount: Decimal) -> Result<Decimal, SyncError> {
        self.run(move |l| {
            l.withdraw(id, amount)?;
            l.balance(id).ok_or(LedgerError::NoAccount(id))
        })
        .await?
        .map_err(SyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[derive(Default)]
    struct VecLedger {
        accounts: HashMap<EntityId, (String, Decimal)>,
        ops: Vec<String>,
    }

    impl LocalLedger for VecLedger {
        fn has_account(&self, id: EntityId) -> bool {
            self.accounts.contains_key(&id)
        }
        fn create_account(&mut self, entity: &Entity) -> Result<(), LedgerError> {
            self.accounts
                .insert(entity.id, (entity.name.clone(), Decimal::ZERO));
            Ok(())
        }
        fn balance(&self, id: EntityId) -> Option<Decimal> {
            self.accounts.get(&id).map(|(_, b)| *b)
        }
        fn deposit(&mut self, id: EntityId, amount: Decimal) -> Result<(), LedgerError> {
            let acct = self.accounts.get_mut(&id).ok_or(LedgerError::NoAccount(id))?;
            acct.1 += amount;
            self.ops.push(format!("deposit {amount}"));
            Ok(())
        }
        fn withdraw(&mut self, id: EntityId, amount: Decimal) -> Result<(), LedgerError> {
            let acct = self.accounts.get_mut(&id).ok_or(LedgerError::NoAccount(id))?;
            acct.1 -= amount;
            self.ops.push(format!("withdraw {amount}"));
            Ok(())
        }
        fn accounts(&self) -> Vec<Entity> {
            self.accounts
                .iter()
                .map(|(id, (name, _))| Entity::new(*id, name.clone()))
                .collect()
        }
    }

    #[test]
    fn apply_signed_picks_direction_and_skips_noise() {
        let id = EntityId::new_v4();
        let mut l = VecLedger::default();
        l.create_account(&Entity::new(id, "a")).unwrap();

        assert!(apply_signed(&mut l, id, dec!(5)).unwrap());
        assert!(apply_signed(&mut l, id, dec!(-2.5)).unwrap());
        assert!(!apply_signed(&mut l, id, dec!(0.0008)).unwrap());

        assert_eq!(l.ops, vec!["deposit 5", "withdraw 2.5"]);
        assert_eq!(l.balance(id), Some(dec!(2.5)));
    }

    #[tokio::test]
    async fn owner_context_serializes_jobs_and_returns_ledger() {
        let id = EntityId::new_v4();
        let (owner, handle) = OwnerContext::spawn(VecLedger::default());
        owner
            .run(move |l| l.create_account(&Entity::new(id, "a")))
            .await
            .unwrap()
            .unwrap();

        let mut joins = Vec::new();
        for _ in 0..50 {
            let o = owner.clone();
            joins.push(tokio::spawn(async move { o.deposit(id, dec!(1)).await }));
        }
        for j in joins {
            j.await.unwrap().unwrap();
        }

        assert_eq!(owner.balance(id).await.unwrap(), Some(dec!(50)));
        drop(owner);
        let ledger = handle.await.unwrap();
        assert_eq!(ledger.ops.len(), 50);
    }

    #[tokio::test]
    async fn missing_account_surfaces_ledger_error() {
        let (owner, _h) = OwnerContext::spawn(VecLedger::default());
        let id = EntityId::new_v4();
        let err = owner.deposit(id, dec!(1)).await.unwrap_err();
        assert_eq!(err, SyncError::Ledger(LedgerError::NoAccount(id)));
    }
}
