use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::ledger::LocalLedger;
use crate::{Entity, EntityId, LedgerError};

/// In-process ledger backed by a map. Used by the daemon host and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    accounts: BTreeMap<EntityId, Account>,
    allow_overdraft: bool,
}

#[derive(Debug, Clone)]
struct Account {
    name: String,
    balance: Decimal,
}

impl MemoryLedger {
    /// Ledger that permits negative balances.
    pub fn new() -> Self {
        Self {
            accounts: BTreeMap::new(),
            allow_overdraft: true,
        }
    }

    /// Ledger that rejects withdrawals below zero.
    pub fn without_overdraft() -> Self {
        Self {
            accounts: BTreeMap::new(),
            allow_overdraft: false,
        }
    }

    /// Administrative write that bypasses deposit/withdraw, creating the
    /// account if needed.
    pub fn set_balance(&mut self, entity: &Entity, balance: Decimal) {
        self.accounts
            .entry(entity.id)
            .and_modify(|a| a.balance = balance)
            .or_insert_with(|| Account {
                name: entity.name.clone(),
                balance,
            });
    }
}

fn check_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

impl LocalLedger for MemoryLedger {
    fn has_account(&self, id: EntityId) -> bool {
        self.accounts.contains_key(&id)
    }

    fn create_account(&mut self, entity: &Entity) -> Result<(), LedgerError> {
        self.accounts.entry(entity.id).or_insert_with(|| Account {
            name: entity.name.clone(),
            balance: Decimal::ZERO,
        });
        Ok(())
    }

    fn balance(&self, id: EntityId) -> Option<Decimal> {
        self.accounts.get(&id).map(|a| a.balance)
    }

    fn deposit(&mut self, id: EntityId, amount: Decimal) -> Result<(), LedgerError> {
        check_amount(amount)?;
        let acct = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::NoAccount(id))?;
        acct.balance += amount;
        Ok(())
    }

    fn withdraw(&mut self, id: EntityId, amount: Decimal) -> Result<(), LedgerError> {
        check_amount(amount)?;
        let allow_overdraft = self.allow_overdraft;
        let acct = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::NoAccount(id))?;
        if !allow_overdraft && acct.balance < amount {
            return Err(LedgerError::Rejected {
                entity: id,
                reason: format!("insufficient funds: {} < {}", acct.balance, amount),
            });
        }
        acct.balance -= amount;
        Ok(())
    }

    fn accounts(&self) -> Vec<Entity> {
        self.accounts
            .iter()
            .map(|(id, a)| Entity::new(*id, a.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deposit_withdraw_and_amount_checks() {
        let e = Entity::new(EntityId::new_v4(), "alice");
        let mut l = MemoryLedger::new();
        assert_eq!(l.deposit(e.id, dec!(1)), Err(LedgerError::NoAccount(e.id)));

        l.create_account(&e).unwrap();
        l.deposit(e.id, dec!(10)).unwrap();
        l.withdraw(e.id, dec!(15)).unwrap();
        assert_eq!(l.balance(e.id), Some(dec!(-5)));

        assert_eq!(l.deposit(e.id, dec!(0)), Err(LedgerError::InvalidAmount(dec!(0))));
        assert_eq!(l.accounts(), vec![e]);
    }

    #[test]
    fn without_overdraft_rejects_below_zero() {
        let e = Entity::new(EntityId::new_v4(), "bob");
        let mut l = MemoryLedger::without_overdraft();
        l.set_balance(&e, dec!(3));
        assert!(matches!(
            l.withdraw(e.id, dec!(4)),
            Err(LedgerError::Rejected { .. })
        ));
        assert_eq!(l.balance(e.id), Some(dec!(3)));
    }

    #[test]
    fn create_account_keeps_existing_balance() {
        let e = Entity::new(EntityId::new_v4(), "carol");
        let mut l = MemoryLedger::new();
        l.set_balance(&e, dec!(7));
        l.create_account(&e).unwrap();
        assert_eq!(l.balance(e.id), Some(dec!(7)));
    }
}
