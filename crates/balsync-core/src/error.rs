use std::fmt;

use rust_decimal::Decimal;

use crate::EntityId;

/// Errors a [`crate::RemoteStore`] implementation may return.
///
/// "No record" is not an error: reads return `Ok(None)` / an absent key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection or query failure. Synchronization stalls until it clears.
    Unavailable(String),
    /// A row came back in a shape the store could not decode.
    Decode(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Decode(msg) => write!(f, "store decode error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors a [`crate::LocalLedger`] implementation may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    NoAccount(EntityId),
    /// Deposit/withdraw amounts must be strictly positive.
    InvalidAmount(Decimal),
    /// The ledger refused the operation (e.g. an economy that forbids overdraft).
    Rejected { entity: EntityId, reason: String },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::NoAccount(id) => write!(f, "no ledger account for {id}"),
            LedgerError::InvalidAmount(a) => write!(f, "invalid ledger amount: {a}"),
            LedgerError::Rejected { entity, reason } => {
                write!(f, "ledger rejected operation for {entity}: {reason}")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

/// Failure of one reconciliation step.
///
/// Every variant means the step was abandoned before the SnapshotTracker was
/// touched; the next scheduled cycle retries from the last confirmed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    Store(StoreError),
    Ledger(LedgerError),
    /// The owner context task has stopped (process shutting down).
    OwnerContextClosed,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Store(e) => write!(f, "{e}"),
            SyncError::Ledger(e) => write!(f, "{e}"),
            SyncError::OwnerContextClosed => write!(f, "ledger owner context closed"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Store(e) => Some(e),
            SyncError::Ledger(e) => Some(e),
            SyncError::OwnerContextClosed => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

impl From<LedgerError> for SyncError {
    fn from(e: LedgerError) -> Self {
        SyncError::Ledger(e)
    }
}
