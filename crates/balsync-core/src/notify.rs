use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Entity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Attach finished; `new` is the value loaded from the store.
    BalanceLoaded,
    /// A poll saw the store change and moved the LocalLedger.
    ExternalChange,
    /// An offline scan pushed an out-of-session ledger change to the store.
    OfflineChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BalanceLoaded => "balance_loaded",
            EventKind::ExternalChange => "external_change",
            EventKind::OfflineChange => "offline_change",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub kind: EventKind,
    pub old: Decimal,
    pub new: Decimal,
}

/// Best-effort surface for balance changes made by the engine.
///
/// Called only after the underlying mutation has completed. Implementations
/// must swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, entity: &Entity, event: &BalanceEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, entity: &Entity, event: &BalanceEvent) {
        info!(
            entity = %entity.id,
            name = %entity.name,
            kind = event.kind.as_str(),
            old = %event.old.round_dp(2),
            new = %event.new.round_dp(2),
            "balance event"
        );
    }
}
