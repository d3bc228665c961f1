//! Deterministic in-memory collaborators for driving the real
//! ReconciliationEngine in tests. No network, no database.

use std::sync::Arc;

use balsync_config::SyncSettings;
use balsync_core::{
    BalanceEvent, Entity, EntityId, EventKind, MemoryLedger, Notifier, OwnerContext,
    ReconciliationEngine, SyncError,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;

mod memory_store;

pub use memory_store::{MemoryStore, Row};

/// Notifier that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(EntityId, BalanceEvent)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(EntityId, BalanceEvent)> {
        self.events.lock().clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<(EntityId, BalanceEvent)> {
        self.events
            .lock()
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, entity: &Entity, event: &BalanceEvent) {
        self.events.lock().push((entity.id, event.clone()));
    }
}

/// Settings for tests: no background intervals matter (tests call the
/// engine directly), starting balance 100, everything else default.
pub fn test_settings() -> SyncSettings {
    SyncSettings {
        attach_delay_ms: 0,
        ..SyncSettings::default()
    }
}

/// One simulated process: its own LocalLedger, owner context, snapshot
/// tracker and notifier, against a (usually shared) store.
pub struct SimProcess {
    pub engine: Arc<ReconciliationEngine<MemoryLedger>>,
    pub notifier: Arc<RecordingNotifier>,
}

impl SimProcess {
    /// Must be called inside a tokio runtime.
    pub fn spawn(store: &MemoryStore, settings: SyncSettings) -> Self {
        let (owner, _handle) = OwnerContext::spawn(MemoryLedger::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Arc::new(ReconciliationEngine::new(
            settings,
            Arc::new(store.clone()),
            owner,
            notifier.clone(),
        ));
        Self { engine, notifier }
    }

    pub fn owner(&self) -> &OwnerContext<MemoryLedger> {
        self.engine.ledger()
    }

    /// Current LocalLedger value.
    pub async fn local(&self, id: EntityId) -> Option<Decimal> {
        self.owner().balance(id).await.ok().flatten()
    }

    /// Administrative ledger write the engine does not observe.
    pub async fn set_local(&self, entity: &Entity, balance: Decimal) -> Result<(), SyncError> {
        let entity = entity.clone();
        self.owner()
            .run(move |l| l.set_balance(&entity, balance))
            .await
    }

    pub async fn earn(&self, id: EntityId, amount: Decimal) -> Result<Decimal, SyncError> {
        self.owner().deposit(id, amount).await
    }

    pub async fn spend(&self, id: EntityId, amount: Decimal) -> Result<Decimal, SyncError> {
        self.owner().withdraw(id, amount).await
    }
}
