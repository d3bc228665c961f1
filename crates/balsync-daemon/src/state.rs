//! Shared runtime state for balsync-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The engine owns the
//! LocalLedger through its owner context; the scheduler owns every
//! background task so shutdown can stop them before the final save.

use std::sync::Arc;
use std::time::Duration;

use balsync_config::SyncSettings;
use balsync_core::{
    spawn_sync_tasks, BalanceEvent, BulkReport, Entity, EntityId, EventKind, MemoryLedger,
    Notifier, OwnerContext, ReconciliationEngine, RemoteStore, Scheduler, SyncError,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

pub type Engine = ReconciliationEngine<MemoryLedger>;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    Balance {
        entity_id: EntityId,
        name: String,
        kind: EventKind,
        old: Decimal,
        new: Decimal,
    },
    Saved {
        visited: usize,
        written: usize,
        failed: usize,
    },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Balance { .. } => "balance",
            BusMsg::Saved { .. } => "saved",
        }
    }
}

/// Publishes engine notifications on the bus and logs them.
#[derive(Clone, Debug)]
pub struct BusNotifier {
    bus: broadcast::Sender<BusMsg>,
}

impl BusNotifier {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl Notifier for BusNotifier {
    fn notify(&self, entity: &Entity, event: &BalanceEvent) {
        info!(
            entity = %entity.id,
            name = %entity.name,
            kind = event.kind.as_str(),
            old = %event.old.round_dp(2),
            new = %event.new.round_dp(2),
            "balance event"
        );
        // No subscribers is fine.
        let _ = self.bus.send(BusMsg::Balance {
            entity_id: entity.id,
            name: entity.name.clone(),
            kind: event.kind,
            old: event.old,
            new: event.new,
        });
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    pub engine: Arc<Engine>,
    pub scheduler: Scheduler,
}

impl AppState {
    /// Build the engine over `store` with a fresh in-memory ledger.
    /// Must be called inside a tokio runtime.
    pub fn new(settings: SyncSettings, store: Arc<dyn RemoteStore>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let (owner, _ledger_task) = OwnerContext::spawn(MemoryLedger::new());
        let notifier = Arc::new(BusNotifier::new(bus.clone()));
        let engine = Arc::new(ReconciliationEngine::new(settings, store, owner, notifier));

        Self {
            bus,
            build: BuildInfo {
                service: "balsync-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            engine,
            scheduler: Scheduler::new(),
        }
    }

    /// Start auto-save, poll and offline scan per the engine settings.
    pub fn start_sync_tasks(&self) {
        spawn_sync_tasks(&self.scheduler, Arc::clone(&self.engine));
    }

    /// FlushAll and publish the result on the bus.
    pub async fn save_all(&self) -> Result<BulkReport, SyncError> {
        let report = self.engine.flush_all().await?;
        let _ = self.bus.send(BusMsg::Saved {
            visited: report.visited,
            written: report.written,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Stop scheduled tasks, save everything, then forget in-memory state.
    pub async fn shutdown(&self) -> Result<BulkReport, SyncError> {
        self.scheduler.shutdown().await;
        let report = self.save_all().await;
        self.engine.shutdown();
        report
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Emit a heartbeat on the bus every `interval` until the scheduler stops.
pub fn spawn_heartbeat(state: &AppState, interval: Duration) {
    let bus = state.bus.clone();
    state.scheduler.run_periodic("heartbeat", interval, move || {
        let bus = bus.clone();
        async move {
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
