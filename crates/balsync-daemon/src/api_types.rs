//! Request and response types for all balsync-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use balsync_core::{AttachOutcome, BulkReport, EntityId, FlushOutcome, SnapshotEntry};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// /v1/status
// ---------------------------------------------------------------------------

/// Sync intervals and flags plus live counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub auto_save_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub offline_scan_interval_secs: u64,
    pub attach_delay_ms: u64,
    pub flush_on_detach: bool,
    pub reset_on_attach: bool,
    pub monitor_offline_changes: bool,
    pub notify_on_external_change: bool,
    pub starting_balance: Decimal,
    pub attached: usize,
    pub tracked_snapshots: usize,
}

// ---------------------------------------------------------------------------
// /v1/entities/{id}/...
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachResponse {
    pub entity_id: EntityId,
    /// true when the attach was deferred by `attach_delay_ms`.
    pub scheduled: bool,
    pub remote: Option<Decimal>,
    pub local_before: Option<Decimal>,
    pub local_after: Option<Decimal>,
    pub used_starting_balance: Option<bool>,
}

impl AttachResponse {
    pub fn scheduled(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            scheduled: true,
            remote: None,
            local_before: None,
            local_after: None,
            used_starting_balance: None,
        }
    }

    pub fn completed(entity_id: EntityId, o: &AttachOutcome) -> Self {
        Self {
            entity_id,
            scheduled: false,
            remote: Some(o.remote),
            local_before: Some(o.local_before),
            local_after: Some(o.local_after),
            used_starting_balance: Some(o.used_starting_balance),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachResponse {
    pub entity_id: EntityId,
    /// false when the entity was not attached.
    pub detached: bool,
    /// "no_account" | "unchanged" | "delta_applied" | "overwritten" | "loaded"
    pub flush: Option<String>,
}

pub fn flush_label(o: &FlushOutcome) -> &'static str {
    match o {
        FlushOutcome::NoAccount => "no_account",
        FlushOutcome::Unchanged => "unchanged",
        FlushOutcome::DeltaApplied { .. } => "delta_applied",
        FlushOutcome::Overwritten { .. } => "overwritten",
        FlushOutcome::Loaded { .. } => "loaded",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotView {
    pub last_known_local: Decimal,
    pub last_known_remote: Decimal,
}

impl From<SnapshotEntry> for SnapshotView {
    fn from(s: SnapshotEntry) -> Self {
        Self {
            last_known_local: s.last_known_local,
            last_known_remote: s.last_known_remote,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub entity_id: EntityId,
    pub balance: Decimal,
    pub attached: bool,
    pub snapshot: Option<SnapshotView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
}

// ---------------------------------------------------------------------------
// /v1/save
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub visited: usize,
    pub written: usize,
    pub failed: usize,
}

impl From<BulkReport> for SaveResponse {
    fn from(r: BulkReport) -> Self {
        Self {
            visited: r.visited,
            written: r.written,
            failed: r.failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
