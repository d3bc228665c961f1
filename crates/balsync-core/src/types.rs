use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable opaque identifier of a synchronized entity (a player / account).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new_v4() -> Self {
        EntityId(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EntityId)
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        EntityId(u)
    }
}

/// An entity plus its display name.
///
/// The name is best-effort bookkeeping for the store row; identity is `id` only.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// What the engine did to the LocalLedger during an Attach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachOutcome {
    /// Value read from the RemoteStore (or the starting balance when absent).
    pub remote: Decimal,
    /// LocalLedger value before any adjustment.
    pub local_before: Decimal,
    /// LocalLedger value after reset + apply.
    pub local_after: Decimal,
    /// `true` when the store had no record for the entity.
    pub used_starting_balance: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Entity has no LocalLedger account; nothing to persist.
    NoAccount,
    /// Local value is within the divergence threshold of the snapshot.
    Unchanged,
    /// Delta was added atomically; `remote` is the store balance after the add.
    DeltaApplied { delta: Decimal, remote: Decimal },
    /// First contact: the store was overwritten with the local value.
    Overwritten { balance: Decimal },
    /// The entity's attach never read the store; the existing record was
    /// loaded into the LocalLedger instead of being overwritten.
    Loaded { remote: Decimal },
}

impl FlushOutcome {
    pub fn wrote_store(&self) -> bool {
        matches!(
            self,
            FlushOutcome::DeltaApplied { .. } | FlushOutcome::Overwritten { .. }
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Attached entities considered this cycle.
    pub considered: usize,
    /// Entities whose LocalLedger was moved to the store value.
    pub applied: usize,
    /// Attached entities with no store record (skipped, no synthetic delta).
    pub missing: usize,
    /// Entities whose snapshot changed between the batched read and apply.
    pub superseded: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub visited: usize,
    pub written: usize,
    pub failed: usize,
}
