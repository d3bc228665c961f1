//! Scenario: attach loads the store value into the LocalLedger.
//!
//! # Invariants under test
//!
//! - reset-on-attach with LocalLedger 75 and store 40 ends at 40, not 115.
//! - A negative local balance is reset by a deposit.
//! - Attach creates the ledger account when it is missing.
//! - Attach emits one BalanceLoaded event and seeds the snapshot with the
//!   store value on both sides.

use balsync_core::{Entity, EntityId, EventKind, LocalLedger};
use balsync_testkit::{test_settings, MemoryStore, SimProcess};
use rust_decimal_macros::dec;

fn reset_settings() -> balsync_config::SyncSettings {
    let mut s = test_settings();
    s.reset_on_attach = true;
    s
}

#[tokio::test]
async fn reset_then_load_store_value() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let p = SimProcess::spawn(&store, reset_settings());
    let e = Entity::new(EntityId::new_v4(), "herobrine");
    p.set_local(&e, dec!(75)).await?;
    store.external_set(e.id, dec!(40));

    let out = p.engine.attach(&e).await?;
    assert_eq!(out.local_before, dec!(75));
    assert_eq!(out.local_after, dec!(40));
    assert_eq!(out.remote, dec!(40));
    assert!(!out.used_starting_balance);
    assert_eq!(p.local(e.id).await, Some(dec!(40)));

    let snap = p.engine.snapshot(e.id).expect("snapshot after attach");
    assert_eq!((snap.last_known_local, snap.last_known_remote), (dec!(40), dec!(40)));

    let loaded = p.notifier.of_kind(EventKind::BalanceLoaded);
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].1.old, dec!(75));
    assert_eq!(loaded[0].1.new, dec!(40));

    // Attach never writes the store.
    assert_eq!((store.overwrite_count(), store.delta_count()), (0, 0));
    Ok(())
}

#[tokio::test]
async fn negative_local_is_reset_by_deposit() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let p = SimProcess::spawn(&store, reset_settings());
    let e = Entity::new(EntityId::new_v4(), "debtor");
    p.set_local(&e, dec!(-5)).await?;
    store.external_set(e.id, dec!(40));

    p.engine.attach(&e).await?;
    assert_eq!(p.local(e.id).await, Some(dec!(40)));
    Ok(())
}

#[tokio::test]
async fn attach_creates_missing_account() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let p = SimProcess::spawn(&store, test_settings());
    let e = Entity::new(EntityId::new_v4(), "fresh");
    store.external_set(e.id, dec!(33.30));

    assert_eq!(p.local(e.id).await, None);
    let out = p.engine.attach(&e).await?;
    assert_eq!(out.local_before, dec!(0));
    assert_eq!(out.local_after, dec!(33.30));

    let id = e.id;
    let has = p.owner().run(move |l| l.has_account(id)).await?;
    assert!(has);
    assert!(p.engine.is_attached(e.id));
    Ok(())
}
