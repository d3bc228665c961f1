//! Scenario: changes within 0.001 are noise.
//!
//! # Invariants under test
//!
//! - A store change of 0.0005 between polls moves nothing and notifies nothing.
//! - A real change is applied and notified with old/new values.
//! - A local change of 0.0005 is not flushed.

use balsync_core::{Entity, EntityId, EventKind, FlushOutcome};
use balsync_testkit::{test_settings, MemoryStore, SimProcess};
use rust_decimal_macros::dec;

#[tokio::test]
async fn sub_threshold_remote_change_is_ignored() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let p = SimProcess::spawn(&store, test_settings());
    let e = Entity::new(EntityId::new_v4(), "quiet");
    store.external_set(e.id, dec!(100));
    p.engine.attach(&e).await?;
    p.notifier.clear();

    store.external_set(e.id, dec!(100.0005));
    let report = p.engine.poll().await?;
    assert_eq!(report.applied, 0);
    assert_eq!(p.local(e.id).await, Some(dec!(100)));
    assert!(p.notifier.events().is_empty());

    store.external_set(e.id, dec!(100.50));
    let report = p.engine.poll().await?;
    assert_eq!(report.applied, 1);
    assert_eq!(p.local(e.id).await, Some(dec!(100.50)));

    let events = p.notifier.of_kind(EventKind::ExternalChange);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.old, dec!(100));
    assert_eq!(events[0].1.new, dec!(100.50));
    Ok(())
}

#[tokio::test]
async fn external_change_notification_can_be_disabled() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut settings = test_settings();
    settings.notify_on_external_change = false;
    let p = SimProcess::spawn(&store, settings);
    let e = Entity::new(EntityId::new_v4(), "muted");
    store.external_set(e.id, dec!(10));
    p.engine.attach(&e).await?;

    store.external_set(e.id, dec!(15));
    assert_eq!(p.engine.poll().await?.applied, 1);
    assert_eq!(p.local(e.id).await, Some(dec!(15)));
    assert!(p.notifier.of_kind(EventKind::ExternalChange).is_empty());
    Ok(())
}

#[tokio::test]
async fn sub_threshold_local_change_is_not_flushed() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let p = SimProcess::spawn(&store, test_settings());
    let e = Entity::new(EntityId::new_v4(), "dust");
    store.external_set(e.id, dec!(20));
    p.engine.attach(&e).await?;

    p.earn(e.id, dec!(0.0005)).await?;
    assert_eq!(p.engine.flush(&e).await?, FlushOutcome::Unchanged);
    assert_eq!(store.delta_count(), 0);
    Ok(())
}

#[tokio::test]
async fn poll_skips_entities_without_store_record() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let p = SimProcess::spawn(&store, test_settings());
    let e = Entity::new(EntityId::new_v4(), "unsaved");

    // No record: attach loads the starting balance.
    let out = p.engine.attach(&e).await?;
    assert!(out.used_starting_balance);
    assert_eq!(p.local(e.id).await, Some(dec!(100)));

    let report = p.engine.poll().await?;
    assert_eq!((report.considered, report.missing, report.applied), (1, 1, 0));
    assert_eq!(p.local(e.id).await, Some(dec!(100)));
    Ok(())
}
