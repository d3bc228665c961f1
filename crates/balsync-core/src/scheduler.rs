//! Periodic and deferred task runner.
//!
//! Tasks run as independent tokio tasks; reconciliation steps serialize per
//! entity inside the engine, and LocalLedger mutations go through the owner
//! context, so the scheduler itself imposes no ordering.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::engine::ReconciliationEngine;
use crate::ledger::LocalLedger;
use crate::Entity;

pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `task` every `every`, first run one interval from now. A tick that
    /// overruns the interval skips the missed ticks instead of bursting.
    pub fn run_periodic<F, Fut>(&self, name: &'static str, every: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    _ = stop.changed() => break,
                }
            }
            debug!(task = name, "periodic task stopped");
        });
        self.handles.lock().push(handle);
    }

    /// Run `fut` once after `delay`, unless shutdown comes first.
    pub fn run_once_after<Fut>(&self, delay: Duration, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => fut.await,
                _ = stop.changed() => {}
            }
        });
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Signal every task and wait for them to finish their current tick.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            if let Err(e) = h.await {
                warn!(error = %e, "scheduled task ended abnormally");
            }
        }
    }
}

/// Register the engine's periodic cycles according to its settings.
/// Disabled intervals are not scheduled.
pub fn spawn_sync_tasks<L: LocalLedger>(scheduler: &Scheduler, engine: Arc<ReconciliationEngine<L>>) {
    let settings = engine.settings().clone();

    if let Some(every) = settings.auto_save_interval() {
        let engine = Arc::clone(&engine);
        scheduler.run_periodic("auto_save", every, move || {
            let engine = Arc::clone(&engine);
            async move {
                let r = engine.flush_attached().await;
                if r.written > 0 || r.failed > 0 {
                    debug!(written = r.written, failed = r.failed, "auto-save cycle");
                }
            }
        });
    }

    if let Some(every) = settings.poll_interval() {
        let engine = Arc::clone(&engine);
        scheduler.run_periodic("poll", every, move || {
            let engine = Arc::clone(&engine);
            async move {
                // Failures are logged inside the engine; the next tick retries.
                let _ = engine.poll().await;
            }
        });
    }

    if let Some(every) = settings.offline_scan_interval() {
        let engine = Arc::clone(&engine);
        scheduler.run_periodic("offline_scan", every, move || {
            let engine = Arc::clone(&engine);
            async move {
                if let Err(e) = engine.offline_scan().await {
                    warn!(error = %e, "offline scan aborted");
                }
            }
        });
    }
}

/// Mark `entity` pending and attach it after the configured delay. A detach
/// in between cancels the attach.
pub fn schedule_attach<L: LocalLedger>(
    scheduler: &Scheduler,
    engine: Arc<ReconciliationEngine<L>>,
    entity: Entity,
) {
    engine.mark_pending(&entity);
    let delay = engine.settings().attach_delay();
    scheduler.run_once_after(delay, async move {
        // Errors are logged by the engine; the entity stays attached and the
        // next poll fills it in.
        let _ = engine.attach_pending(&entity).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn periodic_task_ticks_until_shutdown() {
        let s = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        s.run_periodic("count", Duration::from_secs(10), move || {
            let h = Arc::clone(&h);
            async move {
                h.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        s.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn once_after_is_cancelled_by_shutdown() {
        let s = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        s.run_once_after(Duration::from_secs(1), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = Arc::clone(&hits);
        s.run_once_after(Duration::from_secs(100), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        s.shutdown().await;
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
