//! Periodic maintenance: re-match pending requests and evict expired ledger entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::core::{KvStore, QueueManager};
use crate::runtime::tokio_spawner::Spawn;
use crate::util::clock::now_ms;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Pending requests granted.
    pub activated: usize,
    /// Terminal ledger entries evicted.
    pub evicted: usize,
}

/// Stops the maintenance loop at its next tick.
#[derive(Debug, Clone)]
pub struct MaintenanceHandle {
    shutdown: Arc<AtomicBool>,
}

impl MaintenanceHandle {
    /// Ask the loop to exit.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Run one pass. Failures are logged; the next tick retries.
pub fn run_maintenance_pass<S>(manager: &QueueManager<S>) -> MaintenanceReport
where
    S: KvStore + 'static,
{
    let mut report = MaintenanceReport::default();
    match manager.rematch() {
        Ok(activated) => report.activated = activated,
        Err(err) => tracing::warn!(error = %err, "maintenance re-match failed"),
    }
    match manager.evict_terminal(now_ms()) {
        Ok(evicted) => report.evicted = evicted,
        Err(err) => tracing::warn!(error = %err, "maintenance eviction failed"),
    }
    tracing::debug!(activated = report.activated, evicted = report.evicted, "maintenance pass");
    report
}

/// Spawn the maintenance loop on `spawner`, ticking every `interval`.
pub fn spawn_maintenance<S, Sp>(
    manager: QueueManager<S>,
    interval: Duration,
    spawner: &Sp,
) -> MaintenanceHandle
where
    S: KvStore + 'static,
    Sp: Spawn,
{
    let handle = MaintenanceHandle {
        shutdown: Arc::new(AtomicBool::new(false)),
    };
    let loop_handle = handle.clone();
    spawner.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if loop_handle.is_shutdown() {
                tracing::info!("maintenance loop stopped");
                break;
            }
            if let Err(err) = manager.blocking(|qm| Ok(run_maintenance_pass(qm))).await {
                tracing::warn!(error = %err, "maintenance pass aborted");
            }
        }
    });
    tracing::info!(interval = ?interval, "maintenance loop started");
    handle
}
