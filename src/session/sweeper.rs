// src/session/sweeper.rs
// Background worker that expires idle sessions and prunes old ledger entries

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::store::SessionStore;
use crate::budget::CostLedger;

/// Periodic cleanup worker
pub struct SessionSweeper {
    store: Arc<SessionStore>,
    ledger: Option<Arc<CostLedger>>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SessionSweeper {
    pub fn new(
        store: Arc<SessionStore>,
        ledger: Option<Arc<CostLedger>>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            ledger,
            interval,
            shutdown,
        }
    }

    /// Run one cleanup pass. Returns the number of sessions removed.
    pub fn tick(&self) -> usize {
        let removed = self.store.sweep();
        if let Some(ledger) = &self.ledger {
            let pruned = ledger.prune_stale();
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned stale cost entries");
            }
        }
        removed
    }

    /// Run until the shutdown flag flips to true
    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Session sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.tick();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.store.len(), "Sweep pass finished");
                    }
                }
                changed = self.shutdown.changed() => {
                    // sender dropped counts as shutdown
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Session sweeper shutting down");
    }
}

/// Spawn the sweeper on the current runtime.
///
/// Returns the shutdown sender (send `true` to stop) and the task handle.
pub fn spawn(
    store: Arc<SessionStore>,
    ledger: Option<Arc<CostLedger>>,
    interval: Duration,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = SessionSweeper::new(store, ledger, interval, shutdown_rx);
    let handle = tokio::spawn(sweeper.run());
    (shutdown_tx, handle)
}
