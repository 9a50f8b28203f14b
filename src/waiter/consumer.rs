// src/waiter/consumer.rs

//! Background consumers for the notify queue.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::WaitNotifyEngine;

/// Handle to the running consumer pool and cleanup task.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Stop all workers and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "notify consumer task ended abnormally");
            }
        }
    }
}

/// Spawn `consumer_workers` delivery workers plus the zombie-response sweep.
///
/// Each worker wakes on the engine's notify signal or on the poll interval,
/// whichever comes first, and drains whatever it can claim.
pub fn spawn_consumers(engine: Arc<WaitNotifyEngine>) -> ConsumerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = engine.config().consumer_workers.max(1);

    let mut tasks = Vec::with_capacity(workers + 1);
    for worker in 0..workers {
        tasks.push(tokio::spawn(consumer_loop(
            worker,
            Arc::clone(&engine),
            shutdown_rx.clone(),
        )));
    }
    tasks.push(tokio::spawn(cleanup_loop(engine, shutdown_rx)));

    info!(workers, "notify consumers started");
    ConsumerHandle { shutdown_tx, tasks }
}

async fn consumer_loop(
    worker: usize,
    engine: Arc<WaitNotifyEngine>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let wake = engine.wake_signal();
    let mut ticker = tokio::time::interval(engine.config().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = wake.notified() => {}
            _ = ticker.tick() => {}
        }

        match engine.process_pending().await {
            Ok(0) => {}
            Ok(delivered) => debug!(worker, delivered, "notify consumer delivered callbacks"),
            Err(e) => warn!(worker, error = %e, "notify consumer pass failed"),
        }
    }

    debug!(worker, "notify consumer exiting");
}

async fn cleanup_loop(engine: Arc<WaitNotifyEngine>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(engine.config().cleanup_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = engine.sweep_zombie_responses(Utc::now()) {
                    warn!(error = %e, "zombie response sweep failed");
                }
            }
        }
    }

    debug!("notify cleanup task exiting");
}
