//! Timeout sweeper: a periodic task that expires stale bookings.
//!
//! Each tick runs the Store's single-statement sweep, then hands the
//! returned rows to the engine for fan-out. Safe to run on N workers at
//! once. Cancellation is observed between iterations only; an in-flight
//! sweep completes before the task exits.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::store::Store;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub fn spawn(store: Arc<Store>, engine: Arc<Engine>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(store, engine, cancel))
}

async fn run(store: Arc<Store>, engine: Arc<Engine>, cancel: CancellationToken) {
    info!(interval_secs = SWEEP_INTERVAL.as_secs(), "timeout sweeper started");
    loop {
        match store.sweep_expired().await {
            Ok(rows) if !rows.is_empty() => {
                info!(count = rows.len(), "expired bookings swept");
                engine.on_timeout_batch(&rows).await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "sweep failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("timeout sweeper stopped");
                return;
            }
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }
    }
}
