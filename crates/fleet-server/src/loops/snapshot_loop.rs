//! Periodic state snapshots, plus a final one on shutdown.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};

use crate::persistence::SnapshotStore;
use crate::state::Orchestrator;

pub async fn run_snapshot_loop(
    state: Arc<Orchestrator>,
    store: Arc<SnapshotStore>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = state.config().snapshot_interval;
    // Skip the immediate first tick; startup state was just restored.
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                save(&state, &store).await;
                tracing::info!("Snapshot loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                save(&state, &store).await;
            }
        }
    }
}

pub async fn save(state: &Orchestrator, store: &SnapshotStore) {
    let snapshot = state.snapshot();
    match store.save(&snapshot).await {
        Ok(()) => tracing::debug!(
            "Snapshot saved ({} vehicles, {} tasks) to {}",
            snapshot.vehicles.len(),
            snapshot.tasks.len(),
            store.describe()
        ),
        Err(err) => tracing::warn!("Snapshot save failed: {:#}", err),
    }
}
