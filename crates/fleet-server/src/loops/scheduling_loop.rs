//! Periodic scheduling tick.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::state::Orchestrator;

pub async fn run_scheduling_loop(state: Arc<Orchestrator>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config().schedule_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Scheduling loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let report = state.tick().await;
                if report.throttled {
                    tracing::debug!(
                        "Concurrency cap reached; {} tasks still queued",
                        state.queued_tasks()
                    );
                }
            }
        }
    }
}
