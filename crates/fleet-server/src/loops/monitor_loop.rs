//! Health monitor: stale vehicles, overdue tasks, route lifecycle and
//! battery warnings.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::interval;

use chrono::Utc;

use crate::state::Orchestrator;

pub async fn run_monitor_loop(state: Arc<Orchestrator>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config().monitor_interval);
    // Vehicles already warned about, so a low battery is logged once per dip.
    let mut warned: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Monitor loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                sweep(&state, &mut warned);
            }
        }
    }
}

/// One monitor pass. Public so tests can drive it without the timer.
pub fn sweep(state: &Orchestrator, warned: &mut HashSet<String>) {
    let now = Utc::now();

    let stale = state.mark_stale_vehicles(now);
    if !stale.is_empty() {
        tracing::warn!("{} vehicle(s) went offline: {}", stale.len(), stale.join(", "));
    }

    for task_id in state.expire_overdue(now) {
        tracing::warn!("Task {} failed: deadline passed", task_id);
    }

    for route_id in state.activate_due_routes(now) {
        tracing::debug!("Route {} active", route_id);
    }

    let pruned = state.prune_routes(now);
    if pruned > 0 {
        tracing::debug!("Pruned {} archived routes", pruned);
    }
    state.planner().prune_cache();

    let low = state.low_battery_vehicles();
    let current: HashSet<String> = low.iter().map(|(id, _)| id.clone()).collect();
    for (vehicle_id, battery) in &low {
        if !warned.contains(vehicle_id) {
            tracing::warn!("Vehicle {} battery low: {:.1}%", vehicle_id, battery);
        }
    }
    *warned = current;
}
