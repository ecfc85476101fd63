//! Command dispatch.
//!
//! Drains the orchestrator's command channel and hands each command to the
//! configured sink. Deliveries run concurrently; a failed delivery puts the
//! stage back in the queue.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use fleet_core::VehicleCommand;

use crate::dispatch::{CommandSink, DispatchOutcome};
use crate::state::Orchestrator;

pub async fn run_dispatch_loop(
    state: Arc<Orchestrator>,
    sink: Arc<dyn CommandSink>,
    mut commands: mpsc::Receiver<VehicleCommand>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (outcome_tx, mut outcomes) = mpsc::channel::<DispatchOutcome>(256);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Dispatch loop shutting down");
                break;
            }
            received = commands.recv() => {
                let Some(command) = received else {
                    tracing::info!("Command channel closed; dispatch loop exiting");
                    break;
                };
                let sink = sink.clone();
                let outcome_tx = outcome_tx.clone();
                tokio::spawn(async move {
                    let error = sink.deliver(&command).await.err().map(|err| format!("{:#}", err));
                    if outcome_tx.send(DispatchOutcome { command, error }).await.is_err() {
                        tracing::debug!("Dispatch outcome dropped; loop already stopped");
                    }
                });
            }
            Some(outcome) = outcomes.recv() => {
                handle_outcome(&state, outcome);
            }
        }
    }
}

fn handle_outcome(state: &Orchestrator, outcome: DispatchOutcome) {
    match outcome.error {
        None => tracing::debug!(
            "Command {} delivered to {}",
            outcome.command.command_id,
            outcome.command.vehicle_id
        ),
        Some(reason) => state.report_dispatch_failure(&outcome.command, &reason),
    }
}
