//! Background loop behaviour driven against a live orchestrator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use fleet_core::{
    DeliveryPoint, DeliveryPointKind, NewTask, Position, TaskStatus, Vehicle, VehicleCommand, VehicleKind,
    VehicleStatus, World,
};
use fleet_server::config::{Config, SnapshotBackend};
use fleet_server::dispatch::CommandSink;
use fleet_server::loops::{dispatch_loop, monitor_loop};
use fleet_server::state::Orchestrator;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

/// Sink whose gateway is always down.
struct RejectingSink;

impl CommandSink for RejectingSink {
    fn deliver<'a>(&'a self, command: &'a VehicleCommand) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move { Err(anyhow!("gateway refused {}", command.command_id)) })
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.snapshot_backend = SnapshotBackend::Disabled;
    config.planner.rrt_seed = Some(13);
    config
}

#[tokio::test]
async fn failed_dispatch_marks_vehicle_error_and_requeues() {
    let (state, commands) = Orchestrator::new(config(), World::default());
    let state = Arc::new(state);
    state
        .register_point(DeliveryPoint::new("P1", DeliveryPointKind::Pickup, Position::ground(39.9, 116.400)))
        .unwrap();
    state
        .register_point(DeliveryPoint::new("D1", DeliveryPointKind::Delivery, Position::ground(39.9, 116.404)))
        .unwrap();
    state
        .register_vehicle(Vehicle::new("CAR_1", VehicleKind::Car, Position::ground(39.9, 116.400)))
        .unwrap();
    let task = state
        .create_task(NewTask {
            pickup_point: "P1".into(),
            delivery_point: "D1".into(),
            weight_kg: 1.0,
            ..NewTask::default()
        })
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let worker = tokio::spawn(dispatch_loop::run_dispatch_loop(
        state.clone(),
        Arc::new(RejectingSink),
        commands,
        shutdown_tx.subscribe(),
    ));

    let report = state.tick().await;
    assert_eq!(report.assigned.len(), 1);

    let mut released = false;
    for _ in 0..100 {
        if state.get_vehicle("CAR_1").unwrap().status == VehicleStatus::Error {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released, "dispatch failure never reached the orchestrator");

    let task = state.get_task(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.assigned_vehicles.is_empty());
    assert!(state.get_vehicle("CAR_1").unwrap().current_task.is_none());

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn monitor_sweep_tracks_low_battery_once() {
    let (state, _rx) = Orchestrator::new(config(), World::default());
    state
        .register_vehicle(Vehicle::new("DRONE_1", VehicleKind::Drone, Position::ground(39.9, 116.4)).with_battery(12.0))
        .unwrap();
    state
        .register_vehicle(Vehicle::new("DRONE_2", VehicleKind::Drone, Position::ground(39.9, 116.4)).with_battery(90.0))
        .unwrap();

    let mut warned = HashSet::new();
    monitor_loop::sweep(&state, &mut warned);
    assert_eq!(warned, HashSet::from(["DRONE_1".to_string()]));

    monitor_loop::sweep(&state, &mut warned);
    assert_eq!(warned.len(), 1);
}
