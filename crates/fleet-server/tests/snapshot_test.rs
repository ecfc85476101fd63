//! Snapshot persistence round trips through both storage backends.

use std::collections::HashSet;
use std::path::PathBuf;

use fleet_core::flight::tracks_conflict;
use fleet_core::{
    DeliveryPoint, DeliveryPointKind, NewTask, Position, RoutePlan, RouteStatus, TaskStatus, Vehicle, VehicleKind,
    VehicleStatus, World,
};
use fleet_server::config::{Config, SnapshotBackend};
use fleet_server::persistence::SnapshotStore;
use fleet_server::state::Orchestrator;

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("fleet-snapshot-{}", uuid::Uuid::new_v4()))
}

fn config(backend: SnapshotBackend, path: PathBuf) -> Config {
    let mut config = Config::default();
    config.snapshot_backend = backend;
    config.snapshot_path = path;
    config.max_snapshot_files = 2;
    config.planner.rrt_seed = Some(5);
    config
}

fn populated(config: Config) -> Orchestrator {
    let (state, _rx) = Orchestrator::new(config, World::default());
    state
        .register_point(DeliveryPoint::new("P1", DeliveryPointKind::Pickup, Position::ground(39.9, 116.40)))
        .unwrap();
    state
        .register_point(DeliveryPoint::new("D1", DeliveryPointKind::Delivery, Position::ground(39.9, 116.41)))
        .unwrap();
    state
        .register_vehicle(Vehicle::new("CAR_1", VehicleKind::Car, Position::ground(39.9, 116.40)))
        .unwrap();
    state
        .create_task(NewTask {
            pickup_point: "P1".into(),
            delivery_point: "D1".into(),
            weight_kg: 3.0,
            ..NewTask::default()
        })
        .unwrap();
    state
}

async fn round_trip(config: Config) {
    let original = populated(config.clone());
    let snapshot = original.snapshot();

    let store = SnapshotStore::open(&config).await.unwrap().expect("backend enabled");
    store.save(&snapshot).await.unwrap();
    let loaded = store.load().await.unwrap().expect("snapshot stored");
    assert_eq!(loaded, snapshot);

    let (restored, _rx) = Orchestrator::new(config, World::default());
    assert_eq!(restored.restore(loaded).unwrap(), 1);
    assert_eq!(restored.list_tasks(), original.list_tasks());
    assert_eq!(restored.list_vehicles(), original.list_vehicles());
    assert_eq!(restored.list_points(), original.list_points());
    assert_eq!(restored.queued_tasks(), 1);

    // Generated ids continue past the restored ones.
    let next = restored
        .create_task(NewTask {
            pickup_point: "P1".into(),
            delivery_point: "D1".into(),
            weight_kg: 1.0,
            ..NewTask::default()
        })
        .unwrap();
    assert_eq!(next.id, "TASK-000002");
    assert_eq!(next.status, TaskStatus::Pending);

    // A populated orchestrator refuses a second restore.
    assert!(restored.restore(snapshot).is_err());
}

#[tokio::test]
async fn file_snapshot_round_trip() {
    let dir = scratch_dir();
    round_trip(config(SnapshotBackend::File, dir.join("fleet_state.json"))).await;
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn sqlite_snapshot_round_trip() {
    let dir = scratch_dir();
    round_trip(config(SnapshotBackend::Sqlite, dir.join("fleet.db"))).await;
    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn disabled_backend_opens_nothing() {
    let config = config(SnapshotBackend::Disabled, scratch_dir().join("unused.json"));
    assert!(SnapshotStore::open(&config).await.unwrap().is_none());
}

fn air_drone(id: &str) -> Vehicle {
    Vehicle::new(id, VehicleKind::Drone, Position::ground(39.9, 116.40))
        .with_battery(95.0)
        .with_max_payload(5.0)
        .with_capabilities(["air_delivery"])
}

fn air_task() -> NewTask {
    let mut task = NewTask {
        pickup_point: "P1".into(),
        delivery_point: "D1".into(),
        weight_kg: 1.0,
        ..NewTask::default()
    };
    task.required_capabilities.insert("air_delivery".into());
    task
}

/// Orchestrator with DRONE_1 airborne on the first task.
async fn airborne(config: Config) -> (Orchestrator, String, RoutePlan) {
    let (state, _rx) = Orchestrator::new(config, World::default());
    state
        .register_point(DeliveryPoint::new("P1", DeliveryPointKind::Pickup, Position::ground(39.9, 116.40)))
        .unwrap();
    state
        .register_point(DeliveryPoint::new("D1", DeliveryPointKind::Delivery, Position::ground(39.9, 116.41)))
        .unwrap();
    state.register_vehicle(air_drone("DRONE_1")).unwrap();
    let task = state.create_task(air_task()).unwrap();

    let report = state.tick().await;
    assert_eq!(report.assigned.len(), 1);
    let routes = state.active_routes();
    assert_eq!(routes.len(), 1);
    let route = routes[0].clone();
    (state, task.id, route)
}

fn assert_live_routes_separated(state: &Orchestrator) {
    let routes = state.active_routes();
    let ids: HashSet<&str> = routes.iter().map(|route| route.id.as_str()).collect();
    assert_eq!(ids.len(), routes.len(), "live route ids must be unique");

    let flight = &state.config().flight;
    for (i, a) in routes.iter().enumerate() {
        for b in &routes[i + 1..] {
            assert!(
                !tracks_conflict(&a.waypoints, &b.waypoints, flight.min_separation_m, flight.vertical_separation_m),
                "{} conflicts with {}",
                a.id,
                b.id
            );
        }
    }
}

#[tokio::test]
async fn restore_mid_flight_keeps_airspace_reserved() {
    let dir = scratch_dir();
    let config = config(SnapshotBackend::File, dir.join("fleet_state.json"));
    let (original, first_task, first_route) = airborne(config.clone()).await;

    let store = SnapshotStore::open(&config).await.unwrap().expect("backend enabled");
    store.save(&original.snapshot()).await.unwrap();
    let loaded = store.load().await.unwrap().expect("snapshot stored");
    assert_eq!(loaded.routes.len(), 1);

    let (restored, _rx) = Orchestrator::new(config, World::default());
    assert_eq!(restored.restore(loaded).unwrap(), 0);
    let reinstated = restored.active_routes();
    assert_eq!(reinstated.len(), 1);
    assert_eq!(reinstated[0].id, first_route.id);
    assert_eq!(reinstated[0].altitude_m, first_route.altitude_m);
    assert_eq!(restored.get_vehicle("DRONE_1").unwrap().status, VehicleStatus::Busy);

    // A second drone takes off on the same corridor after the restart.
    restored.register_vehicle(air_drone("DRONE_2")).unwrap();
    let second_task = restored.create_task(air_task()).unwrap();
    let report = restored.tick().await;
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].vehicle_id, "DRONE_2");

    let second_route_id = restored.get_task(&second_task.id).unwrap().route_ids.values().next().cloned().unwrap();
    assert_ne!(second_route_id, first_route.id);
    assert_eq!(restored.active_routes().len(), 2);
    assert_live_routes_separated(&restored);

    // Closing the restored task only touches its own route.
    restored.cancel_task(&first_task).unwrap();
    assert_eq!(restored.get_route(&first_route.id).map(|r| r.status), Some(RouteStatus::Aborted));
    let live: Vec<String> = restored.active_routes().into_iter().map(|route| route.id).collect();
    assert_eq!(live, vec![second_route_id]);
    assert_eq!(restored.get_vehicle("DRONE_2").unwrap().status, VehicleStatus::Busy);

    std::fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn restore_releases_stage_whose_route_is_missing() {
    let config = config(SnapshotBackend::Disabled, scratch_dir().join("unused.json"));
    let (original, task_id, old_route) = airborne(config.clone()).await;

    let mut snapshot = original.snapshot();
    snapshot.routes.clear();

    let (restored, _rx) = Orchestrator::new(config, World::default());
    assert_eq!(restored.restore(snapshot).unwrap(), 1);

    let task = restored.get_task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.assigned_vehicles.is_empty());
    assert!(task.route_ids.is_empty());
    let drone = restored.get_vehicle("DRONE_1").unwrap();
    assert_eq!(drone.status, VehicleStatus::Idle);
    assert!(drone.current_task.is_none());
    assert!(restored.active_routes().is_empty());

    // Reassignment gets fresh airspace under an id that was never handed out.
    let report = restored.tick().await;
    assert_eq!(report.assigned.len(), 1);
    let routes = restored.active_routes();
    assert_eq!(routes.len(), 1);
    assert_ne!(routes[0].id, old_route.id);
}
