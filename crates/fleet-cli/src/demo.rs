//! Demo fleet laid out around a center point.
//!
//! Two cars and two drones, a pickup and a delivery point 1.2km apart, and
//! one drone station next to each so hybrid tasks have somewhere to hand off.

use fleet_core::{DeliveryPoint, DeliveryPointKind, NewTask, Position, TaskPriority, Vehicle, VehicleKind};

/// ~100m in degrees of latitude
const STEP_DEG: f64 = 0.0009;

pub struct DemoFleet {
    pub points: Vec<DeliveryPoint>,
    pub vehicles: Vec<Vehicle>,
}

fn at(center_lat: f64, center_lon: f64, north_steps: f64, east_steps: f64) -> Position {
    Position::ground(center_lat + north_steps * STEP_DEG, center_lon + east_steps * STEP_DEG)
}

pub fn demo_fleet(center_lat: f64, center_lon: f64) -> DemoFleet {
    let point = |id: &str, kind, east| DeliveryPoint::new(id, kind, at(center_lat, center_lon, 0.0, east));
    let points = vec![
        point("PICKUP_A", DeliveryPointKind::Pickup, -6.0),
        point("STATION_WEST", DeliveryPointKind::DroneStation, -4.0),
        point("STATION_EAST", DeliveryPointKind::DroneStation, 4.0),
        point("DROPOFF_B", DeliveryPointKind::Delivery, 6.0),
    ];

    let vehicles = vec![
        Vehicle::new("CAR_1", VehicleKind::Car, at(center_lat, center_lon, 1.0, -6.0))
            .with_battery(80.0)
            .with_max_payload(20.0),
        Vehicle::new("CAR_2", VehicleKind::Car, at(center_lat, center_lon, 1.0, 5.0))
            .with_battery(75.0)
            .with_max_payload(20.0),
        Vehicle::new("DRONE_1", VehicleKind::Drone, at(center_lat, center_lon, 0.0, -4.0))
            .with_battery(90.0)
            .with_max_payload(5.0)
            .with_capabilities(["air_delivery"]),
        Vehicle::new("DRONE_2", VehicleKind::Drone, at(center_lat, center_lon, 0.0, 4.0))
            .with_battery(95.0)
            .with_max_payload(5.0)
            .with_capabilities(["air_delivery"]),
    ];

    DemoFleet { points, vehicles }
}

/// One ground delivery and one hybrid delivery between the demo points.
pub fn demo_tasks() -> Vec<NewTask> {
    vec![
        NewTask {
            pickup_point: "PICKUP_A".into(),
            delivery_point: "DROPOFF_B".into(),
            weight_kg: 4.0,
            ..NewTask::default()
        },
        NewTask {
            priority: TaskPriority::High,
            pickup_point: "PICKUP_A".into(),
            delivery_point: "DROPOFF_B".into(),
            drone_station: Some("STATION_WEST".into()),
            weight_kg: 1.5,
            ..NewTask::default()
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn demo_ids_are_unique() {
        let fleet = demo_fleet(39.9, 116.4);
        let points: HashSet<_> = fleet.points.iter().map(|p| p.id.as_str()).collect();
        let vehicles: HashSet<_> = fleet.vehicles.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(points.len(), fleet.points.len());
        assert_eq!(vehicles.len(), fleet.vehicles.len());
    }

    #[test]
    fn demo_tasks_reference_demo_points() {
        let fleet = demo_fleet(39.9, 116.4);
        let ids: HashSet<_> = fleet.points.iter().map(|p| p.id.clone()).collect();
        for task in demo_tasks() {
            assert!(ids.contains(&task.pickup_point));
            assert!(ids.contains(&task.delivery_point));
            if let Some(station) = &task.drone_station {
                assert!(ids.contains(station));
            }
        }
    }
}
