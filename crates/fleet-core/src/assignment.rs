//! Cost-based vehicle selection for a single task stage.

use crate::config::SchedulerConfig;
use crate::error::{FleetError, FleetResult};
use crate::lifecycle::{self, StageLeg};
use crate::models::{Task, Vehicle, VehicleStatus};
use crate::spatial::ground_distance;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Cost breakdown for one candidate vehicle.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateCost {
    pub vehicle_id: String,
    pub distance_cost: f64,
    pub battery_cost: f64,
    pub time_cost: f64,
    pub payload_cost: f64,
    pub total: f64,
    pub projected_completion: DateTime<Utc>,
    pub projected_energy_pct: f64,
}

/// Hard filter applied before any cost is computed.
pub fn is_eligible(vehicle: &Vehicle, task: &Task, leg: &StageLeg, config: &SchedulerConfig) -> bool {
    if vehicle.status != VehicleStatus::Idle || vehicle.current_task.is_some() {
        return false;
    }
    if vehicle.battery_pct <= config.min_battery_level {
        return false;
    }
    if vehicle.current_payload_kg + task.weight_kg > vehicle.max_payload_kg {
        return false;
    }
    if !task.required_capabilities.is_subset(&vehicle.capabilities) {
        return false;
    }
    match lifecycle::required_kind(task, leg.stage) {
        Some(kind) => vehicle.kind == kind,
        None => true,
    }
}

/// Cost of serving `leg` with `vehicle`, or `None` when the cost is infinite.
pub fn evaluate(
    vehicle: &Vehicle,
    task: &Task,
    leg: &StageLeg,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> Option<CandidateCost> {
    let load = vehicle.current_payload_kg + task.weight_kg;
    if vehicle.max_payload_kg <= 0.0 || load > vehicle.max_payload_kg {
        return None;
    }

    let profile = config.profile(vehicle.kind);
    let approach_m = ground_distance(&vehicle.position, &leg.start);
    let leg_m = ground_distance(&leg.start, &leg.end);
    let travel_s = (approach_m + leg_m) / profile.cruise_speed_mps.max(0.1) + profile.handling_overhead_s;

    let energy_pct = travel_s / 60.0 * profile.battery_pct_per_min;
    if energy_pct > vehicle.battery_pct {
        return None;
    }

    let projected_completion = now + Duration::milliseconds((travel_s * 1000.0) as i64);
    let time_cost = match task.deadline {
        Some(deadline) => {
            if projected_completion > deadline {
                return None;
            }
            let remaining_s = (deadline - now).num_milliseconds() as f64 / 1000.0;
            (1.0 - remaining_s / 3600.0).max(0.0)
        }
        None => 0.0,
    };

    let factors = &vehicle.cost_factors;
    let distance_cost = approach_m / 1000.0 * factors.distance;
    let battery_cost = (100.0 - vehicle.battery_pct) / 100.0 * factors.energy;
    let time_cost = time_cost * factors.time;
    let payload_cost = load / vehicle.max_payload_kg * factors.payload;

    Some(CandidateCost {
        vehicle_id: vehicle.id.clone(),
        distance_cost,
        battery_cost,
        time_cost,
        payload_cost,
        total: distance_cost + battery_cost + time_cost + payload_cost,
        projected_completion,
        projected_energy_pct: energy_pct,
    })
}

/// Pick the cheapest eligible vehicle; ties go to the lowest id.
pub fn select_vehicle<'a, I>(
    vehicles: I,
    task: &Task,
    leg: &StageLeg,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> FleetResult<CandidateCost>
where
    I: IntoIterator<Item = &'a Vehicle>,
{
    vehicles
        .into_iter()
        .filter(|vehicle| is_eligible(vehicle, task, leg, config))
        .filter_map(|vehicle| evaluate(vehicle, task, leg, config, now))
        .min_by(|a, b| match a.total.total_cmp(&b.total) {
            Ordering::Equal => a.vehicle_id.cmp(&b.vehicle_id),
            other => other,
        })
        .ok_or_else(|| FleetError::Infeasible(task.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, Stage, TaskStatus, VehicleKind};

    fn leg() -> StageLeg {
        StageLeg {
            stage: Stage::Delivery,
            start: Position::ground(39.9000, 116.4000),
            end: Position::ground(39.9100, 116.4100),
        }
    }

    fn task(weight: f64, caps: &[&str]) -> Task {
        Task {
            id: "T1".into(),
            priority: Default::default(),
            pickup_point: "P".into(),
            delivery_point: "D".into(),
            drone_station: None,
            landing_station: None,
            weight_kg: weight,
            required_capabilities: caps.iter().map(|c| c.to_string()).collect(),
            deadline: None,
            status: TaskStatus::Pending,
            assigned_vehicles: Default::default(),
            completed_stages: Default::default(),
            route_ids: Default::default(),
            created_at: Utc::now(),
            completion_time: None,
            retry_count: 0,
            failure_reason: None,
        }
    }

    #[test]
    fn capability_filter_selects_drone() {
        let config = SchedulerConfig::default();
        let car = Vehicle::new("CAR_1", VehicleKind::Car, Position::ground(39.9, 116.4))
            .with_battery(80.0)
            .with_max_payload(20.0)
            .with_capabilities(["ground_delivery"]);
        let drone = Vehicle::new("DRONE_1", VehicleKind::Drone, Position::ground(39.9, 116.4))
            .with_battery(90.0)
            .with_max_payload(5.0)
            .with_capabilities(["air_delivery"]);

        let chosen = select_vehicle([&car, &drone], &task(2.0, &["air_delivery"]), &leg(), &config, Utc::now())
            .expect("drone should qualify");
        assert_eq!(chosen.vehicle_id, "DRONE_1");
    }

    #[test]
    fn low_battery_and_overweight_are_filtered() {
        let config = SchedulerConfig::default();
        let flat = Vehicle::new("A", VehicleKind::Car, Position::ground(39.9, 116.4)).with_battery(15.0);
        let small = Vehicle::new("B", VehicleKind::Drone, Position::ground(39.9, 116.4)).with_max_payload(1.0);
        let err = select_vehicle([&flat, &small], &task(2.0, &[]), &leg(), &config, Utc::now()).unwrap_err();
        assert_eq!(err, FleetError::Infeasible("T1".into()));
    }

    #[test]
    fn ties_break_on_lowest_id() {
        let config = SchedulerConfig::default();
        let b = Vehicle::new("CAR_B", VehicleKind::Car, Position::ground(39.9, 116.4));
        let a = Vehicle::new("CAR_A", VehicleKind::Car, Position::ground(39.9, 116.4));
        let chosen = select_vehicle([&b, &a], &task(1.0, &[]), &leg(), &config, Utc::now()).unwrap();
        assert_eq!(chosen.vehicle_id, "CAR_A");
    }

    #[test]
    fn closer_vehicle_wins() {
        let config = SchedulerConfig::default();
        let near = Vehicle::new("Z_NEAR", VehicleKind::Car, Position::ground(39.9001, 116.4));
        let far = Vehicle::new("A_FAR", VehicleKind::Car, Position::ground(39.95, 116.45));
        let chosen = select_vehicle([&far, &near], &task(1.0, &[]), &leg(), &config, Utc::now()).unwrap();
        assert_eq!(chosen.vehicle_id, "Z_NEAR");
    }

    #[test]
    fn unreachable_deadline_is_infinite_cost() {
        let config = SchedulerConfig::default();
        let now = Utc::now();
        let car = Vehicle::new("CAR_1", VehicleKind::Car, Position::ground(39.9, 116.4));
        let mut t = task(1.0, &[]);
        // The leg alone is ~1.4km; at 8 m/s that cannot finish in 10s.
        t.deadline = Some(now + Duration::seconds(10));
        assert!(evaluate(&car, &t, &leg(), &config, now).is_none());

        t.deadline = Some(now + Duration::minutes(30));
        let cost = evaluate(&car, &t, &leg(), &config, now).unwrap();
        assert!((cost.time_cost - 0.5).abs() < 1e-3, "got {}", cost.time_cost);
    }

    #[test]
    fn energy_above_battery_is_infinite_cost() {
        let config = SchedulerConfig::default();
        let drone = Vehicle::new("D", VehicleKind::Drone, Position::ground(40.5, 117.0)).with_battery(16.0);
        assert!(evaluate(&drone, &task(1.0, &[]), &leg(), &config, Utc::now()).is_none());
    }

    #[test]
    fn hybrid_stage_requires_matching_kind() {
        let config = SchedulerConfig::default();
        let mut t = task(1.0, &[]);
        t.drone_station = Some("S".into());
        let transfer = StageLeg { stage: Stage::Transfer, ..leg() };
        let car = Vehicle::new("CAR_1", VehicleKind::Car, Position::ground(39.9, 116.4));
        assert!(!is_eligible(&car, &t, &transfer, &config));
        let drone = Vehicle::new("DRONE_1", VehicleKind::Drone, Position::ground(39.9, 116.4));
        assert!(is_eligible(&drone, &t, &transfer, &config));
    }
}
