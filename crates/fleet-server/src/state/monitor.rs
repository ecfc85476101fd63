//! Health sweeps run by the monitor loop.

use super::store::Orchestrator;
use chrono::{DateTime, Duration, Utc};
use fleet_core::{FleetError, VehicleStatus};

impl Orchestrator {
    /// Mark vehicles silent for longer than the timeout as `Offline`,
    /// handing back any stage they were serving.
    pub fn mark_stale_vehicles(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = Duration::seconds(self.config.scheduler.vehicle_timeout_secs as i64);
        let stale: Vec<String> = self
            .vehicles
            .iter()
            .filter(|vehicle| vehicle.status != VehicleStatus::Offline && now - vehicle.last_update > timeout)
            .map(|vehicle| vehicle.id.clone())
            .collect();

        for vehicle_id in &stale {
            let released = {
                let Some(mut vehicle) = self.vehicles.get_mut(vehicle_id) else {
                    continue;
                };
                vehicle.status = VehicleStatus::Offline;
                vehicle.current_task.take()
            };
            tracing::warn!("Vehicle {} timed out; marked offline", vehicle_id);
            if let Some(task_id) = released {
                self.requeue_stage(&task_id, vehicle_id);
            }
            self.lock_flights().abort_for_vehicle(vehicle_id);
        }
        stale
    }

    /// Fail every open task whose deadline has passed.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<String> {
        let overdue: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| !task.status.is_terminal() && task.deadline.is_some_and(|deadline| deadline < now))
            .map(|task| task.id.clone())
            .collect();

        overdue
            .into_iter()
            .filter(|task_id| {
                let reason = FleetError::DeadlineMissed(task_id.clone()).to_string();
                self.fail_task(task_id, reason).is_ok()
            })
            .collect()
    }

    /// Promote routes whose departure time has come.
    pub fn activate_due_routes(&self, now: DateTime<Utc>) -> Vec<String> {
        self.lock_flights().activate_due(now)
    }

    /// Forget archived routes older than the retention window.
    pub fn prune_routes(&self, now: DateTime<Utc>) -> usize {
        let retention = Duration::from_std(self.config.route_archive_retention).unwrap_or(Duration::hours(1));
        self.lock_flights().prune_archive(now - retention)
    }

    /// Vehicles at or below the warning threshold that are still in service.
    pub fn low_battery_vehicles(&self) -> Vec<(String, f64)> {
        let threshold = self.config.scheduler.low_battery_threshold;
        let mut low: Vec<(String, f64)> = self
            .vehicles
            .iter()
            .filter(|vehicle| {
                vehicle.battery_pct <= threshold
                    && !matches!(vehicle.status, VehicleStatus::Charging | VehicleStatus::Offline)
            })
            .map(|vehicle| (vehicle.id.clone(), vehicle.battery_pct))
            .collect();
        low.sort_by(|a, b| a.0.cmp(&b.0));
        low
    }
}
