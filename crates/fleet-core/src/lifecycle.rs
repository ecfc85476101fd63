//! Task stage sequence and status transitions.
//!
//! Ground-only tasks run a single `Delivery` stage served by any vehicle.
//! Hybrid tasks (those carrying a drone station) run `Pickup` by car to the
//! origin hub, `Transfer` by drone to the landing hub, then `Delivery` by car.

use crate::error::{EntityKind, FleetError, FleetResult};
use crate::models::{Position, Stage, Task, TaskStatus, VehicleKind};

const GROUND_STAGES: &[Stage] = &[Stage::Delivery];
const HYBRID_STAGES: &[Stage] = &[Stage::Pickup, Stage::Transfer, Stage::Delivery];

pub fn stages(task: &Task) -> &'static [Stage] {
    if task.is_hybrid() {
        HYBRID_STAGES
    } else {
        GROUND_STAGES
    }
}

/// Vehicle kind a stage demands; `None` means any kind.
pub fn required_kind(task: &Task, stage: Stage) -> Option<VehicleKind> {
    if !task.is_hybrid() {
        return None;
    }
    match stage {
        Stage::Pickup | Stage::Delivery => Some(VehicleKind::Car),
        Stage::Transfer => Some(VehicleKind::Drone),
    }
}

/// The stage waiting for a vehicle, if any.
pub fn next_stage(task: &Task) -> Option<Stage> {
    let stage = match (task.status, task.is_hybrid()) {
        (TaskStatus::Pending, _) => stages(task).first().copied(),
        (TaskStatus::PickupComplete, true) => Some(Stage::Transfer),
        (TaskStatus::TransferComplete, true) => Some(Stage::Delivery),
        _ => None,
    }?;
    let taken = task.assigned_vehicles.contains_key(&stage) || task.completed_stages.contains_key(&stage);
    (!taken).then_some(stage)
}

/// Status a task sits in while `stage` waits for a vehicle.
pub fn waiting_status(task: &Task, stage: Stage) -> TaskStatus {
    match (stage, task.is_hybrid()) {
        (Stage::Transfer, true) => TaskStatus::PickupComplete,
        (Stage::Delivery, true) => TaskStatus::TransferComplete,
        _ => TaskStatus::Pending,
    }
}

/// Status a task enters once `stage` has a vehicle.
pub fn assigned_status(task: &Task, stage: Stage) -> TaskStatus {
    match (stage, task.is_hybrid()) {
        (Stage::Transfer, true) => TaskStatus::TransferStarted,
        (Stage::Delivery, true) => TaskStatus::DeliveryStarted,
        _ => TaskStatus::Assigned,
    }
}

/// Whether a controller may report `to` for this task.
pub fn can_report(task: &Task, to: TaskStatus) -> bool {
    use TaskStatus::*;

    if task.status.is_terminal() {
        return false;
    }
    if matches!(to, Failed | Cancelled) {
        return true;
    }
    match (task.status, to) {
        (Assigned, PickupReached) | (PickupReached, PickupComplete) => true,
        (PickupComplete, DeliveryStarted) => !task.is_hybrid(),
        (TransferStarted, TransferComplete) => task.is_hybrid(),
        (DeliveryStarted, Completed) => true,
        _ => false,
    }
}

/// Stage finished by moving into `to`.
pub fn completed_stage(task: &Task, to: TaskStatus) -> Option<Stage> {
    match (to, task.is_hybrid()) {
        (TaskStatus::PickupComplete, true) => Some(Stage::Pickup),
        (TaskStatus::TransferComplete, true) => Some(Stage::Transfer),
        (TaskStatus::Completed, _) => Some(Stage::Delivery),
        _ => None,
    }
}

pub fn check_transition(task: &Task, to: TaskStatus) -> FleetResult<()> {
    if can_report(task, to) {
        Ok(())
    } else {
        Err(FleetError::InvalidTransition { id: task.id.clone(), from: task.status, to })
    }
}

/// Start and end of one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLeg {
    pub stage: Stage,
    pub start: Position,
    pub end: Position,
}

/// Resolve a stage's endpoints through a point lookup.
pub fn stage_leg<F>(task: &Task, stage: Stage, lookup: F) -> FleetResult<StageLeg>
where
    F: Fn(&str) -> Option<Position>,
{
    let resolve = |id: &str| lookup(id).ok_or_else(|| FleetError::not_found(EntityKind::DeliveryPoint, id));
    let hub = |id: &Option<String>| -> FleetResult<Position> {
        match id {
            Some(id) => resolve(id),
            None => Err(FleetError::Invalid(format!("task {} has no drone station", task.id))),
        }
    };

    let (start, end) = match (stage, task.is_hybrid()) {
        (Stage::Delivery, false) => (resolve(&task.pickup_point)?, resolve(&task.delivery_point)?),
        (Stage::Pickup, _) => (resolve(&task.pickup_point)?, hub(&task.drone_station)?),
        (Stage::Transfer, _) => {
            let origin = hub(&task.drone_station)?;
            let landing = match &task.landing_station {
                Some(id) => resolve(id)?,
                None => resolve(&task.delivery_point)?,
            };
            (origin, landing)
        }
        (Stage::Delivery, true) => {
            let landing = match &task.landing_station {
                Some(id) => resolve(id)?,
                None => hub(&task.drone_station)?,
            };
            (landing, resolve(&task.delivery_point)?)
        }
    };
    Ok(StageLeg { stage, start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(hybrid: bool) -> Task {
        Task {
            id: "T1".into(),
            priority: Default::default(),
            pickup_point: "P".into(),
            delivery_point: "D".into(),
            drone_station: hybrid.then(|| "S1".to_string()),
            landing_station: hybrid.then(|| "S2".to_string()),
            weight_kg: 1.0,
            required_capabilities: Default::default(),
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
    fn ground_task_has_single_any_kind_stage() {
        let t = task(false);
        assert_eq!(stages(&t), &[Stage::Delivery]);
        assert_eq!(required_kind(&t, Stage::Delivery), None);
        assert_eq!(next_stage(&t), Some(Stage::Delivery));
    }

    #[test]
    fn hybrid_task_walks_three_stages() {
        let mut t = task(true);
        assert_eq!(next_stage(&t), Some(Stage::Pickup));
        assert_eq!(required_kind(&t, Stage::Transfer), Some(VehicleKind::Drone));

        t.status = assigned_status(&t, Stage::Pickup);
        t.assigned_vehicles.insert(Stage::Pickup, "CAR_1".into());
        assert_eq!(t.status, TaskStatus::Assigned);
        assert_eq!(next_stage(&t), None);

        t.status = TaskStatus::PickupComplete;
        t.assigned_vehicles.remove(&Stage::Pickup);
        t.completed_stages.insert(Stage::Pickup, "CAR_1".into());
        assert_eq!(next_stage(&t), Some(Stage::Transfer));
        assert_eq!(assigned_status(&t, Stage::Transfer), TaskStatus::TransferStarted);

        t.status = TaskStatus::TransferComplete;
        assert_eq!(next_stage(&t), Some(Stage::Delivery));
        assert_eq!(waiting_status(&t, Stage::Delivery), TaskStatus::TransferComplete);
    }

    #[test]
    fn ground_task_skips_transfer_statuses() {
        let mut t = task(false);
        t.status = TaskStatus::PickupComplete;
        assert!(can_report(&t, TaskStatus::DeliveryStarted));
        assert!(!can_report(&t, TaskStatus::TransferStarted));
        assert_eq!(next_stage(&t), None);
    }

    #[test]
    fn terminal_tasks_reject_reports() {
        let mut t = task(false);
        t.status = TaskStatus::Completed;
        assert!(!can_report(&t, TaskStatus::Failed));
        assert!(check_transition(&t, TaskStatus::Cancelled).is_err());
    }

    #[test]
    fn hybrid_legs_chain_through_hubs() {
        let t = task(true);
        let lookup = |id: &str| match id {
            "P" => Some(Position::ground(1.0, 1.0)),
            "S1" => Some(Position::ground(2.0, 2.0)),
            "S2" => Some(Position::ground(3.0, 3.0)),
            "D" => Some(Position::ground(4.0, 4.0)),
            _ => None,
        };
        let transfer = stage_leg(&t, Stage::Transfer, lookup).expect("transfer leg");
        assert_eq!(transfer.start.lat, 2.0);
        assert_eq!(transfer.end.lat, 3.0);
        let last = stage_leg(&t, Stage::Delivery, lookup).expect("delivery leg");
        assert_eq!(last.start.lat, 3.0);
        assert_eq!(last.end.lat, 4.0);
    }

    #[test]
    fn missing_point_is_not_found() {
        let t = task(false);
        let err = stage_leg(&t, Stage::Delivery, |_| None).unwrap_err();
        assert!(matches!(err, FleetError::NotFound { kind: EntityKind::DeliveryPoint, .. }));
    }
}
