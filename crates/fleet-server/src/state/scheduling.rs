//! The scheduling tick: queue pop, vehicle selection, planning, commit.

use super::store::Orchestrator;
use chrono::{DateTime, Utc};
use fleet_core::{
    assignment, lifecycle, FleetError, FleetResult, RouteRequest, RouteStatus, Separation, Stage,
    VehicleCommand, VehicleKind, VehicleStatus,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub task_id: String,
    pub stage: Stage,
    pub vehicle_id: String,
    pub route_id: Option<String>,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub attempted: usize,
    pub assigned: Vec<Assignment>,
    /// Tasks put back after a recoverable failure
    pub requeued: Vec<String>,
    pub failed: Vec<String>,
    /// The concurrency cap stopped the tick early
    pub throttled: bool,
}

enum Attempt {
    Assigned(Assignment),
    /// The task no longer waits for a vehicle
    Stale,
    /// Vehicle or task changed between selection and commit
    Raced,
}

enum Retry {
    Requeued,
    Failed,
}

impl Orchestrator {
    /// Run one scheduling pass.
    ///
    /// Each popped task is attempted once; anything that has to wait is
    /// queued again after the pass so it cannot spin within one tick.
    pub async fn tick(&self) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        let now = Utc::now();
        let scheduler = &self.config.scheduler;
        let mut report = TickReport::default();
        let mut serving = self.serving_count();
        let mut deferred = Vec::new();

        for _ in 0..scheduler.batch_size {
            if serving >= scheduler.max_concurrent_tasks {
                report.throttled = true;
                break;
            }
            let next = self.lock_queue().pop();
            let Some(task_id) = next else {
                break;
            };
            report.attempted += 1;

            match self.try_assign(&task_id, now).await {
                Ok(Attempt::Assigned(assignment)) => {
                    serving += 1;
                    report.assigned.push(assignment);
                }
                Ok(Attempt::Stale) => {}
                Ok(Attempt::Raced) => deferred.push(task_id),
                Err(err) if err.is_recoverable() => match self.retry_or_fail(&task_id, &err) {
                    Retry::Requeued => {
                        tracing::debug!("Task {} waiting: {}", task_id, err);
                        deferred.push(task_id.clone());
                        report.requeued.push(task_id);
                    }
                    Retry::Failed => report.failed.push(task_id),
                },
                Err(err) => {
                    if let Err(close_err) = self.fail_task(&task_id, err.to_string()) {
                        tracing::debug!("Task {} already closed: {}", task_id, close_err);
                    }
                    report.failed.push(task_id);
                }
            }
        }

        for task_id in deferred {
            self.requeue(&task_id);
        }
        if !report.assigned.is_empty() || !report.failed.is_empty() {
            tracing::info!(
                "Tick: {} attempted, {} assigned, {} requeued, {} failed",
                report.attempted,
                report.assigned.len(),
                report.requeued.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Tasks currently holding at least one vehicle.
    fn serving_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.status.is_terminal() && !task.assigned_vehicles.is_empty())
            .count()
    }

    fn retry_or_fail(&self, task_id: &str, cause: &FleetError) -> Retry {
        let exhausted = {
            let Some(mut task) = self.tasks.get_mut(task_id) else {
                return Retry::Failed;
            };
            task.retry_count += 1;
            task.retry_count > self.config.scheduler.task_retry_limit
        };
        if !exhausted {
            return Retry::Requeued;
        }

        let reason = format!("{}: {}", FleetError::RetryLimitExceeded(task_id.to_string()), cause);
        if let Err(err) = self.fail_task(task_id, reason) {
            tracing::debug!("Task {} already closed: {}", task_id, err);
        }
        Retry::Failed
    }

    async fn try_assign(&self, task_id: &str, now: DateTime<Utc>) -> FleetResult<Attempt> {
        let Some(task) = self.tasks.get(task_id).map(|task| task.clone()) else {
            return Ok(Attempt::Stale);
        };
        if task.status.is_terminal() {
            return Ok(Attempt::Stale);
        }
        let Some(stage) = lifecycle::next_stage(&task) else {
            return Ok(Attempt::Stale);
        };
        let leg = lifecycle::stage_leg(&task, stage, |id| self.points.get(id).map(|point| point.position))?;

        let fleet: Vec<_> = self.vehicles.iter().map(|entry| entry.value().clone()).collect();
        let candidate = assignment::select_vehicle(&fleet, &task, &leg, &self.config.scheduler, now)?;
        let Some(vehicle) = fleet.iter().find(|vehicle| vehicle.id == candidate.vehicle_id) else {
            return Ok(Attempt::Raced);
        };

        let separation = Separation::from(&self.config.flight);
        let active = Arc::new(self.active_routes());
        let path = self
            .planner
            .plan_stage(vehicle.kind, vehicle.position, leg.start, leg.end, active, separation)
            .await?;

        let route = match vehicle.kind {
            VehicleKind::Drone => {
                let world = self.planner.world();
                let request = RouteRequest {
                    vehicle_id: vehicle.id.clone(),
                    task_id: Some(task.id.clone()),
                    waypoints: path.waypoints.clone(),
                    start_time: now,
                    priority: task.priority,
                };
                Some(self.lock_flights().allocate(request, world.obstacles())?)
            }
            VehicleKind::Car => None,
        };
        let route_id = route.as_ref().map(|route| route.id.clone());

        // Commit: the vehicle first, under its own entry lock.
        {
            let Some(mut current) = self.vehicles.get_mut(&vehicle.id) else {
                if let Some(route_id) = &route_id {
                    self.close_route(route_id, RouteStatus::Aborted);
                }
                return Ok(Attempt::Raced);
            };
            if !assignment::is_eligible(&current, &task, &leg, &self.config.scheduler) {
                drop(current);
                if let Some(route_id) = &route_id {
                    self.close_route(route_id, RouteStatus::Aborted);
                }
                return Ok(Attempt::Raced);
            }
            current.status = VehicleStatus::Busy;
            current.current_task = Some(task.id.clone());
        }

        let committed = match self.tasks.get_mut(&task.id) {
            Some(mut current) if current.status == task.status && lifecycle::next_stage(&current) == Some(stage) => {
                current.assigned_vehicles.insert(stage, vehicle.id.clone());
                if let Some(route_id) = &route_id {
                    current.route_ids.insert(stage, route_id.clone());
                }
                current.status = lifecycle::assigned_status(&current, stage);
                true
            }
            _ => false,
        };
        if !committed {
            self.release_vehicle(&vehicle.id, &task.id, None);
            if let Some(route_id) = &route_id {
                self.close_route(route_id, RouteStatus::Aborted);
            }
            return Ok(Attempt::Stale);
        }

        let waypoints = match route {
            Some(route) => route.waypoints,
            None => path.waypoints,
        };
        let command = VehicleCommand {
            command_id: Uuid::new_v4().to_string(),
            vehicle_id: vehicle.id.clone(),
            task_id: task.id.clone(),
            stage,
            waypoints,
            route_id: route_id.clone(),
            issued_at: now,
        };
        if let Err(err) = self.commands.try_send(command) {
            tracing::error!("Command channel rejected {} for {}: {}", stage, task.id, err);
            self.release_vehicle(&vehicle.id, &task.id, None);
            self.requeue_stage(&task.id, &vehicle.id);
            return Ok(Attempt::Raced);
        }

        tracing::info!(
            task_id = %task.id,
            stage = %stage,
            vehicle_id = %vehicle.id,
            cost = candidate.total,
            route_id = route_id.as_deref().unwrap_or("-"),
            "Stage assigned"
        );
        Ok(Attempt::Assigned(Assignment {
            task_id: task.id.clone(),
            stage,
            vehicle_id: vehicle.id.clone(),
            route_id,
            cost: candidate.total,
        }))
    }
}
