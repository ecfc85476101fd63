//! Registries and the operations that edit them directly.

use crate::config::Config;
use crate::planning::PlannerService;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_core::error::EntityKind;
use fleet_core::{
    lifecycle, DeliveryPoint, DeliveryPointKind, FleetError, FleetResult, FlightScheduler, NewTask,
    RoutePlan, RouteStatus, Snapshot, Stage, Task, TaskQueue, TaskStatus, Vehicle, VehicleCommand,
    VehicleStatus, VehicleUpdate, World, WorldData,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Counts by state plus the full entity lists.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    pub uptime_s: i64,
    pub world_version: u64,
    pub queued_tasks: usize,
    pub vehicles_by_status: BTreeMap<VehicleStatus, usize>,
    pub tasks_by_status: BTreeMap<TaskStatus, usize>,
    pub routes_by_status: BTreeMap<RouteStatus, usize>,
    pub vehicles: Vec<Vehicle>,
    pub tasks: Vec<Task>,
    pub delivery_points: Vec<DeliveryPoint>,
    pub routes: Vec<RoutePlan>,
}

pub struct Orchestrator {
    pub(super) config: Config,
    pub(super) vehicles: DashMap<String, Vehicle>,
    pub(super) points: DashMap<String, DeliveryPoint>,
    pub(super) tasks: DashMap<String, Task>,
    queue: Mutex<TaskQueue>,
    flights: Mutex<FlightScheduler>,
    pub(super) planner: PlannerService,
    pub(super) tick_lock: tokio::sync::Mutex<()>,
    pub(super) commands: mpsc::Sender<VehicleCommand>,
    task_counter: AtomicU64,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    /// Build an orchestrator and the receiving end of its command channel.
    pub fn new(config: Config, world: World) -> (Self, mpsc::Receiver<VehicleCommand>) {
        let (commands, rx) = mpsc::channel(config.command_channel_capacity.max(1));
        let planner = PlannerService::new(
            config.planner.clone(),
            world,
            config.path_cache_ttl,
            config.path_cache_max_entries,
        );
        let orchestrator = Self {
            queue: Mutex::new(TaskQueue::new(
                config.scheduler.aging_per_hour,
                config.scheduler.queue_size_limit,
            )),
            flights: Mutex::new(FlightScheduler::new(config.flight.clone())),
            vehicles: DashMap::new(),
            points: DashMap::new(),
            tasks: DashMap::new(),
            planner,
            tick_lock: tokio::sync::Mutex::new(()),
            commands,
            task_counter: AtomicU64::new(1),
            started_at: Utc::now(),
            config,
        };
        (orchestrator, rx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn planner(&self) -> &PlannerService {
        &self.planner
    }

    pub(super) fn lock_queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn lock_flights(&self) -> MutexGuard<'_, FlightScheduler> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Registration ===

    pub fn register_vehicle(&self, mut vehicle: Vehicle) -> FleetResult<Vehicle> {
        if vehicle.id.trim().is_empty() {
            return Err(FleetError::Invalid("vehicle id must not be empty".to_string()));
        }
        if !(0.0..=100.0).contains(&vehicle.battery_pct) {
            return Err(FleetError::Invalid(format!(
                "battery {} outside 0-100 for {}",
                vehicle.battery_pct, vehicle.id
            )));
        }
        if vehicle.max_payload_kg < 0.0 || vehicle.current_payload_kg < 0.0 {
            return Err(FleetError::Invalid(format!("negative payload for {}", vehicle.id)));
        }

        vehicle.current_task = None;
        match self.vehicles.entry(vehicle.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(FleetError::DuplicateId(vehicle.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!("Registered {} {}", vehicle.kind, vehicle.id);
                slot.insert(vehicle.clone());
                Ok(vehicle)
            }
        }
    }

    pub fn register_point(&self, point: DeliveryPoint) -> FleetResult<DeliveryPoint> {
        if point.id.trim().is_empty() {
            return Err(FleetError::Invalid("delivery point id must not be empty".to_string()));
        }
        if point.current_load > point.capacity {
            return Err(FleetError::Invalid(format!(
                "point {} load {} exceeds capacity {}",
                point.id, point.current_load, point.capacity
            )));
        }
        match self.points.entry(point.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(FleetError::DuplicateId(point.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(point.clone());
                Ok(point)
            }
        }
    }

    pub fn create_task(&self, request: NewTask) -> FleetResult<Task> {
        let now = Utc::now();
        let id = match request.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => format!("TASK-{:06}", self.task_counter.fetch_add(1, Ordering::SeqCst)),
        };
        if self.tasks.contains_key(&id) {
            return Err(FleetError::DuplicateId(id));
        }
        if !request.weight_kg.is_finite() || request.weight_kg < 0.0 {
            return Err(FleetError::Invalid(format!("task {id} has weight {}", request.weight_kg)));
        }
        for point_id in [&request.pickup_point, &request.delivery_point] {
            if !self.points.contains_key(point_id) {
                return Err(FleetError::not_found(EntityKind::DeliveryPoint, point_id.as_str()));
            }
        }
        if let Some(station) = &request.drone_station {
            match self.points.get(station).map(|point| point.kind) {
                Some(DeliveryPointKind::DroneStation) => {}
                Some(other) => {
                    return Err(FleetError::Invalid(format!("{station} is a {other:?} point, not a drone station")))
                }
                None => return Err(FleetError::not_found(EntityKind::DeliveryPoint, station.as_str())),
            }
        }
        if let Some(deadline) = request.deadline {
            if deadline <= now {
                return Err(FleetError::DeadlineMissed(id));
            }
        }

        let landing_station = request
            .drone_station
            .as_deref()
            .and_then(|origin| self.nearest_station(&request.delivery_point, origin));

        let task = Task {
            id: id.clone(),
            priority: request.priority,
            pickup_point: request.pickup_point,
            delivery_point: request.delivery_point,
            drone_station: request.drone_station,
            landing_station,
            weight_kg: request.weight_kg,
            required_capabilities: request.required_capabilities,
            deadline: request.deadline,
            status: TaskStatus::Pending,
            assigned_vehicles: BTreeMap::new(),
            completed_stages: BTreeMap::new(),
            route_ids: BTreeMap::new(),
            created_at: now,
            completion_time: None,
            retry_count: 0,
            failure_reason: None,
        };

        match self.tasks.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(FleetError::DuplicateId(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task.clone());
            }
        }
        if let Err(err) = self.lock_queue().push(&task.id, task.priority, task.created_at) {
            self.tasks.remove(&task.id);
            return Err(err);
        }

        tracing::info!(
            task_id = %task.id,
            priority = ?task.priority,
            hybrid = task.is_hybrid(),
            "Task created"
        );
        Ok(task)
    }

    /// Drone station closest to `point_id`, preferring one other than `origin`.
    fn nearest_station(&self, point_id: &str, origin: &str) -> Option<String> {
        let target = self.points.get(point_id)?.position;
        self.points
            .iter()
            .filter(|entry| entry.kind == DeliveryPointKind::DroneStation && entry.id != origin)
            .map(|entry| {
                let distance = fleet_core::spatial::ground_distance(&entry.position, &target);
                (distance, entry.id.clone())
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, id)| id)
    }

    // === Telemetry ===

    /// Apply a controller report to a vehicle.
    ///
    /// A vehicle serving a stage stays `Busy` whatever it reports, unless it
    /// reports `Error` or `Offline`, which hands the stage back to the queue.
    pub fn update_vehicle_status(&self, vehicle_id: &str, update: VehicleUpdate) -> FleetResult<Vehicle> {
        if !(0.0..=100.0).contains(&update.battery_pct) {
            return Err(FleetError::Invalid(format!(
                "battery {} outside 0-100 for {vehicle_id}",
                update.battery_pct
            )));
        }
        if update.payload_kg.is_some_and(|payload| payload < 0.0) {
            return Err(FleetError::Invalid(format!("negative payload for {vehicle_id}")));
        }

        let (vehicle, released) = {
            let mut vehicle = self
                .vehicles
                .get_mut(vehicle_id)
                .ok_or_else(|| FleetError::not_found(EntityKind::Vehicle, vehicle_id))?;
            if update.timestamp < vehicle.last_update {
                tracing::debug!("Ignoring out-of-order report from {}", vehicle_id);
                return Ok(vehicle.clone());
            }

            vehicle.apply_update(&update);
            let mut released = None;
            if let Some(task_id) = vehicle.current_task.clone() {
                match update.status {
                    VehicleStatus::Error | VehicleStatus::Offline => {
                        vehicle.current_task = None;
                        released = Some(task_id);
                    }
                    _ => vehicle.status = VehicleStatus::Busy,
                }
            }
            (vehicle.clone(), released)
        };

        if let Some(task_id) = released {
            tracing::warn!(
                "Vehicle {} reported {:?} while serving {}; releasing stage",
                vehicle_id,
                update.status,
                task_id
            );
            self.requeue_stage(&task_id, vehicle_id);
        }
        Ok(vehicle)
    }

    // === Release helpers ===

    /// Clear a vehicle's hold on `task_id`, leaving it in `status`
    /// (or `Idle` if it was `Busy` and no status is given).
    pub(super) fn release_vehicle(&self, vehicle_id: &str, task_id: &str, status: Option<VehicleStatus>) {
        let Some(mut vehicle) = self.vehicles.get_mut(vehicle_id) else {
            return;
        };
        if vehicle.current_task.as_deref() != Some(task_id) {
            return;
        }
        vehicle.current_task = None;
        vehicle.status = match status {
            Some(status) => status,
            None if vehicle.status == VehicleStatus::Busy => VehicleStatus::Idle,
            None => vehicle.status,
        };
    }

    /// Detach `vehicle_id` from whatever stage of `task_id` it serves and
    /// put that stage back in the queue. The vehicle itself is left alone.
    pub(super) fn requeue_stage(&self, task_id: &str, vehicle_id: &str) {
        let (route_id, requeue) = {
            let Some(mut task) = self.tasks.get_mut(task_id) else {
                return;
            };
            let Some(stage) = task
                .assigned_vehicles
                .iter()
                .find(|(_, held)| held.as_str() == vehicle_id)
                .map(|(stage, _)| *stage)
            else {
                return;
            };
            task.assigned_vehicles.remove(&stage);
            let route_id = task.route_ids.remove(&stage);
            let requeue = if task.status.is_terminal() {
                None
            } else {
                task.status = lifecycle::waiting_status(&task, stage);
                Some((task.priority, task.created_at))
            };
            (route_id, requeue)
        };

        if let Some(route_id) = route_id {
            self.close_route(&route_id, RouteStatus::Aborted);
        }
        if let Some((priority, created_at)) = requeue {
            if let Err(err) = self.lock_queue().push(task_id, priority, created_at) {
                tracing::error!("Could not requeue {}: {}", task_id, err);
            }
        }
    }

    pub(super) fn close_route(&self, route_id: &str, status: RouteStatus) {
        if let Err(err) = self.lock_flights().update_status(route_id, status) {
            tracing::debug!("Route {} not closed: {}", route_id, err);
        }
    }

    /// Put a task back in the queue if it is waiting for a vehicle.
    pub(super) fn requeue(&self, task_id: &str) {
        let Some(entry) = self
            .tasks
            .get(task_id)
            .filter(|task| lifecycle::next_stage(task).is_some())
            .map(|task| (task.priority, task.created_at))
        else {
            return;
        };
        if let Err(err) = self.lock_queue().push(task_id, entry.0, entry.1) {
            tracing::error!("Could not requeue {}: {}", task_id, err);
        }
    }

    /// Move a non-terminal task to a terminal status and let go of everything it holds.
    pub(super) fn close_task(&self, task_id: &str, status: TaskStatus, reason: Option<String>) -> FleetResult<Task> {
        let (task, held, routes) = {
            let mut task = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::not_found(EntityKind::Task, task_id))?;
            if task.status.is_terminal() {
                return Err(FleetError::InvalidTransition { id: task.id.clone(), from: task.status, to: status });
            }
            task.status = status;
            task.completion_time = Some(Utc::now());
            task.failure_reason = reason;
            let held: Vec<String> = std::mem::take(&mut task.assigned_vehicles).into_values().collect();
            let routes: Vec<String> = task.route_ids.values().cloned().collect();
            (task.clone(), held, routes)
        };

        self.lock_queue().remove(task_id);
        for vehicle_id in &held {
            self.release_vehicle(vehicle_id, task_id, None);
        }
        for route_id in &routes {
            self.close_route(route_id, RouteStatus::Aborted);
        }
        Ok(task)
    }

    // === Task lifecycle ===

    pub fn cancel_task(&self, task_id: &str) -> FleetResult<Task> {
        let task = self.close_task(task_id, TaskStatus::Cancelled, None)?;
        tracing::info!("Task {} cancelled", task_id);
        Ok(task)
    }

    pub fn fail_task(&self, task_id: &str, reason: impl Into<String>) -> FleetResult<Task> {
        let reason = reason.into();
        tracing::warn!("Task {} failed: {}", task_id, reason);
        self.close_task(task_id, TaskStatus::Failed, Some(reason))
    }

    /// Advance a task on behalf of its controller.
    pub fn report_progress(&self, task_id: &str, status: TaskStatus) -> FleetResult<Task> {
        match status {
            TaskStatus::Cancelled => {
                self.check_reportable(task_id, status)?;
                return self.cancel_task(task_id);
            }
            TaskStatus::Failed => {
                self.check_reportable(task_id, status)?;
                return self.fail_task(task_id, "reported failed by controller");
            }
            _ => {}
        }

        let now = Utc::now();
        let (task, finished) = {
            let mut task = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| FleetError::not_found(EntityKind::Task, task_id))?;
            lifecycle::check_transition(&task, status)?;

            let mut finished = None;
            if let Some(stage) = lifecycle::completed_stage(&task, status) {
                if let Some(vehicle_id) = task.assigned_vehicles.remove(&stage) {
                    task.completed_stages.insert(stage, vehicle_id.clone());
                    finished = Some((vehicle_id, task.route_ids.get(&stage).cloned()));
                }
            }
            task.status = status;
            if status == TaskStatus::Completed {
                task.completion_time = Some(now);
            }
            (task.clone(), finished)
        };

        if let Some((vehicle_id, route_id)) = finished {
            self.release_vehicle(&vehicle_id, task_id, None);
            if let Some(route_id) = route_id {
                self.close_route(&route_id, RouteStatus::Completed);
            }
            tracing::info!("Task {} reached {} (vehicle {} released)", task_id, status, vehicle_id);
        }
        self.requeue(task_id);
        Ok(task)
    }

    fn check_reportable(&self, task_id: &str, status: TaskStatus) -> FleetResult<()> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| FleetError::not_found(EntityKind::Task, task_id))?;
        lifecycle::check_transition(&task, status)
    }

    /// The gateway could not deliver a command: the vehicle is unreachable.
    pub fn report_dispatch_failure(&self, command: &VehicleCommand, reason: &str) {
        tracing::error!(
            "Command {} to {} failed: {}",
            command.command_id,
            command.vehicle_id,
            reason
        );
        self.release_vehicle(&command.vehicle_id, &command.task_id, Some(VehicleStatus::Error));
        self.requeue_stage(&command.task_id, &command.vehicle_id);
    }

    // === Routes ===

    pub fn active_routes(&self) -> Vec<RoutePlan> {
        self.lock_flights().active_routes()
    }

    pub fn get_route(&self, route_id: &str) -> Option<RoutePlan> {
        self.lock_flights().get(route_id).cloned()
    }

    pub fn set_route_status(&self, route_id: &str, status: RouteStatus) -> FleetResult<RoutePlan> {
        self.lock_flights().update_status(route_id, status)
    }

    // === Queries ===

    pub fn get_task(&self, task_id: &str) -> FleetResult<Task> {
        self.tasks
            .get(task_id)
            .map(|task| task.clone())
            .ok_or_else(|| FleetError::not_found(EntityKind::Task, task_id))
    }

    pub fn get_vehicle(&self, vehicle_id: &str) -> FleetResult<Vehicle> {
        self.vehicles
            .get(vehicle_id)
            .map(|vehicle| vehicle.clone())
            .ok_or_else(|| FleetError::not_found(EntityKind::Vehicle, vehicle_id))
    }

    pub fn list_vehicles(&self) -> Vec<Vehicle> {
        let mut vehicles: Vec<Vehicle> = self.vehicles.iter().map(|entry| entry.value().clone()).collect();
        vehicles.sort_by(|a, b| a.id.cmp(&b.id));
        vehicles
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|entry| entry.value().clone()).collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    pub fn list_points(&self) -> Vec<DeliveryPoint> {
        let mut points: Vec<DeliveryPoint> = self.points.iter().map(|entry| entry.value().clone()).collect();
        points.sort_by(|a, b| a.id.cmp(&b.id));
        points
    }

    pub fn queued_tasks(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn system_status(&self) -> SystemStatus {
        let now = Utc::now();
        let vehicles = self.list_vehicles();
        let tasks = self.list_tasks();
        let routes = {
            let flights = self.lock_flights();
            let mut routes = flights.active_routes();
            routes.extend(flights.archived().cloned());
            routes
        };

        let mut vehicles_by_status = BTreeMap::new();
        for vehicle in &vehicles {
            *vehicles_by_status.entry(vehicle.status).or_insert(0) += 1;
        }
        let mut tasks_by_status = BTreeMap::new();
        for task in &tasks {
            *tasks_by_status.entry(task.status).or_insert(0) += 1;
        }
        let mut routes_by_status = BTreeMap::new();
        for route in &routes {
            *routes_by_status.entry(route.status).or_insert(0) += 1;
        }

        SystemStatus {
            timestamp: now,
            uptime_s: (now - self.started_at).num_seconds(),
            world_version: self.planner.version(),
            queued_tasks: self.queued_tasks(),
            vehicles_by_status,
            tasks_by_status,
            routes_by_status,
            vehicles,
            tasks,
            delivery_points: self.list_points(),
            routes,
        }
    }

    // === World ===

    pub fn replace_world(&self, data: WorldData) -> FleetResult<u64> {
        let world = World::from_data(data)?;
        let obstacles = world.obstacles().len();
        let areas = world.restricted_areas().len();
        let version = self.planner.replace_world(world);
        tracing::info!(
            "World updated to v{} ({} obstacles, {} restricted areas)",
            version,
            obstacles,
            areas
        );
        Ok(version)
    }

    // === Persistence ===

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            taken_at: Utc::now(),
            vehicles: self.list_vehicles(),
            tasks: self.list_tasks(),
            delivery_points: self.list_points(),
            routes: self.lock_flights().active_routes(),
        }
        .normalized()
    }

    /// Load a snapshot into empty registries and queue every waiting task.
    ///
    /// Live routes still held by a task stage are reinstated in the flight
    /// scheduler. A held stage whose route did not survive is handed back to
    /// the queue, and its vehicle with it.
    ///
    /// Returns how many tasks were queued.
    pub fn restore(&self, snapshot: Snapshot) -> FleetResult<usize> {
        if !self.tasks.is_empty() || !self.vehicles.is_empty() || !self.points.is_empty() {
            return Err(FleetError::Invalid("cannot restore into a populated orchestrator".to_string()));
        }

        for point in snapshot.delivery_points {
            self.points.insert(point.id.clone(), point);
        }
        for vehicle in snapshot.vehicles {
            self.vehicles.insert(vehicle.id.clone(), vehicle);
        }

        let held_routes: HashSet<&str> = snapshot
            .tasks
            .iter()
            .filter(|task| !task.status.is_terminal())
            .flat_map(|task| {
                task.assigned_vehicles
                    .keys()
                    .filter_map(|stage| task.route_ids.get(stage).map(String::as_str))
            })
            .collect();
        let live_routes: HashSet<String> = {
            let mut flights = self.lock_flights();
            for route_id in snapshot.tasks.iter().flat_map(|task| task.route_ids.values()) {
                flights.reserve_id(route_id);
            }
            for route in &snapshot.routes {
                flights.reserve_id(&route.id);
            }
            let held: Vec<RoutePlan> = snapshot
                .routes
                .iter()
                .filter(|route| held_routes.contains(route.id.as_str()))
                .cloned()
                .collect();
            let ids = held.iter().map(|route| route.id.clone()).collect();
            let restored = flights.restore(held);
            if restored > 0 {
                tracing::info!("Reinstated {} live routes", restored);
            }
            ids
        };

        let mut waiting = BTreeSet::new();
        for mut task in snapshot.tasks {
            if let Some(seq) = task.id.strip_prefix("TASK-").and_then(|raw| raw.parse::<u64>().ok()) {
                self.task_counter.fetch_max(seq + 1, Ordering::SeqCst);
            }
            if !task.status.is_terminal() {
                self.drop_stale_routes(&mut task, &live_routes);
            }
            if !task.status.is_terminal() && lifecycle::next_stage(&task).is_some() {
                waiting.insert((task.id.clone(), task.priority, task.created_at));
            }
            self.tasks.insert(task.id.clone(), task);
        }

        let mut queue = self.lock_queue();
        let mut queued = 0;
        for (task_id, priority, created_at) in waiting {
            if queue.push(&task_id, priority, created_at)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Forget route ids of unfinished stages whose route is no longer live.
    fn drop_stale_routes(&self, task: &mut Task, live_routes: &HashSet<String>) {
        let stale: Vec<Stage> = task
            .route_ids
            .iter()
            .filter(|(stage, route_id)| {
                !task.completed_stages.contains_key(*stage) && !live_routes.contains(*route_id)
            })
            .map(|(stage, _)| *stage)
            .collect();

        for stage in stale {
            task.route_ids.remove(&stage);
            if let Some(vehicle_id) = task.assigned_vehicles.remove(&stage) {
                tracing::warn!(
                    "Task {} lost the route for its {:?} stage; releasing {}",
                    task.id,
                    stage,
                    vehicle_id
                );
                task.status = lifecycle::waiting_status(task, stage);
                self.release_vehicle(&vehicle_id, &task.id, None);
            }
        }
    }
}
