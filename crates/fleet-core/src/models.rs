//! Core data models for the fleet orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A geographic position with altitude above ground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self { lat, lon, altitude_m }
    }

    pub fn ground(lat: f64, lon: f64) -> Self {
        Self::new(lat, lon, 0.0)
    }
}

/// A single 3D waypoint in a planned path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    /// Commanded speed for the leg ending at this waypoint
    pub speed_mps: Option<f64>,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self { lat, lon, altitude_m, speed_mps: None }
    }

    pub fn at(position: &Position) -> Self {
        Self::new(position.lat, position.lon, position.altitude_m)
    }

    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lon, self.altitude_m)
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    Car,
    Drone,
}

impl fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleKind::Car => f.write_str("car"),
            VehicleKind::Drone => f.write_str("drone"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    #[default]
    Idle,
    Busy,
    Charging,
    Maintenance,
    /// No telemetry within the timeout window
    Offline,
    Error,
}

/// Per-vehicle weighting of the assignment cost components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostFactors {
    pub distance: f64,
    pub time: f64,
    pub energy: f64,
    pub payload: f64,
}

impl Default for CostFactors {
    fn default() -> Self {
        Self { distance: 1.0, time: 1.0, energy: 1.0, payload: 1.0 }
    }
}

/// A registered car or drone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub kind: VehicleKind,
    pub position: Position,
    pub battery_pct: f64,
    #[serde(default)]
    pub status: VehicleStatus,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub max_payload_kg: f64,
    #[serde(default)]
    pub current_payload_kg: f64,
    #[serde(default)]
    pub cost_factors: CostFactors,
    /// Task this vehicle is currently serving
    #[serde(default)]
    pub current_task: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl Vehicle {
    /// A fully charged idle vehicle with the default payload for its kind.
    pub fn new(id: impl Into<String>, kind: VehicleKind, position: Position) -> Self {
        let max_payload_kg = match kind {
            VehicleKind::Car => 20.0,
            VehicleKind::Drone => 5.0,
        };
        Self {
            id: id.into(),
            kind,
            position,
            battery_pct: 100.0,
            status: VehicleStatus::Idle,
            capabilities: BTreeSet::new(),
            max_payload_kg,
            current_payload_kg: 0.0,
            cost_factors: CostFactors::default(),
            current_task: None,
            last_update: Utc::now(),
        }
    }

    pub fn with_battery(mut self, battery_pct: f64) -> Self {
        self.battery_pct = battery_pct;
        self
    }

    pub fn with_max_payload(mut self, max_payload_kg: f64) -> Self {
        self.max_payload_kg = max_payload_kg;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Apply a telemetry report.
    pub fn apply_update(&mut self, update: &VehicleUpdate) {
        self.position = update.position;
        self.battery_pct = update.battery_pct;
        self.status = update.status;
        if let Some(payload) = update.payload_kg {
            self.current_payload_kg = payload;
        }
        self.last_update = update.timestamp;
    }

    pub fn remaining_payload_kg(&self) -> f64 {
        (self.max_payload_kg - self.current_payload_kg).max(0.0)
    }
}

/// Telemetry report from a vehicle controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleUpdate {
    pub position: Position,
    pub battery_pct: f64,
    pub status: VehicleStatus,
    #[serde(default)]
    pub payload_kg: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPointKind {
    Pickup,
    Delivery,
    /// Air/ground transfer hub
    DroneStation,
    Charging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPoint {
    pub id: String,
    pub position: Position,
    pub kind: DeliveryPointKind,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default)]
    pub current_load: u32,
}

impl DeliveryPoint {
    pub fn new(id: impl Into<String>, kind: DeliveryPointKind, position: Position) -> Self {
        Self { id: id.into(), position, kind, capacity: 10, current_load: 0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Emergency,
}

impl TaskPriority {
    /// Base queue priority before aging.
    pub fn value(self) -> f64 {
        match self {
            TaskPriority::Low => 2.0,
            TaskPriority::Normal => 3.0,
            TaskPriority::High => 4.0,
            TaskPriority::Emergency => 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    PickupReached,
    PickupComplete,
    TransferStarted,
    TransferComplete,
    DeliveryStarted,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::PickupReached => "pickup_reached",
            TaskStatus::PickupComplete => "pickup_complete",
            TaskStatus::TransferStarted => "transfer_started",
            TaskStatus::TransferComplete => "transfer_complete",
            TaskStatus::DeliveryStarted => "delivery_started",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One leg of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// First mile by car: pickup point to drone station
    Pickup,
    /// Air leg between drone stations
    Transfer,
    /// Final leg to the delivery point
    Delivery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Pickup => f.write_str("pickup"),
            Stage::Transfer => f.write_str("transfer"),
            Stage::Delivery => f.write_str("delivery"),
        }
    }
}

/// A delivery task tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub priority: TaskPriority,
    pub pickup_point: String,
    pub delivery_point: String,
    /// Origin hub; presence makes the task hybrid
    #[serde(default)]
    pub drone_station: Option<String>,
    /// Hub nearest the delivery point, resolved at creation
    #[serde(default)]
    pub landing_station: Option<String>,
    pub weight_kg: f64,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Stages currently being served
    #[serde(default)]
    pub assigned_vehicles: BTreeMap<Stage, String>,
    #[serde(default)]
    pub completed_stages: BTreeMap<Stage, String>,
    #[serde(default)]
    pub route_ids: BTreeMap<Stage, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl Task {
    pub fn is_hybrid(&self) -> bool {
        self.drone_station.is_some()
    }

    /// Vehicles the task currently holds.
    pub fn held_vehicles(&self) -> impl Iterator<Item = &str> {
        self.assigned_vehicles.values().map(String::as_str)
    }
}

/// Task creation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub pickup_point: String,
    pub delivery_point: String,
    #[serde(default)]
    pub drone_station: Option<String>,
    pub weight_kg: f64,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// A cylindrical obstacle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub ground_elevation_m: f64,
    pub radius_m: f64,
    pub height_m: f64,
}

impl Obstacle {
    /// Altitude of the obstacle top above the local ground datum.
    pub fn top_m(&self) -> f64 {
        self.ground_elevation_m + self.height_m
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// No-fly / no-drive polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictedArea {
    pub id: String,
    /// Vertices as [lat, lon]
    pub polygon: Vec<[f64; 2]>,
    /// Empty means always active
    #[serde(default)]
    pub active_windows: Vec<TimeWindow>,
}

impl RestrictedArea {
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.active_windows.is_empty() || self.active_windows.iter().any(|w| w.contains(at))
    }

    pub fn excludes(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> bool {
        self.is_active(at) && crate::spatial::point_in_polygon(lat, lon, &self.polygon)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    #[default]
    Scheduled,
    Active,
    Completed,
    Aborted,
}

impl RouteStatus {
    /// Scheduled and active routes reserve airspace.
    pub fn is_live(self) -> bool {
        matches!(self, RouteStatus::Scheduled | RouteStatus::Active)
    }
}

/// A time-stamped, altitude-assigned drone route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub id: String,
    pub vehicle_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub waypoints: Vec<Waypoint>,
    pub start_time: DateTime<Utc>,
    pub estimated_duration_s: f64,
    pub priority: TaskPriority,
    /// Assigned cruise layer
    pub altitude_m: f64,
    pub status: RouteStatus,
}

impl RoutePlan {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::milliseconds((self.estimated_duration_s * 1000.0) as i64)
    }
}

/// Command handed to a vehicle controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleCommand {
    pub command_id: String,
    pub vehicle_id: String,
    pub task_id: String,
    pub stage: Stage,
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub route_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}
