//! Scheduling and planning core for a mixed car/drone delivery fleet.
//!
//! Everything in this crate is synchronous and free of I/O; the server
//! crate owns the runtime, the registries and the network surfaces.

pub mod assignment;
pub mod config;
pub mod error;
pub mod flight;
pub mod lifecycle;
pub mod models;
mod ordering;
pub mod planner;
pub mod queue;
pub mod snapshot;
pub mod spatial;

pub use assignment::{select_vehicle, CandidateCost};
pub use config::{FlightConfig, PlannerConfig, SchedulerConfig, VehicleProfile};
pub use error::{EntityKind, FleetError, FleetResult};
pub use flight::{FlightScheduler, RouteRequest, Separation};
pub use models::{
    CostFactors, DeliveryPoint, DeliveryPointKind, NewTask, Obstacle, Position, RestrictedArea,
    RoutePlan, RouteStatus, Stage, Task, TaskPriority, TaskStatus, TimeWindow, Vehicle,
    VehicleCommand, VehicleKind, VehicleStatus, VehicleUpdate, Waypoint,
};
pub use planner::{PathPlanner, PathType, PlanMode, PlannedPath, World, WorldData};
pub use queue::TaskQueue;
pub use snapshot::Snapshot;
pub use spatial::haversine_distance;
