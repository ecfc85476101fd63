//! Immutable configuration for each scheduling component.
//!
//! The server builds these once from its environment and hands them to the
//! component constructors; nothing mutates them afterwards.

use crate::models::VehicleKind;
use serde::{Deserialize, Serialize};

/// Kinematic and energy profile used to project a candidate's stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub cruise_speed_mps: f64,
    /// Battery drain while moving, percent per minute
    pub battery_pct_per_min: f64,
    /// Fixed handling time per stage (takeoff/landing, loading)
    pub handling_overhead_s: f64,
}

/// Task scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Vehicles at or below this battery level are never assigned
    pub min_battery_level: f64,
    /// Battery level that triggers a warning in the monitor
    pub low_battery_threshold: f64,
    /// Seconds without telemetry before a vehicle is marked offline
    pub vehicle_timeout_secs: u64,
    pub task_retry_limit: u32,
    /// Priority levels gained per hour spent waiting
    pub aging_per_hour: f64,
    pub max_concurrent_tasks: usize,
    pub queue_size_limit: usize,
    /// Maximum tasks attempted per tick
    pub batch_size: usize,
    pub car: VehicleProfile,
    pub drone: VehicleProfile,
}

impl SchedulerConfig {
    pub fn profile(&self, kind: VehicleKind) -> &VehicleProfile {
        match kind {
            VehicleKind::Car => &self.car,
            VehicleKind::Drone => &self.drone,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_battery_level: 15.0,
            low_battery_threshold: 30.0,
            vehicle_timeout_secs: 30,
            task_retry_limit: 3,
            aging_per_hour: 0.1,
            max_concurrent_tasks: 100,
            queue_size_limit: 1000,
            batch_size: 100,
            car: VehicleProfile {
                cruise_speed_mps: 8.0,
                battery_pct_per_min: 0.3,
                handling_overhead_s: 0.0,
            },
            drone: VehicleProfile {
                cruise_speed_mps: 10.0,
                battery_pct_per_min: 0.5,
                handling_overhead_s: 60.0,
            },
        }
    }
}

/// Flight scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightConfig {
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
    pub altitude_step_m: f64,
    pub min_separation_m: f64,
    pub vertical_separation_m: f64,
    /// Vertical clearance required above the tallest obstacle under the track
    pub obstacle_clearance_m: f64,
    /// Default speed when a waypoint carries none
    pub cruise_speed_mps: f64,
    /// Padding applied to both ends of a route's time window
    pub time_buffer_s: f64,
    pub max_routes_per_cell: usize,
    pub cell_size_m: f64,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            min_altitude_m: 30.0,
            max_altitude_m: 120.0,
            altitude_step_m: 10.0,
            min_separation_m: 50.0,
            vertical_separation_m: 10.0,
            obstacle_clearance_m: 5.0,
            cruise_speed_mps: 10.0,
            time_buffer_s: 60.0,
            max_routes_per_cell: 5,
            cell_size_m: 1000.0,
        }
    }
}

impl FlightConfig {
    /// Discrete altitude ladder, ascending.
    pub fn altitude_ladder(&self) -> Vec<f64> {
        let step = self.altitude_step_m.max(1.0);
        let mut levels = Vec::new();
        let mut alt = self.min_altitude_m;
        while alt <= self.max_altitude_m + 1e-9 {
            levels.push(alt);
            alt += step;
        }
        levels
    }
}

/// Path planner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub grid_size_m: f64,
    pub min_altitude_m: f64,
    pub max_altitude_m: f64,
    pub altitude_step_m: f64,
    /// Horizontal clearance added to obstacle radii
    pub safety_margin_m: f64,
    pub waypoint_radius_m: f64,
    /// Extra room around the start/goal box the air search may use
    pub search_margin_m: f64,
    pub max_expansions: usize,
    pub rrt_step_m: f64,
    pub rrt_max_iterations: usize,
    pub rrt_goal_bias: f64,
    pub rrt_sample_margin_m: f64,
    pub rrt_seed: Option<u64>,
    pub above_road_altitude_m: f64,
    pub split_offset_m: f64,
    pub conflict_penalty_m: f64,
    pub drone_speed_mps: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            grid_size_m: 50.0,
            min_altitude_m: 30.0,
            max_altitude_m: 120.0,
            altitude_step_m: 10.0,
            safety_margin_m: 5.0,
            waypoint_radius_m: 50.0,
            search_margin_m: 500.0,
            max_expansions: 200_000,
            rrt_step_m: 50.0,
            rrt_max_iterations: 5000,
            rrt_goal_bias: 0.1,
            rrt_sample_margin_m: 1000.0,
            rrt_seed: None,
            above_road_altitude_m: 60.0,
            split_offset_m: 200.0,
            conflict_penalty_m: 1000.0,
            drone_speed_mps: 10.0,
        }
    }
}
