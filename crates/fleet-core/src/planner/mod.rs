//! Path planning over an immutable [`World`] snapshot.
//!
//! Every planner here is a pure function of its inputs. Callers own
//! caching and decide which strategy a vehicle gets through [`PlanMode`].

pub mod air;
pub mod hybrid;
pub mod road;
pub mod rrt;
pub mod world;

use crate::config::PlannerConfig;
use crate::error::FleetResult;
use crate::flight::Separation;
use crate::models::{Position, RoutePlan, VehicleKind, Waypoint};
use crate::spatial::path_length_m;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

pub use world::{World, WorldData};

/// How a returned path was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    Air,
    Road,
    Ground,
    AboveRoad,
    Split,
}

/// Strategy requested from the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    Air,
    Road,
    Ground,
    Hybrid,
}

impl PlanMode {
    /// Drones use the hybrid combiner; cars follow roads when a network is loaded.
    pub fn for_vehicle(kind: VehicleKind, world: &World) -> Self {
        match kind {
            VehicleKind::Drone => PlanMode::Hybrid,
            VehicleKind::Car if world.road_graph().is_some() => PlanMode::Road,
            VehicleKind::Car => PlanMode::Ground,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPath {
    pub waypoints: Vec<Waypoint>,
    pub length_m: f64,
    pub path_type: PathType,
    pub nodes_expanded: usize,
}

impl PlannedPath {
    pub fn new(waypoints: Vec<Waypoint>, path_type: PathType, nodes_expanded: usize) -> Self {
        Self {
            length_m: path_length_m(&waypoints),
            waypoints,
            path_type,
            nodes_expanded,
        }
    }

    /// Append `next`, dropping its first waypoint when it repeats our last one.
    pub fn concat(mut self, next: PlannedPath) -> PlannedPath {
        let mut tail = next.waypoints.into_iter().peekable();
        if let (Some(last), Some(first)) = (self.waypoints.last(), tail.peek()) {
            if last.lat == first.lat && last.lon == first.lon && last.altitude_m == first.altitude_m {
                tail.next();
            }
        }
        self.waypoints.extend(tail);
        self.length_m = path_length_m(&self.waypoints);
        self.nodes_expanded += next.nodes_expanded;
        self
    }
}

/// Front door to the individual planners.
pub struct PathPlanner<'a> {
    world: &'a World,
    config: &'a PlannerConfig,
}

impl<'a> PathPlanner<'a> {
    pub fn new(world: &'a World, config: &'a PlannerConfig) -> Self {
        Self { world, config }
    }

    pub fn world(&self) -> &World {
        self.world
    }

    /// Plan one leg with the requested strategy.
    ///
    /// `active` and `separation` only matter for [`PlanMode::Hybrid`].
    pub fn plan(
        &self,
        mode: PlanMode,
        start: &Position,
        goal: &Position,
        at: DateTime<Utc>,
        active: &[RoutePlan],
        separation: Separation,
    ) -> FleetResult<PlannedPath> {
        let (from, to) = (Waypoint::at(start), Waypoint::at(goal));
        match mode {
            PlanMode::Air => air::plan_air(self.world, self.config, &from, &to, at),
            PlanMode::Hybrid => {
                hybrid::plan_hybrid(self.world, self.config, &from, &to, at, active, separation)
                    .map(|plan| plan.chosen)
            }
            PlanMode::Road => self.road(start, goal, at),
            PlanMode::Ground => match self.config.rrt_seed {
                Some(seed) => rrt::plan_rrt(self.world, self.config, start, goal, at, &mut StdRng::seed_from_u64(seed)),
                None => rrt::plan_rrt(self.world, self.config, start, goal, at, &mut rand::rng()),
            },
        }
    }

    fn road(&self, start: &Position, goal: &Position, at: DateTime<Utc>) -> FleetResult<PlannedPath> {
        let Some(graph) = self.world.road_graph() else {
            return Err(crate::error::FleetError::NoPath("no road network loaded".to_string()));
        };
        let world = self.world;
        let road_path = graph.shortest_path((start.lat, start.lon), (goal.lat, goal.lon), at, |lat, lon, at| {
            world.restricted_at(lat, lon, at)
        })?;

        let mut waypoints = vec![Waypoint::at(start)];
        waypoints.extend(road_path.nodes.iter().map(|node| Waypoint::new(node.lat, node.lon, 0.0)));
        waypoints.push(Waypoint::at(goal));
        Ok(PlannedPath::new(waypoints, PathType::Road, road_path.nodes.len()))
    }
}
