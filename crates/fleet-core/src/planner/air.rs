//! 3D A* over a local grid of altitude layers.

use super::world::World;
use super::{PathType, PlannedPath};
use crate::config::PlannerConfig;
use crate::error::{FleetError, FleetResult};
use crate::models::Waypoint;
use crate::ordering::FloatOrd;
use crate::spatial::LocalFrame;
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

type NodeKey = (i32, i32, i32);

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    key: NodeKey,
    g_score: FloatOrd,
    f_score: FloatOrd,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Grid geometry shared by the search and the smoothing pass.
struct AirGrid<'a> {
    world: &'a World,
    config: &'a PlannerConfig,
    frame: LocalFrame,
    origin: (f64, f64),
    levels: Vec<f64>,
    bounds: ((i32, i32), (i32, i32)),
    at: DateTime<Utc>,
    validity: HashMap<NodeKey, bool>,
}

impl AirGrid<'_> {
    fn local(&self, key: NodeKey) -> (f64, f64, f64) {
        let g = self.config.grid_size_m;
        (
            self.origin.0 + key.1 as f64 * g,
            self.origin.1 + key.0 as f64 * g,
            self.levels[key.2 as usize],
        )
    }

    fn waypoint(&self, key: NodeKey) -> Waypoint {
        let (e, n, alt) = self.local(key);
        let (lat, lon) = self.frame.to_geo(e, n);
        Waypoint::new(lat, lon, alt).with_speed(self.config.drone_speed_mps)
    }

    fn in_bounds(&self, key: NodeKey) -> bool {
        let ((i_min, i_max), (j_min, j_max)) = self.bounds;
        (i_min..=i_max).contains(&key.0)
            && (j_min..=j_max).contains(&key.1)
            && key.2 >= 0
            && (key.2 as usize) < self.levels.len()
    }

    fn is_valid(&mut self, key: NodeKey) -> bool {
        if let Some(&valid) = self.validity.get(&key) {
            return valid;
        }
        let wp = self.waypoint(key);
        let valid = !self
            .world
            .air_blocked(wp.lat, wp.lon, wp.altitude_m, self.config.safety_margin_m, self.at);
        self.validity.insert(key, valid);
        valid
    }

    fn line_of_sight(&self, a: &Waypoint, b: &Waypoint) -> bool {
        !self.world.air_segment_blocked(
            a,
            b,
            self.config.safety_margin_m,
            self.config.grid_size_m / 4.0,
            self.at,
        )
    }
}

fn nearest_level(levels: &[f64], altitude_m: f64) -> usize {
    levels
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - altitude_m).abs().total_cmp(&(b.1 - altitude_m).abs()))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn altitude_levels(config: &PlannerConfig) -> Vec<f64> {
    let step = config.altitude_step_m.max(1.0);
    let mut levels = Vec::new();
    let mut alt = config.min_altitude_m;
    while alt <= config.max_altitude_m + 1e-9 {
        levels.push(alt);
        alt += step;
    }
    levels
}

/// Plan an airborne path from `start` to `goal`.
pub fn plan_air(
    world: &World,
    config: &PlannerConfig,
    start: &Waypoint,
    goal: &Waypoint,
    at: DateTime<Utc>,
) -> FleetResult<PlannedPath> {
    let levels = altitude_levels(config);
    if levels.is_empty() || config.grid_size_m <= 0.0 {
        return Err(FleetError::Invalid("air grid has no altitude levels".to_string()));
    }

    let frame = LocalFrame::between(start.lat, start.lon, goal.lat, goal.lon);
    let origin = frame.to_local(start.lat, start.lon);
    let goal_local = frame.to_local(goal.lat, goal.lon);
    let goal_alt = goal.altitude_m.clamp(config.min_altitude_m, config.max_altitude_m);

    let g = config.grid_size_m;
    let goal_i = ((goal_local.1 - origin.1) / g).round() as i32;
    let goal_j = ((goal_local.0 - origin.0) / g).round() as i32;
    let pad = (config.search_margin_m / g).ceil() as i32;
    let bounds = (
        (goal_i.min(0) - pad, goal_i.max(0) + pad),
        (goal_j.min(0) - pad, goal_j.max(0) + pad),
    );

    let start_level = nearest_level(&levels, start.altitude_m);
    let mut grid = AirGrid {
        world,
        config,
        frame,
        origin,
        levels,
        bounds,
        at,
        validity: HashMap::new(),
    };

    let heuristic = |grid: &AirGrid<'_>, key: NodeKey| {
        let (e, n, alt) = grid.local(key);
        let (de, dn, dz) = (goal_local.0 - e, goal_local.1 - n, goal_alt - alt);
        (de * de + dn * dn + dz * dz).sqrt()
    };
    let reached = |grid: &AirGrid<'_>, key: NodeKey| {
        let (e, n, alt) = grid.local(key);
        let horizontal = ((goal_local.0 - e).powi(2) + (goal_local.1 - n).powi(2)).sqrt();
        horizontal <= config.waypoint_radius_m && (alt - goal_alt).abs() <= config.altitude_step_m
    };

    let start_key: NodeKey = (0, 0, start_level as i32);
    let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
    open_set.push(Reverse(OpenNode {
        key: start_key,
        g_score: FloatOrd(0.0),
        f_score: FloatOrd(heuristic(&grid, start_key)),
    }));
    let mut closed_set: HashSet<NodeKey> = HashSet::new();
    let mut g_score: HashMap<NodeKey, f64> = HashMap::new();
    let mut came_from: HashMap<NodeKey, NodeKey> = HashMap::new();
    g_score.insert(start_key, 0.0);

    let mut final_key = None;
    let mut nodes_expanded = 0usize;

    while let Some(Reverse(current)) = open_set.pop() {
        if closed_set.contains(&current.key) {
            continue;
        }
        let best_g = g_score.get(&current.key).copied().unwrap_or(f64::INFINITY);
        if current.g_score.0 > best_g + 1e-9 {
            continue;
        }

        nodes_expanded += 1;
        if reached(&grid, current.key) {
            final_key = Some(current.key);
            break;
        }
        if nodes_expanded >= config.max_expansions {
            break;
        }
        closed_set.insert(current.key);

        for di in -1..=1 {
            for dj in -1..=1 {
                for dk in -1..=1 {
                    if di == 0 && dj == 0 && dk == 0 {
                        continue;
                    }
                    let next = (current.key.0 + di, current.key.1 + dj, current.key.2 + dk);
                    if closed_set.contains(&next) || !grid.in_bounds(next) || !grid.is_valid(next) {
                        continue;
                    }

                    let (e0, n0, z0) = grid.local(current.key);
                    let (e1, n1, z1) = grid.local(next);
                    let step_cost = ((e1 - e0).powi(2) + (n1 - n0).powi(2) + (z1 - z0).powi(2)).sqrt();
                    let tentative_g = best_g + step_cost;
                    if tentative_g < g_score.get(&next).copied().unwrap_or(f64::INFINITY) {
                        came_from.insert(next, current.key);
                        g_score.insert(next, tentative_g);
                        open_set.push(Reverse(OpenNode {
                            key: next,
                            g_score: FloatOrd(tentative_g),
                            f_score: FloatOrd(tentative_g + heuristic(&grid, next)),
                        }));
                    }
                }
            }
        }
    }

    let Some(final_key) = final_key else {
        return Err(FleetError::NoPath(format!(
            "air search exhausted after {nodes_expanded} nodes"
        )));
    };

    let mut keys = vec![final_key];
    let mut cursor = final_key;
    while let Some(&prev) = came_from.get(&cursor) {
        keys.push(prev);
        cursor = prev;
    }
    keys.reverse();

    let cells: Vec<Waypoint> = keys.iter().map(|&key| grid.waypoint(key)).collect();
    let mut waypoints = vec![*start];
    waypoints.extend(smooth(&grid, &cells));
    waypoints.push(goal.with_speed(config.drone_speed_mps));

    Ok(PlannedPath::new(waypoints, PathType::Air, nodes_expanded))
}

/// Collapse runs of cells that have line of sight to each other.
fn smooth(grid: &AirGrid<'_>, cells: &[Waypoint]) -> Vec<Waypoint> {
    if cells.len() <= 2 {
        return cells.to_vec();
    }

    let mut smoothed = vec![cells[0]];
    let mut current_idx = 0usize;
    while current_idx < cells.len() - 1 {
        let mut furthest_valid = current_idx + 1;
        for target_idx in (current_idx + 2)..cells.len() {
            if grid.line_of_sight(&cells[current_idx], &cells[target_idx]) {
                furthest_valid = target_idx;
            }
        }
        smoothed.push(cells[furthest_valid]);
        current_idx = furthest_valid;
    }
    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Obstacle, RestrictedArea};

    const LAT: f64 = 39.9000;
    const LON: f64 = 116.4000;

    fn endpoints() -> (Waypoint, Waypoint) {
        (Waypoint::new(LAT, LON, 30.0), Waypoint::new(LAT, LON + 0.006, 30.0))
    }

    #[test]
    fn open_sky_path_is_near_straight() {
        let world = World::default();
        let config = PlannerConfig::default();
        let (start, goal) = endpoints();
        let path = plan_air(&world, &config, &start, &goal, Utc::now()).unwrap();
        let direct = crate::spatial::haversine_distance(start.lat, start.lon, goal.lat, goal.lon);
        assert!(path.length_m < direct * 1.1, "length {} vs direct {}", path.length_m, direct);
        assert_eq!(path.path_type, PathType::Air);
    }

    #[test]
    fn path_climbs_over_or_around_tall_obstacle() {
        let obstacle = Obstacle {
            id: "block".into(),
            lat: LAT,
            lon: LON + 0.003,
            ground_elevation_m: 0.0,
            radius_m: 60.0,
            height_m: 70.0,
        };
        let world = World::new(vec![obstacle], Vec::new(), None);
        let config = PlannerConfig::default();
        let (start, goal) = endpoints();
        let at = Utc::now();
        let path = plan_air(&world, &config, &start, &goal, at).unwrap();

        for wp in &path.waypoints[1..path.waypoints.len() - 1] {
            assert!(!world.air_blocked(wp.lat, wp.lon, wp.altitude_m, config.safety_margin_m, at));
        }
        assert!(path.waypoints.len() >= 3);
    }

    #[test]
    fn goal_inside_restricted_area_is_no_path() {
        let (start, goal) = endpoints();
        let d = 0.002;
        let fence = RestrictedArea {
            id: "hospital".into(),
            polygon: vec![
                [goal.lat - d, goal.lon - d],
                [goal.lat - d, goal.lon + d],
                [goal.lat + d, goal.lon + d],
                [goal.lat + d, goal.lon - d],
            ],
            active_windows: Vec::new(),
        };
        let world = World::new(Vec::new(), vec![fence], None);
        let config = PlannerConfig { search_margin_m: 100.0, ..PlannerConfig::default() };
        let err = plan_air(&world, &config, &start, &goal, Utc::now()).unwrap_err();
        assert!(matches!(err, FleetError::NoPath(_)));
    }
}
