//! Drone route selection across air, above-road and split candidates.

use super::air::plan_air;
use super::world::World;
use super::{PathType, PlannedPath};
use crate::config::PlannerConfig;
use crate::error::{FleetError, FleetResult};
use crate::flight::{tracks_conflict, windows_overlap, Separation};
use crate::models::{RoutePlan, Waypoint};
use crate::spatial::{bearing, haversine_distance, offset_by_bearing};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::f64::consts::FRAC_PI_2;

/// Score card for one hybrid candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub path_type: PathType,
    pub length_m: f64,
    pub conflicts: usize,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct HybridPlan {
    pub chosen: PlannedPath,
    pub candidates: Vec<CandidateScore>,
}

/// Road path lifted to a single cruise altitude that clears everything along it.
pub fn plan_above_road(
    world: &World,
    config: &PlannerConfig,
    start: &Waypoint,
    goal: &Waypoint,
    at: DateTime<Utc>,
) -> FleetResult<PlannedPath> {
    let Some(road) = world.road_graph() else {
        return Err(FleetError::NoPath("no road network loaded".to_string()));
    };
    let road_path = road.shortest_path((start.lat, start.lon), (goal.lat, goal.lon), at, |lat, lon, at| {
        world.restricted_at(lat, lon, at)
    })?;

    let mut track = vec![*start];
    track.extend(road_path.nodes.iter().map(|node| Waypoint::new(node.lat, node.lon, 0.0)));
    track.push(*goal);

    let cruise = config
        .above_road_altitude_m
        .max(world.tallest_along(&track, config.safety_margin_m) + config.safety_margin_m);
    if cruise > config.max_altitude_m {
        return Err(FleetError::NoPath(format!(
            "above-road corridor needs {cruise:.0}m, ceiling is {:.0}m",
            config.max_altitude_m
        )));
    }

    let last = track.len() - 1;
    let waypoints = track
        .into_iter()
        .enumerate()
        .map(|(idx, wp)| {
            let altitude_m = if idx == 0 || idx == last { wp.altitude_m } else { cruise };
            Waypoint { altitude_m, ..wp }.with_speed(config.drone_speed_mps)
        })
        .collect();
    Ok(PlannedPath::new(waypoints, PathType::AboveRoad, road_path.nodes.len()))
}

/// Two air legs through a midpoint pushed sideways off the direct line.
pub fn plan_split(
    world: &World,
    config: &PlannerConfig,
    start: &Waypoint,
    goal: &Waypoint,
    at: DateTime<Utc>,
) -> FleetResult<PlannedPath> {
    let heading = bearing(start.lat, start.lon, goal.lat, goal.lon);
    let (mid_lat, mid_lon) = offset_by_bearing(
        (start.lat + goal.lat) / 2.0,
        (start.lon + goal.lon) / 2.0,
        config.split_offset_m,
        heading + FRAC_PI_2,
    );
    let cruise = (config.min_altitude_m + config.max_altitude_m) / 2.0;
    let midpoint = Waypoint::new(mid_lat, mid_lon, cruise).with_speed(config.drone_speed_mps);

    let first = plan_air(world, config, start, &midpoint, at)?;
    let second = plan_air(world, config, &midpoint, goal, at)?;
    let mut joined = first.concat(second);
    joined.path_type = PathType::Split;
    Ok(joined)
}

/// Number of live routes a candidate would come too close to.
pub fn count_conflicts(
    path: &PlannedPath,
    active: &[RoutePlan],
    separation: Separation,
    departure: DateTime<Utc>,
    speed_mps: f64,
) -> usize {
    let duration_s = path.length_m / speed_mps.max(0.1);
    let end = departure + Duration::milliseconds((duration_s * 1000.0) as i64);
    active
        .iter()
        .filter(|route| route.status.is_live())
        .filter(|route| windows_overlap(departure, end, route.start_time, route.end_time(), 0.0))
        .filter(|route| {
            tracks_conflict(&path.waypoints, &route.waypoints, separation.horizontal_m, separation.vertical_m)
        })
        .count()
}

/// Pick the best of the three drone candidates.
pub fn plan_hybrid(
    world: &World,
    config: &PlannerConfig,
    start: &Waypoint,
    goal: &Waypoint,
    at: DateTime<Utc>,
    active: &[RoutePlan],
    separation: Separation,
) -> FleetResult<HybridPlan> {
    let attempts = [
        plan_air(world, config, start, goal, at),
        plan_above_road(world, config, start, goal, at),
        plan_split(world, config, start, goal, at),
    ];

    let mut candidates = Vec::new();
    let mut best: Option<(f64, PlannedPath)> = None;
    let mut last_error = None;

    for attempt in attempts {
        let path = match attempt {
            Ok(path) => path,
            Err(err) => {
                last_error = Some(err);
                continue;
            }
        };
        let conflicts = count_conflicts(&path, active, separation, at, config.drone_speed_mps);
        let score = path.length_m + conflicts as f64 * config.conflict_penalty_m;
        candidates.push(CandidateScore {
            path_type: path.path_type,
            length_m: path.length_m,
            conflicts,
            score,
        });
        if best.as_ref().map_or(true, |(best_score, _)| score < *best_score) {
            best = Some((score, path));
        }
    }

    match best {
        Some((_, chosen)) => Ok(HybridPlan { chosen, candidates }),
        None => Err(last_error.unwrap_or_else(|| {
            FleetError::NoPath(format!(
                "no drone route between ({:.5}, {:.5}) and ({:.5}, {:.5}), {:.0}m apart",
                start.lat,
                start.lon,
                goal.lat,
                goal.lon,
                haversine_distance(start.lat, start.lon, goal.lat, goal.lon)
            ))
        })),
    }
}
