//! Rapidly-exploring random tree for off-road ground movement.

use super::world::World;
use super::{PathType, PlannedPath};
use crate::config::PlannerConfig;
use crate::error::{FleetError, FleetResult};
use crate::models::{Position, Waypoint};
use crate::spatial::LocalFrame;
use chrono::{DateTime, Utc};
use rand::Rng;

fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Grow a tree from `start` until a node lands within `grid_size_m` of `goal`.
///
/// Results depend on `rng`; seed it for reproducible paths.
pub fn plan_rrt<R: Rng>(
    world: &World,
    config: &PlannerConfig,
    start: &Position,
    goal: &Position,
    at: DateTime<Utc>,
    rng: &mut R,
) -> FleetResult<PlannedPath> {
    let frame = LocalFrame::between(start.lat, start.lon, goal.lat, goal.lon);
    let start_xy = frame.to_local(start.lat, start.lon);
    let goal_xy = frame.to_local(goal.lat, goal.lon);
    let margin = config.safety_margin_m;

    let clear = |a: (f64, f64), b: (f64, f64)| {
        let a_geo = frame.to_geo(a.0, a.1);
        let b_geo = frame.to_geo(b.0, b.1);
        !world.ground_segment_blocked(a_geo, b_geo, margin, at)
    };

    if world.ground_blocked(goal.lat, goal.lon, margin, at) {
        return Err(FleetError::NoPath("goal lies inside an obstacle or restricted area".to_string()));
    }
    if dist(start_xy, goal_xy) <= config.grid_size_m && clear(start_xy, goal_xy) {
        return Ok(ground_path(&frame, &[start_xy, goal_xy], 0));
    }

    let pad = config.rrt_sample_margin_m.max(config.rrt_step_m);
    let (e_min, e_max) = (start_xy.0.min(goal_xy.0) - pad, start_xy.0.max(goal_xy.0) + pad);
    let (n_min, n_max) = (start_xy.1.min(goal_xy.1) - pad, start_xy.1.max(goal_xy.1) + pad);

    let mut nodes = vec![start_xy];
    let mut parents = vec![usize::MAX];

    for _ in 0..config.rrt_max_iterations {
        let sample = if rng.random::<f64>() < config.rrt_goal_bias {
            goal_xy
        } else {
            (rng.random_range(e_min..=e_max), rng.random_range(n_min..=n_max))
        };

        let Some((nearest_idx, nearest)) = nodes
            .iter()
            .copied()
            .enumerate()
            .min_by(|a, b| dist(a.1, sample).total_cmp(&dist(b.1, sample)))
        else {
            break;
        };

        let span = dist(nearest, sample);
        if span < 1e-6 {
            continue;
        }
        let reach = config.rrt_step_m.min(span) / span;
        let new = (
            nearest.0 + (sample.0 - nearest.0) * reach,
            nearest.1 + (sample.1 - nearest.1) * reach,
        );
        if !clear(nearest, new) {
            continue;
        }

        nodes.push(new);
        parents.push(nearest_idx);

        if dist(new, goal_xy) <= config.grid_size_m && clear(new, goal_xy) {
            nodes.push(goal_xy);
            parents.push(nodes.len() - 2);

            let mut chain = Vec::new();
            let mut cursor = nodes.len() - 1;
            while cursor != usize::MAX {
                chain.push(nodes[cursor]);
                cursor = parents[cursor];
            }
            chain.reverse();

            let smoothed = shortcut(&chain, &clear);
            return Ok(ground_path(&frame, &smoothed, nodes.len()));
        }
    }

    Err(FleetError::NoPath(format!(
        "RRT gave up after {} iterations",
        config.rrt_max_iterations
    )))
}

fn shortcut<F>(chain: &[(f64, f64)], clear: &F) -> Vec<(f64, f64)>
where
    F: Fn((f64, f64), (f64, f64)) -> bool,
{
    if chain.len() <= 2 {
        return chain.to_vec();
    }
    let mut out = vec![chain[0]];
    let mut idx = 0;
    while idx < chain.len() - 1 {
        let furthest = (idx + 1..chain.len())
            .rev()
            .find(|&target| clear(chain[idx], chain[target]))
            .unwrap_or(idx + 1);
        out.push(chain[furthest]);
        idx = furthest;
    }
    out
}

fn ground_path(frame: &LocalFrame, points: &[(f64, f64)], nodes_expanded: usize) -> PlannedPath {
    let waypoints = points
        .iter()
        .map(|&(e, n)| {
            let (lat, lon) = frame.to_geo(e, n);
            Waypoint::new(lat, lon, 0.0)
        })
        .collect();
    PlannedPath::new(waypoints, PathType::Ground, nodes_expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Obstacle;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const LAT: f64 = 39.9000;
    const LON: f64 = 116.4000;

    fn wall() -> Vec<Obstacle> {
        (0..5)
            .map(|i| Obstacle {
                id: format!("wall-{i}"),
                lat: LAT - 0.0008 + i as f64 * 0.0004,
                lon: LON + 0.003,
                ground_elevation_m: 0.0,
                radius_m: 25.0,
                height_m: 10.0,
            })
            .collect()
    }

    #[test]
    fn finds_collision_free_path_around_wall() {
        let world = World::new(wall(), Vec::new(), None);
        let config = PlannerConfig::default();
        let start = Position::ground(LAT, LON);
        let goal = Position::ground(LAT, LON + 0.006);
        let at = Utc::now();
        let mut rng = StdRng::seed_from_u64(7);

        let path = plan_rrt(&world, &config, &start, &goal, at, &mut rng).unwrap();
        assert_eq!(path.path_type, PathType::Ground);
        let last = path.waypoints.last().unwrap();
        assert!((last.lat - goal.lat).abs() < 1e-9 && (last.lon - goal.lon).abs() < 1e-9);
        for pair in path.waypoints.windows(2) {
            assert!(!world.ground_segment_blocked(
                (pair[0].lat, pair[0].lon),
                (pair[1].lat, pair[1].lon),
                config.safety_margin_m,
                at
            ));
        }
    }

    #[test]
    fn same_seed_reproduces_path() {
        let world = World::new(wall(), Vec::new(), None);
        let config = PlannerConfig::default();
        let start = Position::ground(LAT, LON);
        let goal = Position::ground(LAT, LON + 0.006);
        let at = Utc::now();

        let a = plan_rrt(&world, &config, &start, &goal, at, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = plan_rrt(&world, &config, &start, &goal, at, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a.waypoints, b.waypoints);
    }

    #[test]
    fn blocked_goal_is_no_path() {
        let world = World::new(wall(), Vec::new(), None);
        let config = PlannerConfig { rrt_max_iterations: 50, ..PlannerConfig::default() };
        let start = Position::ground(LAT, LON);
        let goal = Position::ground(LAT, LON + 0.003);
        let err = plan_rrt(&world, &config, &start, &goal, Utc::now(), &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(matches!(err, FleetError::NoPath(_)));
    }
}
