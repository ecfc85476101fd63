//! Immutable snapshot of the static environment the planners search in.

use crate::error::FleetResult;
use crate::models::{Obstacle, RestrictedArea, Waypoint};
use crate::planner::road::{RoadGraph, RoadNetwork};
use crate::spatial::{
    distance_to_segment_m, haversine_distance, meters_per_deg_lat, meters_per_deg_lon,
    segment_touches_polygon,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CELL_SIZE_M: f64 = 100.0;
/// Obstacles reaching further than this many cells are checked on every query.
const MAX_INDEX_REACH: i32 = 16;

/// Serialized form of the world, as supplied by the map data provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldData {
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    #[serde(default)]
    pub restricted_areas: Vec<RestrictedArea>,
    #[serde(default)]
    pub road_network: Option<RoadNetwork>,
}

#[derive(Debug, Clone, Copy)]
struct IndexedObstacle {
    idx: usize,
    x_m: f64,
    y_m: f64,
}

#[derive(Debug, Default)]
pub struct World {
    obstacles: Vec<Obstacle>,
    restricted_areas: Vec<RestrictedArea>,
    road: Option<RoadGraph>,
    m_per_deg_lat: f64,
    m_per_deg_lon: f64,
    obstacle_index: HashMap<(i32, i32), Vec<IndexedObstacle>>,
    wide_obstacles: Vec<IndexedObstacle>,
}

impl World {
    pub fn new(
        obstacles: Vec<Obstacle>,
        restricted_areas: Vec<RestrictedArea>,
        road: Option<RoadGraph>,
    ) -> Self {
        let mean_lat = if obstacles.is_empty() {
            0.0
        } else {
            obstacles.iter().map(|o| o.lat).sum::<f64>() / obstacles.len() as f64
        };
        let m_per_deg_lat = meters_per_deg_lat(mean_lat);
        let m_per_deg_lon = meters_per_deg_lon(mean_lat).max(1.0);
        let inv_cell = 1.0 / CELL_SIZE_M;

        let mut obstacle_index: HashMap<(i32, i32), Vec<IndexedObstacle>> = HashMap::new();
        let mut wide_obstacles = Vec::new();
        for (idx, obstacle) in obstacles.iter().enumerate() {
            let x_m = obstacle.lon * m_per_deg_lon;
            let y_m = obstacle.lat * m_per_deg_lat;
            let cell_x = (x_m * inv_cell).floor() as i32;
            let cell_y = (y_m * inv_cell).floor() as i32;
            // One extra ring covers the safety margin added at query time.
            let reach = (obstacle.radius_m.max(0.0) * inv_cell).ceil() as i32 + 1;
            let entry = IndexedObstacle { idx, x_m, y_m };
            if reach > MAX_INDEX_REACH {
                wide_obstacles.push(entry);
                continue;
            }
            for dx in -reach..=reach {
                for dy in -reach..=reach {
                    obstacle_index.entry((cell_x + dx, cell_y + dy)).or_default().push(entry);
                }
            }
        }

        Self {
            obstacles,
            restricted_areas,
            road,
            m_per_deg_lat,
            m_per_deg_lon,
            obstacle_index,
            wide_obstacles,
        }
    }

    pub fn from_data(data: WorldData) -> FleetResult<Self> {
        let road = data.road_network.map(RoadGraph::build).transpose()?;
        Ok(Self::new(data.obstacles, data.restricted_areas, road))
    }

    pub fn to_data(&self) -> WorldData {
        WorldData {
            obstacles: self.obstacles.clone(),
            restricted_areas: self.restricted_areas.clone(),
            road_network: self.road.as_ref().map(|road| road.network().clone()),
        }
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn restricted_areas(&self) -> &[RestrictedArea] {
        &self.restricted_areas
    }

    pub fn road_graph(&self) -> Option<&RoadGraph> {
        self.road.as_ref()
    }

    /// Obstacles whose disc, grown by `margin_m`, contains the point.
    fn obstacles_near(&self, lat: f64, lon: f64, margin_m: f64) -> impl Iterator<Item = &Obstacle> {
        let x_m = lon * self.m_per_deg_lon;
        let y_m = lat * self.m_per_deg_lat;
        let cell = (
            (x_m / CELL_SIZE_M).floor() as i32,
            (y_m / CELL_SIZE_M).floor() as i32,
        );
        let bucket = self.obstacle_index.get(&cell).map(Vec::as_slice).unwrap_or(&[]);
        bucket.iter().chain(&self.wide_obstacles).filter_map(move |entry| {
            let obstacle = &self.obstacles[entry.idx];
            let reach = obstacle.radius_m + margin_m;
            let dx = x_m - entry.x_m;
            let dy = y_m - entry.y_m;
            if dx * dx + dy * dy > reach * reach * 4.0 {
                return None;
            }
            (haversine_distance(lat, lon, obstacle.lat, obstacle.lon) < reach).then_some(obstacle)
        })
    }

    pub fn restricted_at(&self, lat: f64, lon: f64, at: DateTime<Utc>) -> bool {
        self.restricted_areas.iter().any(|area| area.excludes(lat, lon, at))
    }

    /// A 3D point inside an obstacle's exclusion cylinder or an active restricted area.
    pub fn air_blocked(&self, lat: f64, lon: f64, altitude_m: f64, margin_m: f64, at: DateTime<Utc>) -> bool {
        self.obstacles_near(lat, lon, margin_m).any(|o| altitude_m <= o.top_m())
            || self.restricted_at(lat, lon, at)
    }

    /// A ground point inside any obstacle footprint or active restricted area.
    pub fn ground_blocked(&self, lat: f64, lon: f64, margin_m: f64, at: DateTime<Utc>) -> bool {
        self.obstacles_near(lat, lon, margin_m).next().is_some() || self.restricted_at(lat, lon, at)
    }

    pub fn ground_segment_blocked(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        margin_m: f64,
        at: DateTime<Utc>,
    ) -> bool {
        let hits_obstacle = self.obstacles.iter().any(|o| {
            distance_to_segment_m(o.lat, o.lon, start.0, start.1, end.0, end.1) < o.radius_m + margin_m
        });
        hits_obstacle
            || self
                .restricted_areas
                .iter()
                .any(|area| area.is_active(at) && segment_touches_polygon(start, end, &area.polygon))
    }

    /// Sample a 3D segment every `step_m` and test each sample.
    pub fn air_segment_blocked(
        &self,
        start: &Waypoint,
        end: &Waypoint,
        margin_m: f64,
        step_m: f64,
        at: DateTime<Utc>,
    ) -> bool {
        let distance_m = haversine_distance(start.lat, start.lon, end.lat, end.lon);
        let steps = ((distance_m / step_m.max(1.0)).ceil() as usize).clamp(1, 2000);
        (0..=steps).any(|i| {
            let t = i as f64 / steps as f64;
            self.air_blocked(
                start.lat + t * (end.lat - start.lat),
                start.lon + t * (end.lon - start.lon),
                start.altitude_m + t * (end.altitude_m - start.altitude_m),
                margin_m,
                at,
            )
        })
    }

    /// Tallest obstacle top within `margin_m` of a track, or 0 with none.
    pub fn tallest_along(&self, track: &[Waypoint], margin_m: f64) -> f64 {
        self.obstacles
            .iter()
            .filter(|o| {
                track.windows(2).any(|w| {
                    distance_to_segment_m(o.lat, o.lon, w[0].lat, w[0].lon, w[1].lat, w[1].lon)
                        <= o.radius_m + margin_m
                })
            })
            .map(Obstacle::top_m)
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeWindow;
    use chrono::Duration;

    fn tower(lat: f64, lon: f64) -> Obstacle {
        Obstacle {
            id: "tower".into(),
            lat,
            lon,
            ground_elevation_m: 0.0,
            radius_m: 30.0,
            height_m: 60.0,
        }
    }

    #[test]
    fn wide_obstacle_blocks_its_whole_disc() {
        let plateau = Obstacle { radius_m: 2_500.0, ..tower(39.9, 116.4) };
        let world = World::new(vec![plateau], Vec::new(), None);
        let now = Utc::now();
        // ~2.1km east of the centre, well past the indexed neighbourhood
        assert!(world.air_blocked(39.9, 116.425, 40.0, 5.0, now));
        assert!(world.ground_blocked(39.9, 116.425, 5.0, now));
        assert!(!world.air_blocked(39.9, 116.45, 40.0, 5.0, now));
    }

    #[test]
    fn obstacle_cylinder_blocks_below_its_top_only() {
        let world = World::new(vec![tower(39.9, 116.4)], Vec::new(), None);
        let now = Utc::now();
        assert!(world.air_blocked(39.9, 116.4, 40.0, 5.0, now));
        assert!(!world.air_blocked(39.9, 116.4, 70.0, 5.0, now));
        assert!(!world.air_blocked(39.91, 116.4, 40.0, 5.0, now));
        assert!(world.ground_blocked(39.9, 116.4, 5.0, now));
    }

    #[test]
    fn restricted_area_respects_time_windows() {
        let now = Utc::now();
        let area = RestrictedArea {
            id: "stadium".into(),
            polygon: vec![[39.0, 116.0], [39.0, 117.0], [40.0, 117.0], [40.0, 116.0]],
            active_windows: vec![TimeWindow { start: now, end: now + Duration::hours(1) }],
        };
        let world = World::new(Vec::new(), vec![area], None);
        assert!(world.restricted_at(39.5, 116.5, now + Duration::minutes(5)));
        assert!(!world.restricted_at(39.5, 116.5, now + Duration::hours(2)));
    }

    #[test]
    fn segment_checks_catch_pass_through() {
        let world = World::new(vec![tower(39.9, 116.405)], Vec::new(), None);
        let now = Utc::now();
        assert!(world.ground_segment_blocked((39.9, 116.40), (39.9, 116.41), 5.0, now));
        let low = [Waypoint::new(39.9, 116.40, 40.0), Waypoint::new(39.9, 116.41, 40.0)];
        assert!(world.air_segment_blocked(&low[0], &low[1], 5.0, 10.0, now));
        assert_eq!(world.tallest_along(&low, 5.0), 60.0);
    }
}
