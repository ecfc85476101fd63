//! Altitude and time-slot allocation for drone routes.
//!
//! The scheduler owns the set of live (`Scheduled`/`Active`) routes. Each
//! allocation climbs a discrete altitude ladder from the minimum safe
//! altitude of the ground track and takes the first layer that keeps
//! separation from every live route whose time window overlaps.
//! Completed and aborted routes move to an archive and never block.

use crate::config::FlightConfig;
use crate::error::{EntityKind, FleetError, FleetResult};
use crate::models::{Obstacle, RoutePlan, RouteStatus, TaskPriority, Waypoint};
use crate::spatial::{
    distance_3d, distance_to_segment_m, haversine_distance, meters_per_deg_lat, meters_per_deg_lon,
    segment_to_segment_distance,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

const ROUTE_ID_PREFIX: &str = "RP-";

/// Separation minima applied between two tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Separation {
    pub horizontal_m: f64,
    pub vertical_m: f64,
}

impl From<&FlightConfig> for Separation {
    fn from(config: &FlightConfig) -> Self {
        Self {
            horizontal_m: config.min_separation_m,
            vertical_m: config.vertical_separation_m,
        }
    }
}

/// Route submitted for altitude assignment.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub vehicle_id: String,
    pub task_id: Option<String>,
    /// Ground track; altitudes are replaced by the assigned layer
    pub waypoints: Vec<Waypoint>,
    pub start_time: DateTime<Utc>,
    pub priority: TaskPriority,
}

/// Whether two tracks come within separation minima anywhere.
///
/// A pair of legs conflicts when their horizontal distance is below
/// `min_sep_m` and their altitude ranges are closer than `vert_sep_m`.
pub fn tracks_conflict(a: &[Waypoint], b: &[Waypoint], min_sep_m: f64, vert_sep_m: f64) -> bool {
    for wa in legs(a) {
        for wb in legs(b) {
            let (a1, a2) = wa;
            let (b1, b2) = wb;
            let horizontal = segment_to_segment_distance(
                a1.lat, a1.lon, a2.lat, a2.lon, b1.lat, b1.lon, b2.lat, b2.lon,
            );
            if horizontal >= min_sep_m {
                continue;
            }
            let gap = vertical_gap(
                (a1.altitude_m, a2.altitude_m),
                (b1.altitude_m, b2.altitude_m),
            );
            if gap < vert_sep_m {
                return true;
            }
        }
    }

    // Waypoint pairs as a fallback for degenerate tracks
    a.iter().any(|p| {
        b.iter().any(|q| {
            haversine_distance(p.lat, p.lon, q.lat, q.lon) < min_sep_m
                && (p.altitude_m - q.altitude_m).abs() < vert_sep_m
        })
    })
}

/// Consecutive waypoint pairs; a single waypoint yields one zero-length leg.
fn legs(track: &[Waypoint]) -> Vec<(&Waypoint, &Waypoint)> {
    match track.len() {
        0 => Vec::new(),
        1 => vec![(&track[0], &track[0])],
        _ => track.windows(2).map(|w| (&w[0], &w[1])).collect(),
    }
}

fn vertical_gap(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (a_lo, a_hi) = (a.0.min(a.1), a.0.max(a.1));
    let (b_lo, b_hi) = (b.0.min(b.1), b.0.max(b.1));
    (b_lo - a_hi).max(a_lo - b_hi).max(0.0)
}

pub fn windows_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
    buffer_s: f64,
) -> bool {
    let buffer = Duration::milliseconds((buffer_s * 1000.0) as i64);
    a_start - buffer <= b_end && b_start - buffer <= a_end
}

/// Flight time along a track using per-waypoint speeds, falling back to cruise speed.
pub fn estimate_duration_s(waypoints: &[Waypoint], cruise_speed_mps: f64) -> f64 {
    waypoints
        .windows(2)
        .map(|w| {
            let speed = w[1].speed_mps.unwrap_or(cruise_speed_mps).max(0.1);
            distance_3d(&w[0].position(), &w[1].position()) / speed
        })
        .sum()
}

#[derive(Debug)]
pub struct FlightScheduler {
    config: FlightConfig,
    live: HashMap<String, RoutePlan>,
    archive: HashMap<String, RoutePlan>,
    next_seq: u64,
}

impl FlightScheduler {
    pub fn new(config: FlightConfig) -> Self {
        Self {
            config,
            live: HashMap::new(),
            archive: HashMap::new(),
            next_seq: 1,
        }
    }

    pub fn config(&self) -> &FlightConfig {
        &self.config
    }

    /// Lowest altitude that clears every obstacle under the track by the clearance margin.
    pub fn minimum_safe_altitude(&self, track: &[Waypoint], obstacles: &[Obstacle]) -> f64 {
        let clearance = self.config.obstacle_clearance_m;
        let tallest = obstacles
            .iter()
            .filter(|obstacle| {
                legs(track).into_iter().any(|(a, b)| {
                    distance_to_segment_m(obstacle.lat, obstacle.lon, a.lat, a.lon, b.lat, b.lon)
                        <= obstacle.radius_m + clearance
                })
            })
            .map(|obstacle| obstacle.top_m() + clearance)
            .fold(f64::NEG_INFINITY, f64::max);
        tallest.max(self.config.min_altitude_m)
    }

    /// Assign the lowest conflict-free layer to a route.
    pub fn allocate(&mut self, request: RouteRequest, obstacles: &[Obstacle]) -> FleetResult<RoutePlan> {
        if request.waypoints.is_empty() {
            return Err(FleetError::Invalid(format!(
                "route for {} has no waypoints",
                request.vehicle_id
            )));
        }

        let min_safe = self.minimum_safe_altitude(&request.waypoints, obstacles);
        let flat = at_altitude(&request.waypoints, 0.0);
        let duration_s = estimate_duration_s(&flat, self.config.cruise_speed_mps);
        let start = request.start_time;
        let end = start + Duration::milliseconds((duration_s * 1000.0) as i64);

        let overlapping: Vec<&RoutePlan> = self
            .live
            .values()
            .filter(|route| route.vehicle_id != request.vehicle_id)
            .filter(|route| windows_overlap(start, end, route.start_time, route.end_time(), self.config.time_buffer_s))
            .collect();

        let cells = self.cells(&request.waypoints);
        for cell in &cells {
            let active = overlapping
                .iter()
                .filter(|route| self.cells(&route.waypoints).contains(cell))
                .count();
            if active >= self.config.max_routes_per_cell {
                return Err(FleetError::AirspaceSaturated { active });
            }
        }

        for altitude in self.config.altitude_ladder() {
            if altitude + 1e-9 < min_safe {
                continue;
            }
            let candidate = at_altitude(&request.waypoints, altitude);
            let clear = overlapping.iter().all(|route| {
                !tracks_conflict(
                    &candidate,
                    &route.waypoints,
                    self.config.min_separation_m,
                    self.config.vertical_separation_m,
                )
            });
            if !clear {
                continue;
            }

            let plan = RoutePlan {
                id: format!("{ROUTE_ID_PREFIX}{:06}", self.next_seq),
                vehicle_id: request.vehicle_id,
                task_id: request.task_id,
                waypoints: candidate,
                start_time: start,
                estimated_duration_s: duration_s,
                priority: request.priority,
                altitude_m: altitude,
                status: RouteStatus::Scheduled,
            };
            self.next_seq += 1;
            self.live.insert(plan.id.clone(), plan.clone());
            return Ok(plan);
        }

        Err(FleetError::NoSafeAltitude(request.vehicle_id))
    }

    pub fn update_status(&mut self, route_id: &str, status: RouteStatus) -> FleetResult<RoutePlan> {
        let Some(route) = self.live.get_mut(route_id) else {
            if self.archive.contains_key(route_id) {
                return Err(FleetError::Invalid(format!("route {route_id} is already closed")));
            }
            return Err(FleetError::not_found(EntityKind::Route, route_id));
        };

        match (route.status, status) {
            (RouteStatus::Scheduled, RouteStatus::Active)
            | (RouteStatus::Scheduled | RouteStatus::Active, RouteStatus::Completed | RouteStatus::Aborted) => {}
            (from, to) if from == to => return Ok(route.clone()),
            (from, to) => {
                return Err(FleetError::Invalid(format!(
                    "route {route_id} cannot move from {from:?} to {to:?}"
                )))
            }
        }

        if status.is_live() {
            route.status = status;
            return Ok(route.clone());
        }
        self.close(route_id, status)
            .ok_or_else(|| FleetError::not_found(EntityKind::Route, route_id))
    }

    /// Move a live route into the archive with a closing status.
    fn close(&mut self, route_id: &str, status: RouteStatus) -> Option<RoutePlan> {
        let mut route = self.live.remove(route_id)?;
        route.status = status;
        self.archive.insert(route.id.clone(), route.clone());
        Some(route)
    }

    /// Reload live routes after a restart. Closed routes are skipped.
    ///
    /// Returns how many routes were reinstated.
    pub fn restore(&mut self, routes: impl IntoIterator<Item = RoutePlan>) -> usize {
        let mut restored = 0;
        for route in routes {
            self.reserve_id(&route.id);
            if route.status.is_live() && !self.live.contains_key(&route.id) {
                self.live.insert(route.id.clone(), route);
                restored += 1;
            }
        }
        restored
    }

    /// Keep generated ids clear of `route_id`, which may still be referenced elsewhere.
    pub fn reserve_id(&mut self, route_id: &str) {
        if let Some(seq) = route_id.strip_prefix(ROUTE_ID_PREFIX).and_then(|raw| raw.parse::<u64>().ok()) {
            self.next_seq = self.next_seq.max(seq + 1);
        }
    }

    /// Live routes ordered by start time.
    pub fn active_routes(&self) -> Vec<RoutePlan> {
        let mut routes: Vec<RoutePlan> = self.live.values().cloned().collect();
        routes.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        routes
    }

    pub fn get(&self, route_id: &str) -> Option<&RoutePlan> {
        self.live.get(route_id).or_else(|| self.archive.get(route_id))
    }

    /// Promote scheduled routes whose departure time has passed.
    pub fn activate_due(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut activated = Vec::new();
        for route in self.live.values_mut() {
            if route.status == RouteStatus::Scheduled && route.start_time <= now {
                route.status = RouteStatus::Active;
                activated.push(route.id.clone());
            }
        }
        activated.sort();
        activated
    }

    /// Abort every live route of a vehicle.
    pub fn abort_for_vehicle(&mut self, vehicle_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .live
            .values()
            .filter(|route| route.vehicle_id == vehicle_id)
            .map(|route| route.id.clone())
            .collect();
        for id in &ids {
            self.close(id, RouteStatus::Aborted);
        }
        ids
    }

    /// Drop archived routes that ended before `cutoff`.
    pub fn prune_archive(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.archive.len();
        self.archive.retain(|_, route| route.end_time() >= cutoff);
        before - self.archive.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn archived(&self) -> impl Iterator<Item = &RoutePlan> {
        self.archive.values()
    }

    /// Airspace cells touched by a track.
    fn cells(&self, track: &[Waypoint]) -> HashSet<(i64, i64)> {
        let size = self.config.cell_size_m.max(1.0);
        let key = |lat: f64, lon: f64| {
            (
                (lat * meters_per_deg_lat(lat) / size).floor() as i64,
                (lon * meters_per_deg_lon(lat) / size).floor() as i64,
            )
        };

        let mut cells = HashSet::new();
        for (a, b) in legs(track) {
            let length = haversine_distance(a.lat, a.lon, b.lat, b.lon);
            let steps = (length / (size / 4.0)).ceil().max(1.0) as usize;
            for i in 0..=steps {
                let t = i as f64 / steps as f64;
                cells.insert(key(a.lat + (b.lat - a.lat) * t, a.lon + (b.lon - a.lon) * t));
            }
        }
        cells
    }
}

fn at_altitude(track: &[Waypoint], altitude_m: f64) -> Vec<Waypoint> {
    track
        .iter()
        .map(|wp| Waypoint { altitude_m, ..*wp })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::meters_to_lat;

    const LAT: f64 = 39.9000;
    const LON: f64 = 116.4000;

    fn corridor(offset_north_m: f64) -> Vec<Waypoint> {
        let dlat = meters_to_lat(offset_north_m, LAT);
        vec![
            Waypoint::new(LAT + dlat, LON, 0.0),
            Waypoint::new(LAT + dlat, LON + 0.01, 0.0),
        ]
    }

    fn request(vehicle: &str, track: Vec<Waypoint>, start: DateTime<Utc>) -> RouteRequest {
        RouteRequest {
            vehicle_id: vehicle.to_string(),
            task_id: None,
            waypoints: track,
            start_time: start,
            priority: TaskPriority::Normal,
        }
    }

    fn tower() -> Obstacle {
        Obstacle {
            id: "tower".into(),
            lat: LAT,
            lon: LON + 0.005,
            ground_elevation_m: 0.0,
            radius_m: 20.0,
            height_m: 30.0,
        }
    }

    fn assert_separated(routes: &[RoutePlan], config: &FlightConfig) {
        for (i, a) in routes.iter().enumerate() {
            for b in &routes[i + 1..] {
                assert!(
                    !tracks_conflict(&a.waypoints, &b.waypoints, config.min_separation_m, config.vertical_separation_m),
                    "{} at {}m conflicts with {} at {}m",
                    a.id,
                    a.altitude_m,
                    b.id,
                    b.altitude_m
                );
            }
        }
    }

    #[test]
    fn second_route_in_corridor_moves_up_a_layer() {
        let mut scheduler = FlightScheduler::new(FlightConfig::default());
        let now = Utc::now();
        let obstacles = [tower()];

        let first = scheduler.allocate(request("DRONE_1", corridor(0.0), now), &obstacles).unwrap();
        assert_eq!(first.altitude_m, 40.0);

        let second = scheduler
            .allocate(request("DRONE_2", corridor(0.0), now + Duration::minutes(2)), &obstacles)
            .unwrap();
        assert!(second.altitude_m >= first.altitude_m + 10.0);
        assert_separated(&scheduler.active_routes(), scheduler.config());
    }

    #[test]
    fn laterally_separated_route_keeps_low_layer() {
        let mut scheduler = FlightScheduler::new(FlightConfig::default());
        let now = Utc::now();
        let first = scheduler.allocate(request("DRONE_1", corridor(0.0), now), &[]).unwrap();
        let second = scheduler.allocate(request("DRONE_2", corridor(80.0), now), &[]).unwrap();
        assert_eq!(first.altitude_m, 30.0);
        assert_eq!(second.altitude_m, 30.0);
    }

    #[test]
    fn stacked_routes_stay_separated_until_cell_saturates() {
        let config = FlightConfig::default();
        let mut scheduler = FlightScheduler::new(config.clone());
        let now = Utc::now();

        for i in 0..config.max_routes_per_cell {
            let start = now + Duration::seconds(i as i64 * 30);
            scheduler.allocate(request(&format!("D{i}"), corridor(0.0), start), &[]).unwrap();
        }
        assert_separated(&scheduler.active_routes(), &config);

        let err = scheduler.allocate(request("D_extra", corridor(0.0), now), &[]).unwrap_err();
        assert!(matches!(err, FleetError::AirspaceSaturated { active: 5 }));
    }

    #[test]
    fn ceiling_exhaustion_is_no_safe_altitude() {
        let config = FlightConfig { max_altitude_m: 40.0, ..FlightConfig::default() };
        let mut scheduler = FlightScheduler::new(config);
        let now = Utc::now();
        scheduler.allocate(request("D1", corridor(0.0), now), &[]).unwrap();
        scheduler.allocate(request("D2", corridor(0.0), now), &[]).unwrap();
        let err = scheduler.allocate(request("D3", corridor(0.0), now), &[]).unwrap_err();
        assert_eq!(err, FleetError::NoSafeAltitude("D3".into()));
    }

    #[test]
    fn obstacle_above_ceiling_is_no_safe_altitude() {
        let mut scheduler = FlightScheduler::new(FlightConfig::default());
        let skyscraper = Obstacle { height_m: 130.0, ..tower() };
        let err = scheduler.allocate(request("D1", corridor(0.0), Utc::now()), &[skyscraper]).unwrap_err();
        assert!(matches!(err, FleetError::NoSafeAltitude(_)));
    }

    #[test]
    fn aborted_route_frees_its_layer_immediately() {
        let mut scheduler = FlightScheduler::new(FlightConfig::default());
        let now = Utc::now();
        let first = scheduler.allocate(request("D1", corridor(0.0), now), &[]).unwrap();
        scheduler.update_status(&first.id, RouteStatus::Aborted).unwrap();

        let second = scheduler.allocate(request("D2", corridor(0.0), now), &[]).unwrap();
        assert_eq!(second.altitude_m, 30.0);
        assert_eq!(scheduler.live_count(), 1);
        assert_eq!(scheduler.get(&first.id).map(|r| r.status), Some(RouteStatus::Aborted));
    }

    #[test]
    fn disjoint_time_windows_share_a_layer() {
        let mut scheduler = FlightScheduler::new(FlightConfig::default());
        let now = Utc::now();
        let first = scheduler.allocate(request("D1", corridor(0.0), now), &[]).unwrap();
        let later = scheduler
            .allocate(request("D2", corridor(0.0), now + Duration::hours(2)), &[])
            .unwrap();
        assert_eq!(first.altitude_m, later.altitude_m);
    }

    #[test]
    fn status_updates_follow_route_lifecycle() {
        let mut scheduler = FlightScheduler::new(FlightConfig::default());
        let now = Utc::now();
        let route = scheduler.allocate(request("D1", corridor(0.0), now), &[]).unwrap();

        assert_eq!(scheduler.activate_due(now + Duration::seconds(1)), vec![route.id.clone()]);
        assert!(scheduler.update_status(&route.id, RouteStatus::Scheduled).is_err());
        scheduler.update_status(&route.id, RouteStatus::Completed).unwrap();
        assert!(scheduler.active_routes().is_empty());
        assert!(scheduler.update_status(&route.id, RouteStatus::Active).is_err());
        assert!(matches!(
            scheduler.update_status("RP-missing", RouteStatus::Active),
            Err(FleetError::NotFound { kind: EntityKind::Route, .. })
        ));

        let pruned = scheduler.prune_archive(now + Duration::hours(1));
        assert_eq!(pruned, 1);
    }

    #[test]
    fn abort_for_vehicle_archives_only_that_vehicles_routes() {
        let mut scheduler = FlightScheduler::new(FlightConfig::default());
        let now = Utc::now();
        let mine = scheduler.allocate(request("D1", corridor(0.0), now), &[]).unwrap();
        let other = scheduler.allocate(request("D2", corridor(200.0), now), &[]).unwrap();

        assert_eq!(scheduler.abort_for_vehicle("D1"), vec![mine.id.clone()]);
        assert_eq!(scheduler.get(&mine.id).map(|r| r.status), Some(RouteStatus::Aborted));
        assert_eq!(scheduler.get(&other.id).map(|r| r.status), Some(RouteStatus::Scheduled));
        assert_eq!(scheduler.live_count(), 1);
        assert!(scheduler.abort_for_vehicle("D1").is_empty());
    }

    #[test]
    fn restored_routes_block_and_ids_continue() {
        let now = Utc::now();
        let mut before = FlightScheduler::new(FlightConfig::default());
        let flying = before.allocate(request("D1", corridor(0.0), now), &[]).unwrap();
        let done = before.allocate(request("D9", corridor(500.0), now), &[]).unwrap();
        before.update_status(&done.id, RouteStatus::Completed).unwrap();

        let mut after = FlightScheduler::new(FlightConfig::default());
        let closed = before.get(&done.id).cloned().unwrap();
        assert_eq!(after.restore([flying.clone(), closed]), 1);
        after.reserve_id("RP-000007");
        after.reserve_id("not-a-route");

        let next = after.allocate(request("D2", corridor(0.0), now), &[]).unwrap();
        assert_eq!(next.id, "RP-000008");
        assert!(next.altitude_m >= flying.altitude_m + 10.0);
        assert_separated(&after.active_routes(), after.config());
    }

    #[test]
    fn vertical_gap_of_one_layer_is_enough() {
        let a = at_altitude(&corridor(0.0), 40.0);
        let b = at_altitude(&corridor(0.0), 50.0);
        assert!(!tracks_conflict(&a, &b, 50.0, 10.0));
        let c = at_altitude(&corridor(0.0), 45.0);
        assert!(tracks_conflict(&a, &c, 50.0, 10.0));
    }
}
