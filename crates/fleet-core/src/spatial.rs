//! Geometry helpers: great-circle and 3D distance, local metric frames,
//! segment proximity and point-in-polygon tests.

use crate::models::{Position, Waypoint};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate distance between two points in meters using the Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Great-circle distance between two positions, ignoring altitude.
pub fn ground_distance(a: &Position, b: &Position) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

/// Straight-line distance combining great-circle ground distance and altitude delta.
pub fn distance_3d(a: &Position, b: &Position) -> f64 {
    let horizontal = ground_distance(a, b);
    let vertical = b.altitude_m - a.altitude_m;
    (horizontal * horizontal + vertical * vertical).sqrt()
}

/// Sum of 3D leg lengths along a waypoint sequence.
pub fn path_length_m(waypoints: &[Waypoint]) -> f64 {
    waypoints
        .windows(2)
        .map(|pair| distance_3d(&pair[0].position(), &pair[1].position()))
        .sum()
}

// ==== ENU (East-North-Up) Coordinate Conversion ====

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Convert a north/south offset in meters to degrees latitude.
pub fn meters_to_lat(meters: f64, ref_lat_deg: f64) -> f64 {
    meters / meters_per_deg_lat(ref_lat_deg).max(1e-9)
}

/// Convert an east/west offset in meters to degrees longitude.
pub fn meters_to_lon(meters: f64, ref_lat_deg: f64) -> f64 {
    meters / meters_per_deg_lon(ref_lat_deg).max(1e-9)
}

/// Flat east/north projection anchored at an origin.
///
/// Planners search in this frame; at city scale the error against the
/// great-circle distance stays well under a meter per kilometer.
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    origin_lat: f64,
    origin_lon: f64,
    m_per_deg_lat: f64,
    m_per_deg_lon: f64,
}

impl LocalFrame {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            m_per_deg_lat: meters_per_deg_lat(origin_lat).max(1e-9),
            m_per_deg_lon: meters_per_deg_lon(origin_lat).max(1e-9),
        }
    }

    /// Frame centered between two points, so both sides see the same scale error.
    pub fn between(a_lat: f64, a_lon: f64, b_lat: f64, b_lon: f64) -> Self {
        Self::new((a_lat + b_lat) / 2.0, (a_lon + b_lon) / 2.0)
    }

    /// Returns (east_m, north_m).
    pub fn to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        (
            (lon - self.origin_lon) * self.m_per_deg_lon,
            (lat - self.origin_lat) * self.m_per_deg_lat,
        )
    }

    /// Returns (lat, lon).
    pub fn to_geo(&self, east_m: f64, north_m: f64) -> (f64, f64) {
        (
            self.origin_lat + north_m / self.m_per_deg_lat,
            self.origin_lon + east_m / self.m_per_deg_lon,
        )
    }
}

/// Calculate bearing from point 1 to point 2 in radians (0 = north, π/2 = east).
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y)
}

/// Offset a position by distance and bearing.
///
/// # Returns
/// (new_lat, new_lon) in degrees
pub fn offset_by_bearing(lat: f64, lon: f64, distance_m: f64, bearing_rad: f64) -> (f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon);
    }

    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lon2 = lon1 + y.atan2(x);
    lon2 =
        (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    (lat2.to_degrees(), lon2.to_degrees())
}

/// Minimum distance in meters from a point to a segment.
pub fn distance_to_segment_m(
    point_lat: f64,
    point_lon: f64,
    seg_start_lat: f64,
    seg_start_lon: f64,
    seg_end_lat: f64,
    seg_end_lon: f64,
) -> f64 {
    let frame = LocalFrame::new(seg_start_lat, seg_start_lon);
    let p = frame.to_local(point_lat, point_lon);
    let s = frame.to_local(seg_end_lat, seg_end_lon);
    point_segment_distance_2d(p, (0.0, 0.0), s)
}

/// Point-to-segment distance in an already projected frame.
pub fn point_segment_distance_2d(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (sx, sy) = (b.0 - a.0, b.1 - a.1);
    let (px, py) = (p.0 - a.0, p.1 - a.1);
    let seg_len_sq = sx * sx + sy * sy;

    if seg_len_sq < 0.0001 {
        return (px * px + py * py).sqrt();
    }

    let t = ((px * sx + py * sy) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * sx;
    let dy = py - t * sy;
    (dx * dx + dy * dy).sqrt()
}

/// Minimum horizontal distance in meters between two segments.
///
/// Crossing segments report zero; otherwise the closest endpoint-to-segment
/// distance is returned.
#[allow(clippy::too_many_arguments)]
pub fn segment_to_segment_distance(
    a1_lat: f64,
    a1_lon: f64,
    a2_lat: f64,
    a2_lon: f64,
    b1_lat: f64,
    b1_lon: f64,
    b2_lat: f64,
    b2_lon: f64,
) -> f64 {
    let frame = LocalFrame::new(
        (a1_lat + a2_lat + b1_lat + b2_lat) / 4.0,
        (a1_lon + a2_lon + b1_lon + b2_lon) / 4.0,
    );
    let a1 = frame.to_local(a1_lat, a1_lon);
    let a2 = frame.to_local(a2_lat, a2_lon);
    let b1 = frame.to_local(b1_lat, b1_lon);
    let b2 = frame.to_local(b2_lat, b2_lon);

    if segments_intersect_2d(a1, a2, b1, b2) {
        return 0.0;
    }

    point_segment_distance_2d(a1, b1, b2)
        .min(point_segment_distance_2d(a2, b1, b2))
        .min(point_segment_distance_2d(b1, a1, a2))
        .min(point_segment_distance_2d(b2, a1, a2))
}

pub fn segments_intersect_2d(a1: (f64, f64), a2: (f64, f64), b1: (f64, f64), b2: (f64, f64)) -> bool {
    // Tolerance in meters for projected coordinates.
    const EPS_M: f64 = 1e-6;

    fn orient(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
        (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
    }

    fn within(a: f64, b: f64, value: f64) -> bool {
        value >= a.min(b) - EPS_M && value <= a.max(b) + EPS_M
    }

    fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
        within(p.0, q.0, r.0) && within(p.1, q.1, r.1)
    }

    let o1 = orient(a1, a2, b1);
    let o2 = orient(a1, a2, b2);
    let o3 = orient(b1, b2, a1);
    let o4 = orient(b1, b2, a2);

    if (o1.abs() <= EPS_M && on_segment(a1, a2, b1))
        || (o2.abs() <= EPS_M && on_segment(a1, a2, b2))
        || (o3.abs() <= EPS_M && on_segment(b1, b2, a1))
        || (o4.abs() <= EPS_M && on_segment(b1, b2, a2))
    {
        return true;
    }

    let a_crosses = (o1 > EPS_M && o2 < -EPS_M) || (o1 < -EPS_M && o2 > EPS_M);
    let b_crosses = (o3 > EPS_M && o4 < -EPS_M) || (o3 < -EPS_M && o4 > EPS_M);
    a_crosses && b_crosses
}

/// Ray-casting containment test on a `[lat, lon]` polygon.
pub fn point_in_polygon(lat: f64, lon: f64, polygon: &[[f64; 2]]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;

    for i in 0..polygon.len() {
        let (yi, xi) = (polygon[i][0], polygon[i][1]);
        let (yj, xj) = (polygon[j][0], polygon[j][1]);

        if ((yi > lat) != (yj > lat)) && (lon < (xj - xi) * (lat - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Whether a segment touches a polygon: either endpoint inside, or an edge crossing.
pub fn segment_touches_polygon(
    start: (f64, f64),
    end: (f64, f64),
    polygon: &[[f64; 2]],
) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    if point_in_polygon(start.0, start.1, polygon) || point_in_polygon(end.0, end.1, polygon) {
        return true;
    }

    let frame = LocalFrame::between(start.0, start.1, end.0, end.1);
    let s = frame.to_local(start.0, start.1);
    let e = frame.to_local(end.0, end.1);
    (0..polygon.len()).any(|i| {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        segments_intersect_2d(s, e, frame.to_local(a[0], a[1]), frame.to_local(b[0], b[1]))
    })
}
