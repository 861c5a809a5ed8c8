//! Fixed-point coordinates, edges and point-to-segment projection
//!
//! Coordinates are stored as degrees scaled by 1e5 in signed 32-bit
//! integers (roughly 1.1 m of resolution at the equator). Projection
//! treats lat/lon as orthogonal planar axes: good enough to rank nearby
//! candidates, not a metric distance.

/// Fixed-point scale: degrees × 1e5
pub const COORDINATE_SCALE: f64 = 100_000.0;

/// Legal latitude range in fixed-point units
pub const MIN_LAT: i32 = -90 * 100_000;
pub const MAX_LAT: i32 = 90 * 100_000;

/// Legal longitude range in fixed-point units
pub const MIN_LON: i32 = -180 * 100_000;
pub const MAX_LON: i32 = 180 * 100_000;

/// A geographic coordinate in fixed-point degrees
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate {
    pub lat: i32,
    pub lon: i32,
}

impl Coordinate {
    pub const fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    /// Whether both components are inside the legal range
    pub fn is_valid(&self) -> bool {
        (MIN_LAT..=MAX_LAT).contains(&self.lat) && (MIN_LON..=MAX_LON).contains(&self.lon)
    }
}

/// A directed road-graph edge with the coordinates of its endpoints.
///
/// The node ids are opaque to the index; geometry is treated as an
/// undirected segment. The derived ordering (start, target, coordinates)
/// is the canonical record order inside a bucket slab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub start: u32,
    pub target: u32,
    pub start_coord: Coordinate,
    pub target_coord: Coordinate,
}

impl Edge {
    pub const fn new(start: u32, target: u32, start_coord: Coordinate, target_coord: Coordinate) -> Self {
        Self {
            start,
            target,
            start_coord,
            target_coord,
        }
    }
}

/// Result of projecting a point onto a segment
#[derive(Clone, Copy, Debug)]
pub struct Projection {
    /// Closest point on the segment, truncated to fixed-point
    pub nearest: Coordinate,
    /// Position of the foot point along the segment, clamped to [0, 1]
    pub ratio: f64,
    /// Squared planar distance from the input to the foot point
    pub distance_sq: f64,
}

/// Project `input` onto the segment `source`-`target`.
///
/// All arithmetic runs in `f64`; 32-bit fixed-point values would overflow
/// the squared terms. The foot point is truncated toward zero when stored
/// back into fixed-point, which keeps ranking exact but makes the returned
/// coordinate unsuitable for metric reporting.
pub fn project_onto_segment(input: &Coordinate, source: &Coordinate, target: &Coordinate) -> Projection {
    let v_lat = target.lat as f64 - source.lat as f64;
    let v_lon = target.lon as f64 - source.lon as f64;

    let w_lat = input.lat as f64 - source.lat as f64;
    let w_lon = input.lon as f64 - source.lon as f64;

    let length_sq = v_lat * v_lat + v_lon * v_lon;

    let ratio = if length_sq == 0.0 {
        0.0
    } else {
        (v_lat * w_lat + v_lon * w_lon) / length_sq
    };

    if ratio <= 0.0 {
        return Projection {
            nearest: *source,
            ratio: 0.0,
            distance_sq: w_lat * w_lat + w_lon * w_lon,
        };
    }
    if ratio >= 1.0 {
        let d_lat = input.lat as f64 - target.lat as f64;
        let d_lon = input.lon as f64 - target.lon as f64;
        return Projection {
            nearest: *target,
            ratio: 1.0,
            distance_sq: d_lat * d_lat + d_lon * d_lon,
        };
    }

    let foot_lat = source.lat as f64 + ratio * v_lat;
    let foot_lon = source.lon as f64 + ratio * v_lon;
    let d_lat = foot_lat - input.lat as f64;
    let d_lon = foot_lon - input.lon as f64;

    Projection {
        nearest: Coordinate::new(foot_lat as i32, foot_lon as i32),
        ratio,
        distance_sq: d_lat * d_lat + d_lon * d_lon,
    }
}
