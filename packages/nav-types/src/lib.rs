//! # nav-types
//!
//! Shared value types and geo primitives for the Circuit Navigator suite.
//!
//! These types are used by:
//! - `navigator`: the live guidance engine and its collaborators
//! - `drive-simulator`: the GPS drive simulator feeding fixes over UDP
//!
//! ## Coordinate Conventions
//!
//! - Coordinates are WGS84 degrees (`lat`, `lon`).
//! - Headings and bearings are degrees, 0–360 clockwise from true north.
//! - Distances are meters, speeds m/s.
//!
//! ## Distance model
//!
//! Point-to-segment distance deliberately uses an equirectangular projection
//! around the segment. The approximation error is negligible below a few km,
//! and every distance threshold in the navigator (off-route bands, arrival
//! radii) was tuned against this projection. Do not swap in a geodesic
//! solver without retuning those constants.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// ── Core value types ──────────────────────────────────────────────────────────

/// One WGS84 coordinate, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// One raw location sample from the location source.
///
/// Arrives at an unbounded, hardware-driven rate. Everything beyond the
/// coordinate is optional — consumer-grade receivers omit fields freely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy estimate, meters (1-sigma).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
    /// Course over ground, degrees 0–360 clockwise from north.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    /// Ground speed, m/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    /// Capture timestamp, unix milliseconds.
    pub timestamp_ms: i64,
}

impl Fix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// One scheduled stop on a circuit. Ordered 1..N, fixed for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub location: GeoPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A previously recorded "usual path" polyline for a circuit.
///
/// When present (≥ 2 points) it is the authority for off-route detection,
/// taking precedence over the freshly computed route polyline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceTrajectory {
    pub points: Vec<GeoPoint>,
}

impl ReferenceTrajectory {
    /// Usable for off-route detection only with at least one segment.
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 2
    }
}

/// One discrete instruction from the route provider, anchored at a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Maneuver {
    /// Distance covered by this step, meters.
    pub distance_m: f64,
    /// Estimated duration of this step, seconds.
    pub duration_s: f64,
    #[serde(default)]
    pub street_name: String,
    /// Raw provider instruction text (spoken only after normalization).
    #[serde(default)]
    pub instruction: String,
    /// Provider maneuver type ("turn", "on ramp", "fork", "merge", ...).
    #[serde(default)]
    pub maneuver_type: String,
    /// Provider modifier ("left", "right", "slight left", "uturn", ...).
    #[serde(default)]
    pub modifier: String,
    pub location: GeoPoint,
}

/// Route provider output for one leg: polyline plus ordered maneuvers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    pub polyline: Vec<GeoPoint>,
    pub maneuvers: Vec<Maneuver>,
}

// ── Great-circle distance and bearing ─────────────────────────────────────────

/// Haversine great-circle distance between two points, meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial great-circle bearing from `a` to `b`, degrees 0–360 clockwise
/// from north.
pub fn bearing_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dlambda = (b.lon - a.lon).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

// ── Point-to-segment / polyline distance (equirectangular) ───────────────────

/// Project a point into a local flat frame (meters) centered on `origin`.
fn to_local_m(p: GeoPoint, origin: GeoPoint) -> (f64, f64) {
    let x = (p.lon - origin.lon).to_radians() * origin.lat.to_radians().cos() * EARTH_RADIUS_M;
    let y = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (x, y)
}

/// Perpendicular distance from `p` to segment `a`→`b`, meters.
///
/// Equirectangular projection around `a`; valid for short segments.
pub fn point_to_segment_m(p: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
    let (px, py) = to_local_m(p, a);
    let (bx, by) = to_local_m(b, a);

    let seg_len_sq = bx * bx + by * by;
    if seg_len_sq < 1e-9 {
        // Degenerate segment
        return (px * px + py * py).sqrt();
    }

    let t = ((px * bx + py * by) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * bx;
    let dy = py - t * by;
    (dx * dx + dy * dy).sqrt()
}

/// Minimum distance from `p` to a polyline, meters.
/// Returns `None` when the polyline has fewer than 2 points.
pub fn point_to_polyline_m(p: GeoPoint, line: &[GeoPoint]) -> Option<f64> {
    if line.len() < 2 {
        return None;
    }
    line.windows(2)
        .map(|w| point_to_segment_m(p, w[0], w[1]))
        .min_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
