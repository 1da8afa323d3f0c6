//! vehicle_sim.rs — Vehicle physics and GPS sampling
//!
//! Drives a simulated bus along a configured route polyline:
//! - Position advances along the polyline at the current speed
//! - Speed approaches the target with a first-order lag (no teleporting
//!   between speed settings)
//! - Heading follows the active segment's bearing
//! - GPS samples add Gaussian position noise, heading jitter and a reported
//!   accuracy figure; scenarios scale the noise or push the vehicle sideways
//!
//! All math, no I/O. The UDP side lives in udp_tx.rs.

use nav_types::{bearing_deg, haversine_m, Fix, GeoPoint};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use crate::scenarios::ScenarioConfig;

const M_PER_DEG_LAT: f64 = 111_194.93;

/// Offset a point by metric east/north deltas.
fn offset_m(p: GeoPoint, east_m: f64, north_m: f64) -> GeoPoint {
    GeoPoint::new(
        p.lat + north_m / M_PER_DEG_LAT,
        p.lon + east_m / (M_PER_DEG_LAT * p.lat.to_radians().cos()),
    )
}

// ── Vehicle state ─────────────────────────────────────────────────────────────

pub struct VehicleSim {
    route: Vec<GeoPoint>,
    seg_lengths: Vec<f64>,
    seg_index: usize,
    seg_progress_m: f64,
    speed_mps: f64,
    target_speed_mps: f64,
    pub t_elapsed: f64,
}

impl VehicleSim {
    /// Route must have at least 2 points; the caller validates config.
    pub fn new(route: Vec<GeoPoint>, target_speed_mps: f64) -> Self {
        let seg_lengths = route
            .windows(2)
            .map(|w| haversine_m(w[0], w[1]))
            .collect();
        Self {
            route,
            seg_lengths,
            seg_index: 0,
            seg_progress_m: 0.0,
            speed_mps: 0.0,
            target_speed_mps,
            t_elapsed: 0.0,
        }
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    pub fn at_route_end(&self) -> bool {
        self.seg_index >= self.seg_lengths.len()
    }

    /// Advance the vehicle by dt seconds. Past the last point the bus parks:
    /// speed decays to zero, position holds.
    pub fn tick(&mut self, dt: f64) {
        self.t_elapsed += dt;

        let target = if self.at_route_end() { 0.0 } else { self.target_speed_mps };
        // First-order speed lag
        self.speed_mps += (target - self.speed_mps) * (dt * 0.5).min(1.0);

        let mut advance = self.speed_mps * dt;
        while advance > 0.0 && self.seg_index < self.seg_lengths.len() {
            let remaining = self.seg_lengths[self.seg_index] - self.seg_progress_m;
            if advance < remaining {
                self.seg_progress_m += advance;
                advance = 0.0;
            } else {
                advance -= remaining;
                self.seg_index += 1;
                self.seg_progress_m = 0.0;
            }
        }
    }

    /// True (noise-free) position, interpolated along the active segment.
    pub fn true_position(&self) -> GeoPoint {
        if self.at_route_end() {
            return self.route[self.route.len() - 1];
        }
        let a = self.route[self.seg_index];
        let b = self.route[self.seg_index + 1];
        let len = self.seg_lengths[self.seg_index];
        if len < 1e-9 {
            return a;
        }
        let t = (self.seg_progress_m / len).clamp(0.0, 1.0);
        GeoPoint::new(a.lat + (b.lat - a.lat) * t, a.lon + (b.lon - a.lon) * t)
    }

    /// True course: bearing of the active segment.
    pub fn true_heading_deg(&self) -> f64 {
        if self.at_route_end() {
            let n = self.route.len();
            return bearing_deg(self.route[n - 2], self.route[n - 1]);
        }
        bearing_deg(self.route[self.seg_index], self.route[self.seg_index + 1])
    }
}

// ── GPS receiver model ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct GpsModel {
    /// 1-sigma horizontal position noise, meters.
    pub noise_sigma_m: f64,
    /// 1-sigma heading jitter, degrees.
    pub heading_jitter_deg: f64,
    /// Reported accuracy under normal conditions, meters.
    pub accuracy_m: f64,
}

impl GpsModel {
    /// Sample one fix from the vehicle's true state. Scenario effects:
    /// - GpsDegraded multiplies noise and the reported accuracy
    /// - Detour shifts the vehicle laterally (perpendicular to the course)
    pub fn sample(
        &self,
        sim: &VehicleSim,
        scenario: &ScenarioConfig,
        rng: &mut StdRng,
        timestamp_ms: i64,
    ) -> Fix {
        let sigma = self.noise_sigma_m * scenario.noise_multiplier();
        let heading = sim.true_heading_deg();
        let mut p = sim.true_position();

        // Detour: drift perpendicular to the course, to the right.
        let lateral = scenario.detour_offset_m(sim.t_elapsed);
        if lateral != 0.0 {
            let perp = (heading + 90.0).to_radians();
            p = offset_m(p, lateral * perp.sin(), lateral * perp.cos());
        }

        p = offset_m(p, gauss(rng, sigma), gauss(rng, sigma));

        let reported_heading =
            (heading + gauss(rng, self.heading_jitter_deg) + 360.0) % 360.0;
        Fix {
            lat: p.lat,
            lon: p.lon,
            accuracy_m: Some(self.accuracy_m * scenario.noise_multiplier()),
            heading_deg: Some(reported_heading),
            speed_mps: Some(sim.speed_mps()),
            timestamp_ms,
        }
    }
}

/// Zero-mean Gaussian draw; sigma ≤ 0 means no noise.
fn gauss(rng: &mut StdRng, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    Normal::new(0.0, sigma).map(|n| n.sample(rng)).unwrap_or(0.0)
}
