//! Position tracker — turns the raw fix stream into one stable current fix.
//!
//! Smoothing is exponential with a speed-scaled alpha: a stationary bus gets
//! heavy damping (GPS jitter at a stop must not wander the marker), a moving
//! bus gets a responsive track. Heading comes from the receiver when it
//! reports one, otherwise from the bearing between raw fixes once enough
//! ground has been covered to make the bearing meaningful.
//!
//! State is mutated exclusively by `update` (the fix handler); it resets
//! when a run starts.

use nav_types::{bearing_deg, haversine_m, Fix, GeoPoint};

use crate::config::NavConfig;

/// The tracker's output for one tick: the smoothed coordinate plus the raw
/// quality fields the guidance engine gates on.
#[derive(Debug, Clone, Copy)]
pub struct SmoothedFix {
    pub point: GeoPoint,
    pub heading_deg: Option<f64>,
    pub speed_mps: f64,
    pub accuracy_m: Option<f64>,
    pub timestamp_ms: i64,
}

pub struct PositionTracker {
    alpha_min: f64,
    alpha_max: f64,
    heading_min_displacement_m: f64,

    smoothed: Option<GeoPoint>,
    /// Raw point at the last derived-bearing update.
    bearing_anchor: Option<GeoPoint>,
    heading_deg: Option<f64>,
    speed_mps: f64,
    accuracy_m: Option<f64>,
}

impl PositionTracker {
    pub fn new(cfg: &NavConfig) -> Self {
        Self {
            alpha_min: cfg.smoothing_alpha_min,
            alpha_max: cfg.smoothing_alpha_max,
            heading_min_displacement_m: cfg.heading_min_displacement_m,
            smoothed: None,
            bearing_anchor: None,
            heading_deg: None,
            speed_mps: 0.0,
            accuracy_m: None,
        }
    }

    /// Clear all state. Called when a navigation or recording run starts.
    pub fn reset(&mut self) {
        self.smoothed = None;
        self.bearing_anchor = None;
        self.heading_deg = None;
        self.speed_mps = 0.0;
        self.accuracy_m = None;
    }

    /// Last reported accuracy, for gating decisions elsewhere.
    pub fn accuracy_m(&self) -> Option<f64> {
        self.accuracy_m
    }

    /// Last reported speed, m/s.
    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }

    /// Consume one raw fix and return the current smoothed fix.
    pub fn update(&mut self, raw: &Fix) -> SmoothedFix {
        let raw_point = raw.point();
        let speed = raw.speed_mps.unwrap_or(0.0).max(0.0);
        self.speed_mps = speed;
        self.accuracy_m = raw.accuracy_m;

        // Speed-scaled smoothing: full responsiveness from ~20 m/s up.
        let span = self.alpha_max - self.alpha_min;
        let alpha = self.alpha_min + span * (speed / 20.0).clamp(0.0, 1.0);

        let smoothed = match self.smoothed {
            None => raw_point,
            Some(prev) => GeoPoint::new(
                prev.lat + (raw_point.lat - prev.lat) * alpha,
                prev.lon + (raw_point.lon - prev.lon) * alpha,
            ),
        };
        self.smoothed = Some(smoothed);

        // Heading: trust the receiver when it reports one.
        match raw.heading_deg {
            Some(h) if h.is_finite() => {
                self.heading_deg = Some((h % 360.0 + 360.0) % 360.0);
                self.bearing_anchor = Some(raw_point);
            }
            _ => {
                // Derive from raw (unsmoothed) movement, but only once the
                // bus has moved far enough for the bearing to mean anything.
                match self.bearing_anchor {
                    None => self.bearing_anchor = Some(raw_point),
                    Some(anchor) => {
                        if haversine_m(anchor, raw_point) >= self.heading_min_displacement_m {
                            self.heading_deg = Some(bearing_deg(anchor, raw_point));
                            self.bearing_anchor = Some(raw_point);
                        }
                    }
                }
            }
        }

        SmoothedFix {
            point: smoothed,
            heading_deg: self.heading_deg,
            speed_mps: speed,
            accuracy_m: raw.accuracy_m,
            timestamp_ms: raw.timestamp_ms,
        }
    }
}
