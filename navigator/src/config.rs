//! Tuning constants for the guidance engine and its collaborators.
//!
//! Every page-level variant of the original guidance flow collapses into this
//! one struct: reference-trajectory usage, proximity radii and the ramp
//! keyword set are configuration, not separate code paths.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NavConfig {
    // ── Stop approach ─────────────────────────────────────────────────────
    /// Warning distance frozen at zone entry when speed < `warn_speed_split`.
    pub warn_radius_slow_m: f64,
    /// Warning distance frozen at zone entry when speed ≥ `warn_speed_split`.
    pub warn_radius_fast_m: f64,
    /// Speed boundary between the two warning radii, m/s (80 km/h).
    pub warn_speed_split_mps: f64,
    /// Distance at which a stop counts as reached.
    pub arrival_radius_m: f64,
    /// Distance for the one-shot proximity tone.
    pub ding_radius_m: f64,
    /// Banner distance rounding step, meters.
    pub banner_step_m: f64,

    // ── Maneuvers ─────────────────────────────────────────────────────────
    /// Distance at which a maneuver is spoken.
    pub maneuver_speak_radius_m: f64,
    /// Distance at which the maneuver index advances.
    pub maneuver_advance_radius_m: f64,

    // ── Off-route detection ───────────────────────────────────────────────
    /// Whether the reference trajectory (when valid) governs off-route checks.
    pub use_reference_trajectory: bool,
    /// Accuracy worse than this gates the check out entirely.
    pub off_route_max_accuracy_m: f64,
    /// Speed below this gates the check out (walking-pace floor).
    pub off_route_min_speed_mps: f64,
    /// Strike recorded past this lateral distance.
    pub off_route_threshold_m: f64,
    /// Strikes reset once lateral distance drops below this (hysteresis band).
    pub on_route_threshold_m: f64,
    /// Consecutive strikes required to trigger a reroute.
    pub reroute_strikes: u32,
    /// Minimum delay between reroute requests.
    pub reroute_cooldown: Duration,

    // ── Tracker ───────────────────────────────────────────────────────────
    pub smoothing_alpha_min: f64,
    pub smoothing_alpha_max: f64,
    /// Cumulative raw displacement before a derived bearing update.
    pub heading_min_displacement_m: f64,

    // ── Speech ────────────────────────────────────────────────────────────
    /// Minimum gap between utterances, regardless of text.
    pub speech_cooldown: Duration,
    /// Preferred voice locale tag (e.g. "fr-CA").
    pub locale: String,

    // ── Instruction normalization ─────────────────────────────────────────
    /// Substrings marking a maneuver as ramp-like. Mixed French/English by
    /// design: the route provider emits both. Kept configurable because the
    /// boundary behavior (a street literally named "Rampe ...") is heuristic.
    pub ramp_keywords: Vec<String>,

    // ── Recording ─────────────────────────────────────────────────────────
    pub trace_min_interval: Duration,
    pub trace_min_displacement_m: f64,
    pub trace_min_points: usize,

    // ── Route cache ───────────────────────────────────────────────────────
    pub route_cache_ttl: Duration,
    pub route_timeout: Duration,
    /// Fractional-degree rounding for cache keys (10^-4 ≈ 11 m).
    pub route_key_decimals: u32,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            warn_radius_slow_m: 150.0,
            warn_radius_fast_m: 200.0,
            warn_speed_split_mps: 80.0 / 3.6,
            arrival_radius_m: 45.0,
            ding_radius_m: 10.0,
            banner_step_m: 5.0,

            maneuver_speak_radius_m: 55.0,
            maneuver_advance_radius_m: 13.0,

            use_reference_trajectory: true,
            off_route_max_accuracy_m: 35.0,
            off_route_min_speed_mps: 1.2,
            off_route_threshold_m: 35.0,
            on_route_threshold_m: 18.0,
            reroute_strikes: 3,
            reroute_cooldown: Duration::from_secs(12),

            smoothing_alpha_min: 0.18,
            smoothing_alpha_max: 0.38,
            heading_min_displacement_m: 8.0,

            speech_cooldown: Duration::from_millis(1600),
            locale: "fr-CA".to_string(),

            ramp_keywords: [
                "ramp", "rampe", "exit", "sortie", "merge", "fork",
                "junction", "motorway", "highway", "autoroute", "bretelle",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),

            trace_min_interval: Duration::from_millis(1200),
            trace_min_displacement_m: 8.0,
            trace_min_points: 12,

            route_cache_ttl: Duration::from_secs(600),
            route_timeout: Duration::from_secs(8),
            route_key_decimals: 4,
        }
    }
}
