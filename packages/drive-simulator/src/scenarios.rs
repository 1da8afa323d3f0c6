//! scenarios.rs — Injectable fault scenarios for the drive simulator
//!
//! Each scenario reproduces a real-world failure mode against the navigator:
//! - GpsDegraded: urban-canyon noise, accuracy past the off-route gate
//! - SignalDropout: periodic silence from the forwarder (tunnels, parking)
//! - Detour: a growing lateral offset that must trip off-route detection
//!
//! Every scenario is recoverable; none corrupts vehicle state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioType {
    /// Multiply GPS noise and reported accuracy (urban canyon, bad sky view)
    GpsDegraded,
    /// Periodically stop emitting fixes entirely (tunnel, dead zone)
    SignalDropout,
    /// Drift laterally off the route to force reroute behavior
    Detour,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub active: Vec<ScenarioType>,
    /// Noise and accuracy multiplier while GpsDegraded is active.
    pub degraded_multiplier: f64,
    /// Dropout cycle: silent for `dropout_duration_s` out of every
    /// `dropout_period_s`.
    pub dropout_period_s: f64,
    pub dropout_duration_s: f64,
    /// Detour ramps in after this many seconds of driving...
    pub detour_start_s: f64,
    /// ...up to this lateral offset (meters, to the right of the course).
    pub detour_offset_m: f64,
    /// Seconds to reach the full offset.
    pub detour_ramp_s: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            active: vec![],
            degraded_multiplier: 8.0,
            dropout_period_s: 30.0,
            dropout_duration_s: 8.0,
            detour_start_s: 20.0,
            detour_offset_m: 60.0,
            detour_ramp_s: 10.0,
        }
    }
}

impl ScenarioConfig {
    pub fn has(&self, s: &ScenarioType) -> bool {
        self.active.contains(s)
    }

    /// Position-noise and accuracy multiplier.
    pub fn noise_multiplier(&self) -> f64 {
        if self.has(&ScenarioType::GpsDegraded) {
            self.degraded_multiplier
        } else {
            1.0
        }
    }

    /// Whether the forwarder is silent at this point in simulated time.
    pub fn is_dropped(&self, t_elapsed: f64) -> bool {
        if !self.has(&ScenarioType::SignalDropout) || self.dropout_period_s <= 0.0 {
            return false;
        }
        t_elapsed % self.dropout_period_s < self.dropout_duration_s
    }

    /// Current lateral offset for the Detour scenario, meters.
    pub fn detour_offset_m(&self, t_elapsed: f64) -> f64 {
        if !self.has(&ScenarioType::Detour) || t_elapsed < self.detour_start_s {
            return 0.0;
        }
        let ramp = ((t_elapsed - self.detour_start_s) / self.detour_ramp_s).clamp(0.0, 1.0);
        self.detour_offset_m * ramp
    }
}

/// Presets selectable from the CLI.
pub fn preset_degraded() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::GpsDegraded],
        ..Default::default()
    }
}

pub fn preset_dropout() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::SignalDropout],
        ..Default::default()
    }
}

pub fn preset_detour() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::Detour],
        ..Default::default()
    }
}

pub fn preset_by_name(name: &str) -> Option<ScenarioConfig> {
    match name {
        "degraded" => Some(preset_degraded()),
        "dropout" => Some(preset_dropout()),
        "detour" => Some(preset_detour()),
        "default" => Some(ScenarioConfig::default()),
        _ => None,
    }
}
