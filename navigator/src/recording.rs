//! Circuit recording session: drive the route once, capture the trace and
//! the stop list, then persist both through the circuit store.
//!
//! The trace is throttled: a fix is appended only when it is far enough in
//! both time and distance from the last accepted point, so an idling bus
//! does not bloat the trace with jitter. Pausing suspends trace capture
//! only — stop marking keeps working while paused, because the operator
//! often pauses at the curb exactly when a stop needs marking.

use std::time::Instant;

use nav_types::GeoPoint;
use thiserror::Error;
use uuid::Uuid;

use crate::config::NavConfig;
use crate::tracker::SmoothedFix;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("trace too short: {got} points, need at least {min}")]
    TraceTooShort { got: usize, min: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracePoint {
    pub point: GeoPoint,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStop {
    /// Sequential order in the circuit, 0-based.
    pub index: usize,
    pub location: GeoPoint,
    pub label: Option<String>,
}

/// A finished recording, ready for the store.
#[derive(Debug)]
pub struct CompletedRecording {
    pub id: Uuid,
    pub trace: Vec<TracePoint>,
    pub stops: Vec<RecordedStop>,
}

pub struct RecordingSession {
    id: Uuid,
    min_interval: std::time::Duration,
    min_displacement_m: f64,
    min_points: usize,

    trace: Vec<TracePoint>,
    last_accepted: Option<(Instant, GeoPoint)>,
    stops: Vec<RecordedStop>,
    paused: bool,
}

impl RecordingSession {
    pub fn new(cfg: &NavConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            min_interval: cfg.trace_min_interval,
            min_displacement_m: cfg.trace_min_displacement_m,
            min_points: cfg.trace_min_points,
            trace: Vec::new(),
            last_accepted: None,
            stops: Vec::new(),
            paused: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }

    pub fn stops(&self) -> &[RecordedStop] {
        &self.stops
    }

    /// Offer a fix to the trace. Accepted only when unpaused and the fix is
    /// at least the minimum interval AND displacement away from the last
    /// accepted point. Returns whether the point was appended.
    pub fn offer_fix(&mut self, fix: &SmoothedFix, now: Instant) -> bool {
        if self.paused {
            return false;
        }
        if let Some((last_at, last_point)) = self.last_accepted {
            if now.duration_since(last_at) < self.min_interval {
                return false;
            }
            if nav_types::haversine_m(last_point, fix.point) < self.min_displacement_m {
                return false;
            }
        }
        self.trace.push(TracePoint {
            point: fix.point,
            timestamp_ms: fix.timestamp_ms,
        });
        self.last_accepted = Some((now, fix.point));
        true
    }

    /// Mark the current position as the next stop. Works while paused.
    pub fn mark_stop(&mut self, fix: &SmoothedFix, label: Option<String>) -> RecordedStop {
        let stop = RecordedStop {
            index: self.stops.len(),
            location: fix.point,
            label,
        };
        self.stops.push(stop.clone());
        stop
    }

    /// Remove the most recently marked stop, if any.
    pub fn undo_stop(&mut self) -> Option<RecordedStop> {
        self.stops.pop()
    }

    /// Close the session. A trace with too few points is rejected — a
    /// near-empty trace is a recording mistake, not a circuit.
    pub fn finish(self) -> Result<CompletedRecording, RecordingError> {
        if self.trace.len() < self.min_points {
            return Err(RecordingError::TraceTooShort {
                got: self.trace.len(),
                min: self.min_points,
            });
        }
        Ok(CompletedRecording {
            id: self.id,
            trace: self.trace,
            stops: self.stops,
        })
    }
}
