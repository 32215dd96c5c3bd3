use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location_sample::LocationSample;

/// The final figures of a finished session, after end-trim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: i64,
    pub total_distance_m: f64,
    pub max_speed_mps: f64,
    pub accepted_sample_count: usize,
    /// Wall-clock time the session was started, before movement was detected.
    pub session_start: DateTime<Utc>,
    /// When riding was detected. Equals `session_start` if it never was.
    pub actual_start: DateTime<Utc>,
    pub actual_end: DateTime<Utc>,
    pub route: Vec<LocationSample>,
}

impl TripSummary {
    pub fn duration_seconds(&self) -> i64 {
        (self.actual_end - self.actual_start).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub latest_point: LocationSample,
    pub cumulative_distance_m: f64,
    pub max_speed_mps: f64,
    pub accepted_point_count: usize,
    pub is_waiting: bool,
}
